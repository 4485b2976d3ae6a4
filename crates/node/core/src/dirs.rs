//! Data directory layout.

use crate::args::DataDirArgs;
use directories::ProjectDirs;
use eyre::{Result, WrapErr};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Config file name inside the data directory.
pub const CONFIG_FILE: &str = "slabd.toml";

/// Slab tree inside the data directory.
pub const SLABS_DIR: &str = "slabs";

/// Session database inside the data directory.
pub const SESSIONS_DB: &str = "sessions.redb";

/// Platform data directory for slabd, if the platform has one.
pub fn default_data_dir() -> Option<PathBuf> {
    ProjectDirs::from("org", "slabd", "slabd").map(|dirs| dirs.data_dir().to_path_buf())
}

/// Resolved data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDirs {
    /// Root data directory.
    pub root: PathBuf,
    config: Option<PathBuf>,
}

impl DataDirs {
    /// Resolve from args without touching the filesystem.
    pub fn resolve(args: &DataDirArgs) -> Self {
        let root = args
            .datadir
            .clone()
            .unwrap_or_else(|| default_data_dir().unwrap_or_else(|| PathBuf::from(".slabd")));
        Self { root, config: args.config.clone() }
    }

    /// Resolve from args and create the root.
    pub fn new(args: &DataDirArgs) -> Result<Self> {
        let dirs = Self::resolve(args);
        fs::create_dir_all(&dirs.root)
            .wrap_err_with(|| format!("failed to create {}", dirs.root.display()))?;
        Ok(dirs)
    }

    /// Config file path.
    pub fn config_file(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(|| self.root.join(CONFIG_FILE))
    }

    /// Default slab root.
    pub fn slabs_dir(&self) -> PathBuf {
        self.root.join(SLABS_DIR)
    }

    /// Default session database.
    pub fn sessions_db(&self) -> PathBuf {
        self.root.join(SESSIONS_DB)
    }

    /// Resolve `path` against the root unless it is absolute.
    pub fn join(&self, path: &Path) -> PathBuf {
        if path.is_absolute() { path.to_path_buf() } else { self.root.join(path) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let args = DataDirArgs { datadir: Some("/var/lib/slabd".into()), config: None };
        let dirs = DataDirs::resolve(&args);
        assert_eq!(dirs.config_file(), Path::new("/var/lib/slabd/slabd.toml"));
        assert_eq!(dirs.slabs_dir(), Path::new("/var/lib/slabd/slabs"));
        assert_eq!(dirs.sessions_db(), Path::new("/var/lib/slabd/sessions.redb"));
        assert_eq!(dirs.join(Path::new("other")), Path::new("/var/lib/slabd/other"));
        assert_eq!(dirs.join(Path::new("/srv/slabs")), Path::new("/srv/slabs"));
    }

    #[test]
    fn test_explicit_config_file() {
        let args = DataDirArgs {
            datadir: Some("/var/lib/slabd".into()),
            config: Some("/etc/slabd.toml".into()),
        };
        assert_eq!(DataDirs::resolve(&args).config_file(), Path::new("/etc/slabd.toml"));
    }

    #[test]
    fn test_new_creates_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("nested/data");
        let dirs = DataDirs::new(&DataDirArgs { datadir: Some(root.clone()), config: None }).unwrap();
        assert!(root.is_dir());
        assert_eq!(dirs.root, root);
    }
}
