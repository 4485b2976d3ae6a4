//! File names inside a slab directory.
//!
//! ```text
//! <slab>/mdu_0.bin            unit #0 (root table + file table)
//! <slab>/mdu_<n>.bin          witness unit or plain user-data unit
//! <slab>/mdu_<n>_slot_<s>.bin erasure shard of user-data unit n
//! <slab>/manifest.bin         aggregation blob
//! ```

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

/// Unit #0 file name.
pub const UNIT0_FILE: &str = "mdu_0.bin";

/// Manifest blob file name.
pub const MANIFEST_FILE: &str = "manifest.bin";

/// Prefix of staging directories. Never treated as slabs.
pub const STAGING_PREFIX: &str = ".staging-";

const TEMP_PREFIX: &str = ".tmp-";

/// A unit or shard file parsed from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UnitFile {
    /// `mdu_<n>.bin`.
    Unit(u64),
    /// `mdu_<n>_slot_<s>.bin`.
    Shard {
        /// Unit index.
        unit: u64,
        /// Provider slot.
        slot: usize,
    },
}

impl UnitFile {
    /// Parse a file name.
    pub fn parse(name: &str) -> Option<Self> {
        let stem = name.strip_prefix("mdu_")?.strip_suffix(".bin")?;
        match stem.split_once("_slot_") {
            Some((unit, slot)) => Some(UnitFile::Shard {
                unit: unit.parse().ok()?,
                slot: slot.parse().ok()?,
            }),
            None => stem.parse().ok().map(UnitFile::Unit),
        }
    }

    /// Unit index.
    pub fn unit(&self) -> u64 {
        match self {
            UnitFile::Unit(n) | UnitFile::Shard { unit: n, .. } => *n,
        }
    }

    /// File name.
    pub fn file_name(&self) -> String {
        match self {
            UnitFile::Unit(n) => format!("mdu_{n}.bin"),
            UnitFile::Shard { unit, slot } => format!("mdu_{unit}_slot_{slot}.bin"),
        }
    }
}

/// Path of unit `n` in `dir`.
pub fn unit_path(dir: &Path, n: u64) -> PathBuf {
    dir.join(UnitFile::Unit(n).file_name())
}

/// Path of shard `slot` of unit `n` in `dir`.
pub fn shard_path(dir: &Path, n: u64, slot: usize) -> PathBuf {
    dir.join(UnitFile::Shard { unit: n, slot }.file_name())
}

/// Path of the manifest blob in `dir`.
pub fn manifest_path(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_FILE)
}

/// Unit and shard files present in `dir`, sorted.
pub fn list_unit_files(dir: &Path) -> io::Result<Vec<UnitFile>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(file) = entry.file_name().to_str().and_then(UnitFile::parse) {
            files.push(file);
        }
    }
    files.sort();
    Ok(files)
}

/// Write `data` to `path` through a sibling temp file and a rename, so readers
/// never observe a partial file.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("file");
    let tmp = parent.join(format!("{TEMP_PREFIX}{name}-{:016x}", rand::random::<u64>()));

    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unit_files() {
        assert_eq!(UnitFile::parse("mdu_0.bin"), Some(UnitFile::Unit(0)));
        assert_eq!(UnitFile::parse("mdu_12.bin"), Some(UnitFile::Unit(12)));
        assert_eq!(
            UnitFile::parse("mdu_3_slot_11.bin"),
            Some(UnitFile::Shard { unit: 3, slot: 11 })
        );
        assert_eq!(UnitFile::parse("manifest.bin"), None);
        assert_eq!(UnitFile::parse("mdu_x.bin"), None);
        assert_eq!(UnitFile::parse("mdu_1_slot_.bin"), None);
    }

    #[test]
    fn test_file_name_round_trip() {
        let shard = UnitFile::Shard { unit: 4, slot: 2 };
        assert_eq!(UnitFile::parse(&shard.file_name()), Some(shard));
    }

    #[test]
    fn test_write_atomic_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mdu_1.bin");

        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
