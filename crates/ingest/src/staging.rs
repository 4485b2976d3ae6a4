//! Private staging directories.
//!
//! A slab is assembled under `.staging-<random>` next to its final location
//! and becomes visible through one rename. Dropping an unpublished
//! [`StagingDir`] (error, timeout, cancelled future) removes it.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use slabd_primitives::DealId;
use slabd_slab::{SlabDirs, layout::UNIT0_FILE};
use tracing::{debug, warn};

#[derive(Debug)]
pub(crate) struct StagingDir {
    path: PathBuf,
    published: bool,
}

/// Outcome of [`StagingDir::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Published {
    /// Our staging directory is now the slab.
    Renamed,
    /// A finished slab was already in place; staging was discarded.
    AlreadyPresent,
}

impl StagingDir {
    /// Synchronous: the guard exists as soon as the directory does.
    pub(crate) fn create(dirs: &SlabDirs, deal: DealId) -> io::Result<Self> {
        let path = dirs.staging(Some(deal));
        fs::create_dir_all(&path)?;
        debug!(path = %path.display(), "Created staging directory");
        Ok(Self { path, published: false })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Move the staged slab to `dest`.
    pub(crate) fn publish(mut self, dest: &Path) -> io::Result<Published> {
        if is_published(dest) {
            return Ok(Published::AlreadyPresent);
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::rename(&self.path, dest) {
            Ok(()) => {
                self.published = true;
                Ok(Published::Renamed)
            }
            // Lost a race against another writer of the same slab.
            Err(_) if is_published(dest) => Ok(Published::AlreadyPresent),
            Err(e) => Err(e),
        }
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.published {
            return;
        }
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed staging directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove staging directory"),
        }
    }
}

/// Whether `dir` holds a finished slab.
pub(crate) fn is_published(dir: &Path) -> bool {
    dir.join(UNIT0_FILE).is_file()
}
