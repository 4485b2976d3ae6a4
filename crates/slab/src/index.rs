//! Parsed view of a slab's unit #0.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use dashmap::DashMap;
use slabd_primitives::{Root, StripeParams, constants::MDU_PAYLOAD_CAPACITY};
use tracing::{debug, trace};

use crate::{
    SlabError, SlabResult,
    layout::{self, UNIT0_FILE},
    payload::FileSpan,
    table::Unit0Builder,
};

/// A live file in the slab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path.
    pub path: String,
    /// Logical start offset.
    pub start: u64,
    /// Length in bytes.
    pub length: u64,
    /// Flag bits.
    pub flags: u8,
    /// Unix seconds.
    pub timestamp: u64,
}

impl FileEntry {
    /// Placement of the file in the logical address space.
    pub fn span(&self) -> FileSpan {
        FileSpan::new(self.start, self.length)
    }
}

/// Path -> location map of a slab plus its derived unit counts.
#[derive(Debug, Clone)]
pub struct SlabIndex {
    files: BTreeMap<String, FileEntry>,
    roots: Vec<Root>,
    user_units: u64,
    witness_count: u64,
}

impl SlabIndex {
    /// Load the index of the slab in `dir`.
    pub fn load(dir: &Path) -> SlabResult<Self> {
        let unit0 = match fs::read(dir.join(UNIT0_FILE)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SlabError::NotFound(format!("unit #0 in {}", dir.display())));
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_unit0(unit0, dir)
    }

    /// Build the index from unit #0 bytes. `dir` is consulted only when the
    /// root table is empty.
    pub fn from_unit0(unit0: Vec<u8>, dir: &Path) -> SlabResult<Self> {
        let table = Unit0Builder::open(unit0)?;
        let user_units = table.user_unit_count();
        let roots = table.roots().to_vec();

        let witness_count = if roots.is_empty() {
            witness_from_files(dir, user_units)?
        } else {
            (roots.len() as u64).checked_sub(user_units).ok_or_else(|| {
                SlabError::layout(format!(
                    "root table has {} roots but the file table needs {user_units} user units",
                    roots.len()
                ))
            })?
        };

        let files = table
            .files()
            .map(|r| {
                let entry = FileEntry {
                    path: r.path.clone(),
                    start: r.start,
                    length: r.length,
                    flags: r.flags,
                    timestamp: r.timestamp,
                };
                (r.path.clone(), entry)
            })
            .collect();

        Ok(Self { files, roots, user_units, witness_count })
    }

    /// Entry for `path`.
    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.files.get(path)
    }

    /// Entry for `path`, or `NotFound`.
    pub fn lookup(&self, path: &str) -> SlabResult<&FileEntry> {
        self.get(path).ok_or_else(|| SlabError::NotFound(format!("file {path}")))
    }

    /// Live files sorted by path.
    pub fn list(&self) -> Vec<&FileEntry> {
        self.files.values().collect()
    }

    /// Root table entries.
    pub fn roots(&self) -> &[Root] {
        &self.roots
    }

    /// Number of user-data units.
    pub fn user_unit_count(&self) -> u64 {
        self.user_units
    }

    /// Number of witness units.
    pub fn witness_count(&self) -> u64 {
        self.witness_count
    }

    /// Reject a slab whose witness count disagrees with what `params`
    /// derives from its user-unit count.
    pub fn check_params(&self, params: &StripeParams) -> SlabResult<()> {
        let expected = params.witness_count(self.user_units);
        if self.witness_count != expected {
            return Err(SlabError::layout(format!(
                "slab has {} witness units, {} user units need {expected}",
                self.witness_count, self.user_units
            )));
        }
        Ok(())
    }

    /// Root of on-disk unit `unit_index`, if the root table lists it.
    pub fn unit_root(&self, unit_index: u64) -> Option<Root> {
        let slot = usize::try_from(unit_index.checked_sub(1)?).ok()?;
        self.roots.get(slot).copied()
    }

    /// On-disk unit index of user unit `ordinal`.
    pub fn unit_file_index(&self, ordinal: u64) -> u64 {
        1 + self.witness_count + ordinal
    }

    /// On-disk unit index holding logical offset `offset`.
    pub fn unit_index_for(&self, offset: u64) -> u64 {
        self.unit_file_index(offset / MDU_PAYLOAD_CAPACITY)
    }
}

/// Witness count of a slab whose root table is empty: every unit index past
/// #0 that is not a user unit is a witness unit.
fn witness_from_files(dir: &Path, user_units: u64) -> SlabResult<u64> {
    let units: BTreeSet<u64> = layout::list_unit_files(dir)?
        .into_iter()
        .map(|f| f.unit())
        .filter(|n| *n > 0)
        .collect();

    let total = units.len() as u64;
    if units.iter().copied().ne(1..=total) {
        return Err(SlabError::layout(format!(
            "unit files in {} are not contiguous",
            dir.display()
        )));
    }
    total.checked_sub(user_units).ok_or_else(|| {
        SlabError::layout(format!("{total} unit files but {user_units} user units"))
    })
}

/// Slab index cache keyed by unit #0 path, invalidated on mtime change.
#[derive(Debug, Default)]
pub struct SlabIndexCache {
    entries: DashMap<PathBuf, (SystemTime, Arc<SlabIndex>)>,
}

impl SlabIndexCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached index for the slab in `dir`, reloaded if unit #0 changed.
    pub fn get(&self, dir: &Path) -> SlabResult<Arc<SlabIndex>> {
        let unit0 = dir.join(UNIT0_FILE);
        let mtime = match fs::metadata(&unit0) {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.entries.remove(&unit0);
                return Err(SlabError::NotFound(format!("unit #0 in {}", dir.display())));
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(entry) = self.entries.get(&unit0) {
            if entry.0 == mtime {
                trace!(path = %unit0.display(), "Slab index cache hit");
                return Ok(entry.1.clone());
            }
        }

        let index = Arc::new(SlabIndex::load(dir)?);
        debug!(
            path = %unit0.display(),
            files = index.files.len(),
            witness = index.witness_count,
            "Loaded slab index"
        );
        self.entries.insert(unit0, (mtime, index.clone()));
        Ok(index)
    }

    /// Drop the entry for `dir`.
    pub fn invalidate(&self, dir: &Path) {
        self.entries.remove(&dir.join(UNIT0_FILE));
    }

    /// Number of cached slabs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
