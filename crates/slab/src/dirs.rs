//! Slab directory resolution.
//!
//! Slabs live under `<root>/deal-<id>/<key>/` or, for legacy global slabs,
//! `<root>/<key>/`. Older writers also used non-canonical spellings of the key
//! (upper case, `0x` prefix). Resolution migrates such a directory to the
//! canonical path exactly once and refuses to pick between two candidates.
//! Once a canonical directory has resolved with no legacy sibling, later
//! lookups skip the directory scan while it stays on disk.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashSet;
use slabd_primitives::{CommitmentId, DealId};
use tracing::{debug, info};

use crate::{
    SlabError, SlabResult,
    layout::{STAGING_PREFIX, UNIT0_FILE},
};

/// Root of the slab tree.
#[derive(Debug, Clone)]
pub struct SlabDirs {
    root: PathBuf,
    settled: Arc<DashSet<PathBuf>>,
}

impl SlabDirs {
    /// Create a resolver rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), settled: Arc::default() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every slab of a deal.
    pub fn deal_scope(&self, deal: DealId) -> PathBuf {
        self.root.join(deal.scope())
    }

    /// Canonical directory of a slab, whether or not it exists.
    pub fn canonical(&self, id: &CommitmentId, deal: Option<DealId>) -> PathBuf {
        match deal {
            Some(deal) => self.deal_scope(deal).join(id.storage_key()),
            None => self.root.join(id.storage_key()),
        }
    }

    /// Fresh staging directory path next to where the slab will be published.
    pub fn staging(&self, deal: Option<DealId>) -> PathBuf {
        let parent = match deal {
            Some(deal) => self.deal_scope(deal),
            None => self.root.clone(),
        };
        parent.join(format!("{STAGING_PREFIX}{:016x}", rand::random::<u64>()))
    }

    /// Resolve the directory of a slab, migrating a single legacy directory.
    ///
    /// Returns the canonical path. It only exists on disk if the slab (or a
    /// migrated legacy copy) does.
    pub fn resolve(&self, id: &CommitmentId, deal: Option<DealId>) -> SlabResult<PathBuf> {
        let canonical = self.canonical(id, deal);
        let canonical_exists = canonical.is_dir();
        if canonical_exists && self.settled.contains(&canonical) {
            return Ok(canonical);
        }
        let legacy = self.legacy_candidates(id, deal, &canonical)?;

        match (canonical_exists, legacy.as_slice()) {
            (true, []) => {
                self.settled.insert(canonical.clone());
                Ok(canonical)
            }
            (false, []) => Ok(canonical),
            (false, [single]) => {
                if let Some(parent) = canonical.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::rename(single, &canonical)?;
                info!(
                    from = %single.display(),
                    to = %canonical.display(),
                    "Migrated legacy slab directory"
                );
                self.settled.insert(canonical.clone());
                Ok(canonical)
            }
            _ => Err(SlabError::DirectoryConflict { canonical, legacy }),
        }
    }

    /// Resolve and require unit #0 to be present.
    pub fn resolve_existing(&self, id: &CommitmentId, deal: Option<DealId>) -> SlabResult<PathBuf> {
        let dir = self.resolve(id, deal)?;
        if !dir.join(UNIT0_FILE).is_file() {
            return Err(SlabError::NotFound(format!("slab {id}")));
        }
        Ok(dir)
    }

    fn legacy_candidates(
        &self,
        id: &CommitmentId,
        deal: Option<DealId>,
        canonical: &Path,
    ) -> SlabResult<Vec<PathBuf>> {
        let mut scopes = vec![self.root.clone()];
        if let Some(deal) = deal {
            scopes.push(self.deal_scope(deal));
        }

        let mut found = Vec::new();
        for scope in scopes {
            let entries = match fs::read_dir(&scope) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let entry = entry?;
                let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                    continue;
                };
                if name.starts_with(STAGING_PREFIX) || !entry.file_type()?.is_dir() {
                    continue;
                }
                let path = entry.path();
                if path != canonical && id.matches_name(&name) {
                    debug!(path = %path.display(), "Found legacy slab directory");
                    found.push(path);
                }
            }
        }
        found.sort();
        Ok(found)
    }
}
