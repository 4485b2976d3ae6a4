//! Provider-side receiver for slab uploads.
//!
//! Stores uploaded units, shards and manifest blobs in the provider's own slab
//! tree (deal-scoped layout) and serves shards back for reconstruction. Every
//! file is written through a temp file and a rename.

use std::{fs, path::PathBuf};

use slabd_api::SlabTarget;
use slabd_primitives::constants::MDU_SIZE;
use tracing::debug;

use crate::{SlabDirs, SlabError, SlabResult, layout};

/// Upload receiver rooted at a provider's storage directory.
#[derive(Debug, Clone)]
pub struct ProviderInbox {
    dirs: SlabDirs,
}

impl ProviderInbox {
    /// Receiver storing slabs under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { dirs: SlabDirs::new(root) }
    }

    /// Directory resolver of this provider.
    pub fn dirs(&self) -> &SlabDirs {
        &self.dirs
    }

    /// Directory of `target`, created if missing.
    pub fn slab_dir(&self, target: &SlabTarget) -> SlabResult<PathBuf> {
        let dir = self.dirs.resolve(&target.commitment, Some(target.deal))?;
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Store a whole unit (unit #0, a witness unit or a plain user unit).
    pub fn store_unit(&self, target: &SlabTarget, unit_index: u64, data: &[u8]) -> SlabResult<()> {
        if data.len() != MDU_SIZE {
            return Err(SlabError::InvalidRequest(format!(
                "unit upload is {} bytes, expected {MDU_SIZE}",
                data.len()
            )));
        }
        let path = layout::unit_path(&self.slab_dir(target)?, unit_index);
        layout::write_atomic(&path, data)?;
        debug!(deal = %target.deal, slab = %target.commitment, unit_index, "Stored unit");
        Ok(())
    }

    /// Store one erasure shard.
    pub fn store_shard(
        &self,
        target: &SlabTarget,
        unit_index: u64,
        slot: usize,
        data: &[u8],
    ) -> SlabResult<()> {
        if data.is_empty() || data.len() > MDU_SIZE {
            return Err(SlabError::InvalidRequest(format!(
                "shard upload of {} bytes",
                data.len()
            )));
        }
        let path = layout::shard_path(&self.slab_dir(target)?, unit_index, slot);
        layout::write_atomic(&path, data)?;
        debug!(deal = %target.deal, slab = %target.commitment, unit_index, slot, "Stored shard");
        Ok(())
    }

    /// Store the manifest blob.
    pub fn store_manifest(&self, target: &SlabTarget, data: &[u8]) -> SlabResult<()> {
        let path = layout::manifest_path(&self.slab_dir(target)?);
        layout::write_atomic(&path, data)?;
        Ok(())
    }

    /// Read one shard.
    pub fn fetch_shard(&self, target: &SlabTarget, unit_index: u64, slot: usize) -> SlabResult<Vec<u8>> {
        let dir = self.dirs.resolve(&target.commitment, Some(target.deal))?;
        match fs::read(layout::shard_path(&dir, unit_index, slot)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SlabError::NotFound(
                format!("shard {slot} of unit {unit_index} of {}", target.commitment),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use slabd_primitives::{CommitmentId, DealId};
    use tempfile::tempdir;

    fn target() -> SlabTarget {
        let id = CommitmentId::parse(
            "97f1d3a73197d7942695638c4fa9ac0fc3688c4f9774b905a14e3a3f171bac586c55e83ff97a1aeffb3af00adb22c6bb",
        )
        .unwrap();
        SlabTarget::new(DealId(9), id)
    }

    #[test]
    fn test_store_and_fetch_shard() {
        let tmp = tempdir().unwrap();
        let inbox = ProviderInbox::new(tmp.path());

        inbox.store_shard(&target(), 3, 2, b"shard-bytes").unwrap();
        assert_eq!(inbox.fetch_shard(&target(), 3, 2).unwrap(), b"shard-bytes");
        assert_matches!(inbox.fetch_shard(&target(), 3, 1), Err(SlabError::NotFound(_)));

        let dir = inbox.dirs().canonical(&target().commitment, Some(DealId(9)));
        assert!(layout::shard_path(&dir, 3, 2).is_file());
    }

    #[test]
    fn test_store_unit_checks_size() {
        let tmp = tempdir().unwrap();
        let inbox = ProviderInbox::new(tmp.path());

        assert_matches!(
            inbox.store_unit(&target(), 0, b"short"),
            Err(SlabError::InvalidRequest(_))
        );
        inbox.store_unit(&target(), 0, &vec![1u8; MDU_SIZE]).unwrap();
        inbox.store_manifest(&target(), b"roots").unwrap();
    }
}
