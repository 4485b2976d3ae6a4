//! Slab error types.

use std::path::PathBuf;

use slabd_primitives::{ErrorKind, IdentifierError};

/// Errors from slab layout, index and fetch operations.
#[derive(Debug, thiserror::Error)]
pub enum SlabError {
    /// Malformed or non-canonical commitment identifier.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(#[from] IdentifierError),

    /// More than one directory holds the same slab.
    #[error("directory conflict at {canonical}: {legacy:?}")]
    DirectoryConflict {
        /// Canonical path.
        canonical: PathBuf,
        /// Other directories that decode to the same identifier.
        legacy: Vec<PathBuf>,
    },

    /// Slab, unit or file missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// On-disk structure is corrupt or inconsistent.
    #[error("invalid slab layout: {0}")]
    InvalidLayout(String),

    /// Range does not fit in a single blob.
    #[error("range [{start}, +{len}) crosses a blob or unit boundary")]
    RangeCrossesBoundary {
        /// First byte of the range, relative to the file.
        start: u64,
        /// Range length.
        len: u64,
    },

    /// Caller supplied an invalid argument (path, size, table capacity).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SlabError {
    /// Machine-readable kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SlabError::InvalidIdentifier(_) => ErrorKind::InvalidIdentifier,
            SlabError::DirectoryConflict { .. } => ErrorKind::DirectoryConflict,
            SlabError::NotFound(_) => ErrorKind::NotFound,
            SlabError::InvalidLayout(_) => ErrorKind::InvalidSlabLayout,
            SlabError::RangeCrossesBoundary { .. } => ErrorKind::RangeCrossesBoundary,
            SlabError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            SlabError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            SlabError::Io(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn layout(msg: impl Into<String>) -> Self {
        SlabError::InvalidLayout(msg.into())
    }
}

/// Result alias for slab operations.
pub type SlabResult<T> = Result<T, SlabError>;
