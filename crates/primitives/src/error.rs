//! Machine-readable error taxonomy.

/// Error kind exposed to callers.
///
/// Every crate error maps onto one of these so that user-visible failures carry a
/// stable code instead of a formatted message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr, strum::EnumString,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or non-canonical commitment identifier.
    InvalidIdentifier,
    /// Canonical and legacy slab directories both exist.
    DirectoryConflict,
    /// Slab, file or session does not exist.
    NotFound,
    /// Corrupt or inconsistent on-disk structure. Never retried.
    InvalidSlabLayout,
    /// Fewer than K shards could be obtained.
    InsufficientShards,
    /// Nonce reused or outside its signed window.
    ReplayRejected,
    /// Slab commitment differs from the ledger content root.
    Conflict,
    /// Owner or signature mismatch.
    Unauthorized,
    /// Requested range crosses a blob or unit boundary.
    RangeCrossesBoundary,
    /// Deadline elapsed.
    Timeout,
    /// Operation cancelled.
    Cancelled,
    /// Upstream (ledger/provider) unavailable after retries.
    Unavailable,
    /// Invalid request parameters.
    InvalidRequest,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Stable code string.
    pub fn code(&self) -> &'static str {
        self.into()
    }

    /// Whether retrying later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::InsufficientShards | ErrorKind::Timeout | ErrorKind::Unavailable
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_snake_case() {
        assert_eq!(ErrorKind::InvalidSlabLayout.code(), "invalid_slab_layout");
        assert_eq!(ErrorKind::RangeCrossesBoundary.to_string(), "range_crosses_boundary");
        assert_eq!("replay_rejected".parse::<ErrorKind>().unwrap(), ErrorKind::ReplayRejected);
    }

    #[test]
    fn test_retryable() {
        assert!(ErrorKind::InsufficientShards.is_retryable());
        assert!(!ErrorKind::InvalidSlabLayout.is_retryable());
    }
}
