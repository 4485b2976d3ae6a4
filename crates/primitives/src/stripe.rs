//! Stripe parameters selected from a deal's service parameters.

use crate::constants::{BLOBS_PER_MDU, MDU_SIZE, plain_witness_count, witness_units_for_leaves};

/// Errors from service-parameter parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StripeError {
    /// `rs=` hint could not be parsed.
    #[error("malformed erasure hint: {0}")]
    Malformed(String),

    /// K/M outside the supported range.
    #[error("unsupported erasure geometry k={k} m={m}")]
    Unsupported {
        /// Data shards.
        k: usize,
        /// Parity shards.
        m: usize,
    },
}

/// Ingest/storage mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[strum(serialize_all = "lowercase")]
pub enum StripeMode {
    /// Whole units stored on every holder.
    #[default]
    Plain,
    /// Units split into K data + M parity shards, one per provider slot.
    Erasure,
}

/// Layout parameters, parsed once and passed down the call chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StripeParams {
    /// Mode.
    pub mode: StripeMode,
    /// Data shards per unit (0 in plain mode).
    pub k: usize,
    /// Parity shards per unit (0 in plain mode).
    pub m: usize,
    /// Blobs per shard.
    pub rows: usize,
    /// Blob commitments per user-data unit in the witness stream.
    pub leaf_count: usize,
}

impl Default for StripeParams {
    fn default() -> Self {
        Self::plain()
    }
}

impl StripeParams {
    /// Plain layout.
    pub const fn plain() -> Self {
        Self {
            mode: StripeMode::Plain,
            k: 0,
            m: 0,
            rows: BLOBS_PER_MDU,
            leaf_count: BLOBS_PER_MDU,
        }
    }

    /// Erasure layout with `k` data and `m` parity shards.
    pub fn erasure(k: usize, m: usize) -> Result<Self, StripeError> {
        if k == 0 || m == 0 || k + m > 256 || BLOBS_PER_MDU % k != 0 {
            return Err(StripeError::Unsupported { k, m });
        }
        let rows = BLOBS_PER_MDU / k;
        Ok(Self {
            mode: StripeMode::Erasure,
            k,
            m,
            rows,
            leaf_count: (k + m) * rows,
        })
    }

    /// Parse from `;`-separated service hints, e.g. `General;rs=8+4`.
    ///
    /// A hint without an `rs=` token selects the plain layout.
    pub fn from_service_params(params: &str) -> Result<Self, StripeError> {
        let Some(hint) = params
            .split([';', ','])
            .map(str::trim)
            .find_map(|token| token.strip_prefix("rs="))
        else {
            return Ok(Self::plain());
        };

        let (k, m) = hint
            .split_once('+')
            .ok_or_else(|| StripeError::Malformed(hint.to_string()))?;
        let k = k
            .trim()
            .parse()
            .map_err(|_| StripeError::Malformed(hint.to_string()))?;
        let m = m
            .trim()
            .parse()
            .map_err(|_| StripeError::Malformed(hint.to_string()))?;

        Self::erasure(k, m)
    }

    /// True for the erasure-coded layout.
    pub fn is_erasure(&self) -> bool {
        self.mode == StripeMode::Erasure
    }

    /// Total provider slots (K+M), or 1 in plain mode.
    pub fn slots(&self) -> usize {
        match self.mode {
            StripeMode::Plain => 1,
            StripeMode::Erasure => self.k + self.m,
        }
    }

    /// Size of one shard in bytes.
    pub fn shard_size(&self) -> usize {
        match self.mode {
            StripeMode::Plain => MDU_SIZE,
            StripeMode::Erasure => MDU_SIZE / self.k,
        }
    }

    /// Witness units needed for `user_units` user-data units.
    pub fn witness_count(&self, user_units: u64) -> u64 {
        match self.mode {
            StripeMode::Plain => plain_witness_count(user_units),
            StripeMode::Erasure => witness_units_for_leaves(user_units, self.leaf_count as u64),
        }
    }
}
