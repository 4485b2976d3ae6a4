//! Authorization gate.
//!
//! Signed requests use EIP-712 typed data with the domain
//! `{ name: "slabd", version: "1", chainId }` and the type
//!
//! ```text
//! RetrievalRequest(uint64 dealId,string filePath,uint64 rangeStart,uint64 rangeLen,uint64 nonce,uint64 expiresAt)
//! ```

use alloy_primitives::{Address, B256, Signature};
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain, sol};
use bytes::Bytes;
use slabd_api::Deal;
use slabd_primitives::{CommitmentId, DealId};

use crate::RetrievalError;

/// EIP-712 domain name.
pub const DOMAIN_NAME: &str = "slabd";

/// EIP-712 domain version.
pub const DOMAIN_VERSION: &str = "1";

sol! {
    /// Owner authorization of one byte range.
    #[derive(Debug, PartialEq, Eq)]
    struct RetrievalRequest {
        uint64 dealId;
        string filePath;
        uint64 rangeStart;
        uint64 rangeLen;
        uint64 nonce;
        uint64 expiresAt;
    }
}

impl RetrievalRequest {
    /// Build the typed request for a range.
    pub fn new(
        deal: DealId,
        file_path: &str,
        range_start: u64,
        range_len: u64,
        nonce: u64,
        expires_at: u64,
    ) -> Self {
        Self {
            dealId: deal.0,
            filePath: file_path.to_owned(),
            rangeStart: range_start,
            rangeLen: range_len,
            nonce,
            expiresAt: expires_at,
        }
    }
}

/// Nonce, expiry and owner signature attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRange {
    /// Caller-chosen nonce, unique per (deal, owner).
    pub nonce: u64,
    /// Unix deadline.
    pub expires_at: u64,
    /// 65-byte `r || s || v` signature over the EIP-712 hash.
    pub signature: Bytes,
}

impl SignedRange {
    /// Wrap a signature.
    pub fn new(nonce: u64, expires_at: u64, signature: Signature) -> Self {
        Self { nonce, expires_at, signature: Bytes::copy_from_slice(&signature.as_bytes()) }
    }
}

/// Checks callers against the ledger view of a deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authorizer {
    chain_id: u64,
    require_signatures: bool,
}

impl Authorizer {
    /// Create a gate for `chain_id`.
    pub fn new(chain_id: u64, require_signatures: bool) -> Self {
        Self { chain_id, require_signatures }
    }

    /// Whether unsigned requests are rejected.
    pub fn require_signatures(&self) -> bool {
        self.require_signatures
    }

    /// Signing domain.
    pub fn domain(&self) -> Eip712Domain {
        eip712_domain! {
            name: DOMAIN_NAME,
            version: DOMAIN_VERSION,
            chain_id: self.chain_id,
        }
    }

    /// Hash the owner signs.
    pub fn signing_hash(&self, request: &RetrievalRequest) -> B256 {
        request.eip712_signing_hash(&self.domain())
    }

    /// The caller must own the deal and the slab must be its content root.
    pub fn check_deal(
        &self,
        deal: &Deal,
        slab: &CommitmentId,
        owner: &Address,
    ) -> Result<(), RetrievalError> {
        if *owner != deal.owner {
            return Err(RetrievalError::Unauthorized(format!(
                "{owner} is not the owner of deal {}",
                deal.id
            )));
        }
        if deal.content_root != Some(*slab) {
            return Err(RetrievalError::Conflict { expected: deal.content_root, actual: *slab });
        }
        Ok(())
    }

    /// The signature must recover to `owner`.
    pub fn verify_signature(
        &self,
        owner: &Address,
        request: &RetrievalRequest,
        signature: &[u8],
    ) -> Result<(), RetrievalError> {
        if signature.len() != 65 {
            return Err(RetrievalError::Unauthorized(format!(
                "signature is {} bytes, expected 65",
                signature.len()
            )));
        }
        let signature = Signature::try_from(signature)
            .map_err(|e| RetrievalError::Unauthorized(format!("invalid signature: {e}")))?;
        let signer = signature
            .recover_address_from_prehash(&self.signing_hash(request))
            .map_err(|e| RetrievalError::Unauthorized(format!("recovery failed: {e}")))?;
        if signer != *owner {
            return Err(RetrievalError::Unauthorized(format!(
                "request signed by {signer}, expected {owner}"
            )));
        }
        Ok(())
    }
}
