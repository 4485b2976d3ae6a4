//! Merkle root over a download session's chunk log.
//!
//! Leaves are `keccak256(range_start_be || range_len_be || proof_hash)` in log
//! order. Each level hashes adjacent pairs; an odd last node moves up
//! unchanged. The root of an empty log is zero.

use alloy_primitives::{B256, keccak256};

use crate::ChunkRecord;

/// Leaf hash of one logged chunk.
pub fn chunk_leaf(chunk: &ChunkRecord) -> B256 {
    let mut input = [0u8; 8 + 8 + 32];
    input[..8].copy_from_slice(&chunk.range_start.to_be_bytes());
    input[8..16].copy_from_slice(&chunk.range_len.to_be_bytes());
    input[16..].copy_from_slice(chunk.proof_hash.as_slice());
    keccak256(input)
}

/// Root over the whole log.
pub fn chunk_root(chunks: &[ChunkRecord]) -> B256 {
    let mut level: Vec<B256> = chunks.iter().map(chunk_leaf).collect();
    if level.is_empty() {
        return B256::ZERO;
    }
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => hash_pair(left, right),
                _ => pair[0],
            })
            .collect();
    }
    level[0]
}

fn hash_pair(left: &B256, right: &B256) -> B256 {
    let mut input = [0u8; 64];
    input[..32].copy_from_slice(left.as_slice());
    input[32..].copy_from_slice(right.as_slice());
    keccak256(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(start: u64) -> ChunkRecord {
        ChunkRecord { range_start: start, range_len: 10, proof_hash: B256::repeat_byte(start as u8) }
    }

    #[test]
    fn test_empty_and_single() {
        assert_eq!(chunk_root(&[]), B256::ZERO);
        assert_eq!(chunk_root(&[chunk(0)]), chunk_leaf(&chunk(0)));
    }

    #[test]
    fn test_odd_node_promoted() {
        let chunks = [chunk(0), chunk(10), chunk(20)];
        let left = hash_pair(&chunk_leaf(&chunks[0]), &chunk_leaf(&chunks[1]));
        let expected = hash_pair(&left, &chunk_leaf(&chunks[2]));
        assert_eq!(chunk_root(&chunks), expected);
    }

    #[test]
    fn test_order_matters() {
        assert_ne!(chunk_root(&[chunk(0), chunk(10)]), chunk_root(&[chunk(10), chunk(0)]));
    }
}
