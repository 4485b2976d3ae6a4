//! Reed-Solomon striping of a unit.

use reed_solomon_erasure::galois_8::ReedSolomon;
use slabd_api::EngineError;
use slabd_primitives::constants::{BLOBS_PER_MDU, MDU_SIZE};
use tracing::trace;

fn codec(k: usize, m: usize) -> Result<ReedSolomon, EngineError> {
    if k == 0 || m == 0 || BLOBS_PER_MDU % k != 0 {
        return Err(EngineError::InvalidInput(format!("unsupported geometry k={k} m={m}")));
    }
    ReedSolomon::new(k, m).map_err(|e| EngineError::InvalidInput(format!("{e:?}")))
}

/// Split `unit` into `k` data shards and compute `m` parity shards.
pub(crate) fn encode(unit: &[u8], k: usize, m: usize) -> Result<Vec<Vec<u8>>, EngineError> {
    if unit.len() != MDU_SIZE {
        return Err(EngineError::InvalidInput(format!(
            "unit must be {MDU_SIZE} bytes, got {}",
            unit.len()
        )));
    }
    let rs = codec(k, m)?;
    let shard_size = MDU_SIZE / k;

    let mut shards: Vec<Vec<u8>> = unit.chunks(shard_size).map(<[u8]>::to_vec).collect();
    shards.resize_with(k + m, || vec![0u8; shard_size]);

    rs.encode(&mut shards)
        .map_err(|e| EngineError::InvalidInput(format!("encode failed: {e:?}")))?;

    trace!(k, m, shard_size, "Expanded unit into shards");
    Ok(shards)
}

/// Rebuild the unit from any `k` of the `k + m` shards.
pub(crate) fn reconstruct(
    mut shards: Vec<Option<Vec<u8>>>,
    k: usize,
    m: usize,
) -> Result<Vec<u8>, EngineError> {
    let rs = codec(k, m)?;
    if shards.len() != k + m {
        return Err(EngineError::InvalidInput(format!(
            "expected {} shard slots, got {}",
            k + m,
            shards.len()
        )));
    }

    let have = shards.iter().filter(|s| s.is_some()).count();
    if have < k {
        return Err(EngineError::NotEnoughShards { have, need: k });
    }

    let shard_size = MDU_SIZE / k;
    if let Some(bad) = shards.iter().flatten().find(|s| s.len() != shard_size) {
        return Err(EngineError::InvalidInput(format!(
            "shard must be {shard_size} bytes, got {}",
            bad.len()
        )));
    }

    rs.reconstruct_data(&mut shards)
        .map_err(|e| EngineError::InvalidInput(format!("reconstruct failed: {e:?}")))?;

    let mut unit = Vec::with_capacity(MDU_SIZE);
    for shard in shards.into_iter().take(k) {
        match shard {
            Some(data) => unit.extend_from_slice(&data),
            None => return Err(EngineError::NotEnoughShards { have, need: k }),
        }
    }
    Ok(unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn random_unit(seed: u64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut unit = vec![0u8; MDU_SIZE];
        rng.fill(unit.as_mut_slice());
        unit
    }

    #[test]
    fn test_every_k_subset_reconstructs() {
        // Small geometry keeps the subset enumeration cheap: C(6, >=4) = 22 subsets.
        let (k, m) = (4, 2);
        let unit = random_unit(1);
        let shards = encode(&unit, k, m).unwrap();

        for mask in 0u32..(1 << (k + m)) {
            if (mask.count_ones() as usize) < k {
                continue;
            }
            let subset = shards
                .iter()
                .enumerate()
                .map(|(i, s)| (mask & (1 << i) != 0).then(|| s.clone()))
                .collect();
            assert_eq!(reconstruct(subset, k, m).unwrap(), unit, "mask {mask:#b}");
        }
    }

    #[test]
    fn test_reconstruct_with_parity_only_losses() {
        let (k, m) = (8, 4);
        let unit = random_unit(2);
        let shards = encode(&unit, k, m).unwrap();

        let mut subset: Vec<_> = shards.into_iter().map(Some).collect();
        // Drop four data shards; all parity remains.
        for slot in [0, 2, 5, 7] {
            subset[slot] = None;
        }
        assert_eq!(reconstruct(subset, k, m).unwrap(), unit);
    }

    #[test]
    fn test_too_few_shards() {
        let (k, m) = (8, 4);
        let shards = encode(&random_unit(3), k, m).unwrap();
        let subset = shards
            .into_iter()
            .enumerate()
            .map(|(i, s)| (i < 7).then_some(s))
            .collect();

        assert_matches!(
            reconstruct(subset, k, m),
            Err(EngineError::NotEnoughShards { have: 7, need: 8 })
        );
    }
}
