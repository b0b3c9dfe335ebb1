//! Per-block difficulty adjustment: an exponential moving average on block
//! spacing, run independently for the proof-of-work and proof-of-stake
//! chains.

use crate::params::ChainParams;
use crate::target::U256;
use lumen_primitives::BlockHash;

/// A block-index entry as the retarget engine sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainEntry {
    pub hash: BlockHash,
    pub prev: BlockHash,
    pub height: u32,
    pub time: u32,
    pub bits: u32,
    pub proof_of_stake: bool,
}

/// Read access to the header chain. The node keeps the canonical index;
/// tests use a vector.
pub trait ChainView {
    fn entry(&self, hash: &BlockHash) -> Option<ChainEntry>;
}

/// Nearest ancestor of `from` (inclusive) with the requested kind.
fn last_block_of_kind<C: ChainView>(
    chain: &C,
    mut from: ChainEntry,
    proof_of_stake: bool,
) -> Option<ChainEntry> {
    loop {
        if from.proof_of_stake == proof_of_stake {
            return Some(from);
        }
        from = chain.entry(&from.prev)?;
    }
}

/// Compute the compact target the next block of the given kind must carry.
///
/// Fewer than two prior blocks of the kind yield the compact-encoded target
/// limit. Retargeting can be disabled per kind, in which case the parent's
/// bits pass through unchanged.
pub fn next_target_required<C: ChainView>(
    chain: &C,
    tip: Option<ChainEntry>,
    proof_of_stake: bool,
    params: &ChainParams,
) -> u32 {
    let limit_compact = params.target_limit(proof_of_stake).to_compact();

    let Some(tip) = tip else {
        return limit_compact;
    };
    let Some(prev) = last_block_of_kind(chain, tip, proof_of_stake) else {
        return limit_compact;
    };
    let Some(before_prev) = chain.entry(&prev.prev) else {
        return limit_compact;
    };
    let Some(prev_prev) = last_block_of_kind(chain, before_prev, proof_of_stake) else {
        return limit_compact;
    };
    if chain.entry(&prev_prev.prev).is_none() {
        return limit_compact;
    }

    calculate_next_target(prev.bits, prev.time as i64, prev_prev.time as i64, proof_of_stake, params)
}

/// The EMA step. Exposed separately so boundary behavior is testable
/// without a chain.
pub fn calculate_next_target(
    prev_bits: u32,
    prev_time: i64,
    prev_prev_time: i64,
    proof_of_stake: bool,
    params: &ChainParams,
) -> u32 {
    if params.no_retargeting(proof_of_stake) {
        return prev_bits;
    }

    let spacing = params.target_spacing;
    let mut actual_spacing = prev_time - prev_prev_time;
    if actual_spacing < 0 {
        actual_spacing = spacing;
    }
    if actual_spacing > spacing * 10 {
        actual_spacing = spacing * 10;
    }

    let limit = params.target_limit(proof_of_stake);
    let (prev_target, _, _) = U256::from_compact(prev_bits);

    let interval = params.interval();
    let numerator = ((interval - 1) * spacing + 2 * actual_spacing) as u64;
    let denominator = ((interval + 1) * spacing) as u64;

    let next = prev_target
        .checked_mul_u64(numerator)
        .map(|scaled| scaled.div_u64(denominator));

    match next {
        Some(target) if !target.is_zero() && target <= limit => target.to_compact(),
        // Zero, above the bound, or overflowed the multiply: saturate.
        _ => limit.to_compact(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct TestChain(HashMap<BlockHash, ChainEntry>);

    impl ChainView for TestChain {
        fn entry(&self, hash: &BlockHash) -> Option<ChainEntry> {
            self.0.get(hash).copied()
        }
    }

    fn hash(n: u8) -> BlockHash {
        BlockHash::from_byte_array([n; 32])
    }

    /// Build a linear chain of the given (time, bits, pos) triples.
    fn chain(blocks: &[(u32, u32, bool)]) -> (TestChain, Option<ChainEntry>) {
        let mut map = HashMap::new();
        let mut tip = None;
        for (i, &(time, bits, proof_of_stake)) in blocks.iter().enumerate() {
            let entry = ChainEntry {
                hash: hash(i as u8 + 1),
                prev: if i == 0 { BlockHash::all_zeros() } else { hash(i as u8) },
                height: i as u32,
                time,
                bits,
                proof_of_stake,
            };
            map.insert(entry.hash, entry);
            tip = Some(entry);
        }
        (TestChain(map), tip)
    }

    #[test]
    fn short_history_returns_limit() {
        let params = ChainParams::mainnet();
        let limit = params.pow_limit.to_compact();

        let (empty, tip) = chain(&[]);
        assert_eq!(next_target_required(&empty, tip, false, &params), limit);

        let (one, tip) = chain(&[(1000, limit, false)]);
        assert_eq!(next_target_required(&one, tip, false, &params), limit);

        let (two, tip) = chain(&[(1000, limit, false), (1064, limit, false)]);
        assert_eq!(next_target_required(&two, tip, false, &params), limit);
    }

    #[test]
    fn on_schedule_spacing_keeps_target() {
        let params = ChainParams::mainnet();
        let bits = 0x1c10_0000;
        let (view, tip) = chain(&[
            (1000, bits, false),
            (1064, bits, false),
            (1128, bits, false),
        ]);
        let next = next_target_required(&view, tip, false, &params);
        // spacing == target_spacing: numerator = (n-1)s + 2s = (n+1)s,
        // exactly the denominator.
        assert_eq!(next, bits);
    }

    #[test]
    fn slow_blocks_raise_target() {
        let params = ChainParams::mainnet();
        let bits = 0x1c10_0000;
        let (view, tip) = chain(&[
            (1000, bits, false),
            (1064, bits, false),
            (1064 + 640, bits, false),
        ]);
        let next = next_target_required(&view, tip, false, &params);
        let (next_target, _, _) = U256::from_compact(next);
        let (old_target, _, _) = U256::from_compact(bits);
        assert!(next_target > old_target);
    }

    #[test]
    fn fast_blocks_lower_target() {
        let params = ChainParams::mainnet();
        let bits = 0x1c10_0000;
        let (view, tip) = chain(&[
            (1000, bits, false),
            (1064, bits, false),
            (1064 + 8, bits, false),
        ]);
        let next = next_target_required(&view, tip, false, &params);
        let (next_target, _, _) = U256::from_compact(next);
        let (old_target, _, _) = U256::from_compact(bits);
        assert!(next_target < old_target);
    }

    #[test]
    fn spacing_clamps_at_boundary() {
        // Parents 640 seconds apart: exactly the 10x clamp, so a gap of
        // 640 and a gap of 6400 retarget identically.
        let params = ChainParams::mainnet();
        assert_eq!(params.target_spacing, 64);
        assert_eq!(params.target_timespan, 16 * 60);
        let bits = 0x1c10_0000;
        let at_clamp = calculate_next_target(bits, 640, 0, false, &params);
        let past_clamp = calculate_next_target(bits, 6400, 0, false, &params);
        assert_eq!(at_clamp, past_clamp);
    }

    #[test]
    fn negative_spacing_treated_as_target_spacing() {
        let params = ChainParams::mainnet();
        let bits = 0x1c10_0000;
        let negative = calculate_next_target(bits, 1000, 2000, false, &params);
        let on_schedule = calculate_next_target(bits, 1064, 1000, false, &params);
        assert_eq!(negative, on_schedule);
    }

    #[test]
    fn no_retargeting_passes_bits_through() {
        let mut params = ChainParams::mainnet();
        params.pow_no_retargeting = true;
        let bits = 0x1c10_0000;
        assert_eq!(calculate_next_target(bits, 9999, 0, false, &params), bits);
    }

    #[test]
    fn saturates_at_limit() {
        let params = ChainParams::mainnet();
        let limit = params.pow_limit.to_compact();
        // Already at the limit with maximal slowness: cannot exceed it.
        assert_eq!(calculate_next_target(limit, 6400, 0, false, &params), limit);
    }

    #[test]
    fn kinds_retarget_independently() {
        let params = ChainParams::mainnet();
        let pow_bits = 0x1c10_0000;
        let pos_bits = 0x1a10_0000;
        // PoW, PoS, PoW, PoS alternating: the PoS retarget must only read
        // the PoS parents.
        let (view, tip) = chain(&[
            (1000, pow_bits, false),
            (1016, pos_bits, true),
            (1064, pow_bits, false),
            (1080, pos_bits, true),
            (1128, pow_bits, false),
        ]);
        let next_pos = next_target_required(&view, tip, true, &params);
        // PoS spacing was 1080-1016 = 64 = on schedule.
        assert_eq!(next_pos, pos_bits);
    }
}
