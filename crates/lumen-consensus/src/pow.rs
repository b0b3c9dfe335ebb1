//! Proof-of-work check: compact bits decode to a sane target and the block
//! hash sits at or below it.

use crate::params::ChainParams;
use crate::target::U256;
use lumen_primitives::BlockHash;

/// Accept `hash` against `bits` iff the decoded target is positive, does not
/// overflow, stays within the proof-of-work limit, and dominates the hash
/// under 256-bit unsigned comparison.
pub fn check_proof_of_work(hash: &BlockHash, bits: u32, params: &ChainParams) -> bool {
    let (target, negative, overflow) = U256::from_compact(bits);

    if negative || target.is_zero() || overflow || target > params.pow_limit {
        return false;
    }

    U256::from_le_bytes(hash.to_byte_array()) <= target
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_with_le_value(top_byte: u8) -> BlockHash {
        // Byte 31 of the little-endian array is the most significant.
        let mut bytes = [0u8; 32];
        bytes[31] = top_byte;
        BlockHash::from_byte_array(bytes)
    }

    #[test]
    fn hash_at_target_passes() {
        let params = ChainParams::mainnet();
        let bits = params.pow_limit.to_compact();
        assert!(check_proof_of_work(&BlockHash::all_zeros(), bits, &params));
        // 0x20... < pow limit (0x003f...).
        assert!(check_proof_of_work(&hash_with_le_value(0x20), bits, &params));
    }

    #[test]
    fn hash_above_target_fails() {
        let params = ChainParams::mainnet();
        let bits = params.pow_limit.to_compact();
        assert!(!check_proof_of_work(&hash_with_le_value(0x40), bits, &params));
    }

    #[test]
    fn zero_target_fails() {
        let params = ChainParams::mainnet();
        assert!(!check_proof_of_work(&BlockHash::all_zeros(), 0, &params));
    }

    #[test]
    fn negative_bits_fail() {
        let params = ChainParams::mainnet();
        assert!(!check_proof_of_work(&BlockHash::all_zeros(), 0x0480_0001, &params));
    }

    #[test]
    fn overflowing_bits_fail() {
        let params = ChainParams::mainnet();
        assert!(!check_proof_of_work(&BlockHash::all_zeros(), 0x2900_ffff, &params));
    }

    #[test]
    fn target_above_limit_fails() {
        let params = ChainParams::mainnet();
        // One mantissa step above the limit encoding.
        assert!(!check_proof_of_work(&BlockHash::all_zeros(), 0x1f40_0000, &params));
    }
}
