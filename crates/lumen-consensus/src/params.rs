//! Chain parameters.

use crate::target::U256;
use lumen_primitives::address::{AddressPrefixes, MAINNET_PREFIXES, TESTNET_PREFIXES};
use lumen_primitives::amount::COIN;
use lumen_primitives::Amount;

/// Maximum weight of a block.
pub const MAX_BLOCK_WEIGHT: usize = 4_000_000;

/// Maximum signature-operation cost of a block.
pub const MAX_BLOCK_SIGOPS_COST: i64 = 80_000;

/// Default floor feerate for block templates, in base units per kvB.
pub const DEFAULT_BLOCK_MIN_TX_FEE: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

#[derive(Debug, Clone)]
pub struct ChainParams {
    pub network: Network,

    // === proof parameters ===
    pub pow_limit: U256,
    pub pos_limit: U256,
    pub target_spacing: i64,
    pub target_timespan: i64,
    pub pow_no_retargeting: bool,
    pub pos_no_retargeting: bool,
    /// Height after which only proof-of-stake blocks are accepted.
    pub last_pow_block: u32,
    /// Granularity mask applied to proof-of-stake block timestamps.
    pub stake_timestamp_mask: u32,

    // === subsidy ===
    pub subsidy_halving_interval: u32,
    pub initial_subsidy: Amount,

    // === deployments ===
    pub bip34_enabled: bool,
    pub bip65_enabled: bool,
    pub bip66_enabled: bool,
    pub segwit_enabled: bool,
    pub csv_enabled: bool,
    pub governance_height: u32,

    // === token issuance ===
    pub root_fee: Amount,
    pub reissue_fee: Amount,
    pub unique_fee: Amount,
    pub sub_fee: Amount,
    pub username_fee: Amount,
    /// Base58Check address the issuance fees burn to at genesis; governance
    /// can move it later.
    pub token_fee_address: String,

    pub address_prefixes: AddressPrefixes,
}

impl ChainParams {
    pub fn interval(&self) -> i64 {
        self.target_timespan / self.target_spacing
    }

    pub fn mainnet() -> Self {
        ChainParams {
            network: Network::Mainnet,
            pow_limit: U256::from_limbs([u64::MAX, u64::MAX, u64::MAX, 0x003f_ffff_ffff_ffff]),
            pos_limit: U256::from_limbs([u64::MAX, u64::MAX, u64::MAX, 0x0000_0000_0000_ffff]),
            target_spacing: 64,
            target_timespan: 16 * 60,
            pow_no_retargeting: false,
            pos_no_retargeting: false,
            last_pow_block: 250,
            stake_timestamp_mask: 0xf,
            subsidy_halving_interval: 525_960,
            initial_subsidy: Amount::from_sat(100 * COIN),
            bip34_enabled: true,
            bip65_enabled: true,
            bip66_enabled: true,
            segwit_enabled: true,
            csv_enabled: true,
            governance_height: 100,
            root_fee: Amount::from_sat(10_000 * COIN),
            reissue_fee: Amount::from_sat(10_000 * COIN),
            unique_fee: Amount::from_sat(100 * COIN),
            sub_fee: Amount::from_sat(100 * COIN),
            username_fee: Amount::from_sat(COIN),
            token_fee_address: "KVe9NfMxAf7pN9woGBhbWYooJw85BKzG1w".to_string(),
            address_prefixes: MAINNET_PREFIXES,
        }
    }

    pub fn testnet() -> Self {
        // The testnet inherits the mainnet retarget constants; only the
        // address space and the fee sink differ.
        ChainParams {
            network: Network::Testnet,
            token_fee_address: "mfe7MqgYZgBuXzrT2QTFqZwBXwRDqagHTp".to_string(),
            address_prefixes: TESTNET_PREFIXES,
            governance_height: 0,
            ..Self::mainnet()
        }
    }

    pub fn regtest() -> Self {
        ChainParams {
            network: Network::Regtest,
            pow_limit: U256::from_limbs([u64::MAX, u64::MAX, u64::MAX, 0x7fff_ffff_ffff_ffff]),
            pos_limit: U256::from_limbs([u64::MAX, u64::MAX, u64::MAX, 0x7fff_ffff_ffff_ffff]),
            pow_no_retargeting: true,
            pos_no_retargeting: true,
            last_pow_block: u32::MAX,
            governance_height: 0,
            token_fee_address: "mfe7MqgYZgBuXzrT2QTFqZwBXwRDqagHTp".to_string(),
            address_prefixes: TESTNET_PREFIXES,
            ..Self::mainnet()
        }
    }

    /// Target bound for a block of the given kind.
    pub fn target_limit(&self, proof_of_stake: bool) -> U256 {
        if proof_of_stake {
            self.pos_limit
        } else {
            self.pow_limit
        }
    }

    pub fn no_retargeting(&self, proof_of_stake: bool) -> bool {
        if proof_of_stake {
            self.pos_no_retargeting
        } else {
            self.pow_no_retargeting
        }
    }
}

/// Block subsidy at `height`, halving on the params schedule.
pub fn get_block_subsidy(height: u32, params: &ChainParams) -> Amount {
    let halvings = height / params.subsidy_halving_interval;
    if halvings >= 64 {
        return Amount::ZERO;
    }
    Amount::from_sat(params.initial_subsidy.to_sat() >> halvings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_encode_to_expected_compact() {
        let params = ChainParams::mainnet();
        assert_eq!(params.pow_limit.to_compact(), 0x1f3f_ffff);
        assert_eq!(params.pos_limit.to_compact(), 0x1b00_ffff);
    }

    #[test]
    fn interval_from_spacing() {
        let params = ChainParams::mainnet();
        assert_eq!(params.interval(), 15);
    }

    #[test]
    fn subsidy_halves() {
        let params = ChainParams::mainnet();
        let first = get_block_subsidy(1, &params);
        let halved = get_block_subsidy(params.subsidy_halving_interval, &params);
        assert_eq!(first.to_sat(), 2 * halved.to_sat());
        assert_eq!(get_block_subsidy(64 * params.subsidy_halving_interval, &params), Amount::ZERO);
    }
}
