//! Mempool configuration.

use crate::types::AncestorLimits;

/// Package dependency limits applied on acceptance.
#[derive(Debug, Clone)]
pub struct MempoolLimits {
    pub max_ancestors: usize,
    pub max_ancestor_size: i64,
    pub max_descendants: usize,
    pub max_descendant_size: i64,
}

impl Default for MempoolLimits {
    fn default() -> Self {
        MempoolLimits {
            max_ancestors: 25,
            max_ancestor_size: 101_000,
            max_descendants: 25,
            max_descendant_size: 101_000,
        }
    }
}

impl MempoolLimits {
    pub fn as_ancestor_limits(&self) -> AncestorLimits {
        AncestorLimits {
            max_ancestors: self.max_ancestors,
            max_ancestor_size: self.max_ancestor_size,
            max_descendants: self.max_descendants,
            max_descendant_size: self.max_descendant_size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MempoolOptions {
    /// Maximum pool size in bytes of transaction weight.
    pub max_size_bytes: u64,

    /// Seconds an entry may sit in the pool before expiry.
    pub expiry_seconds: i64,

    /// Minimum relay feerate in base units per kvB.
    pub min_relay_feerate: i64,

    pub limits: MempoolLimits,
}

impl Default for MempoolOptions {
    fn default() -> Self {
        MempoolOptions {
            max_size_bytes: 300 * 1_000_000,
            expiry_seconds: 336 * 3600,
            min_relay_feerate: 1000,
            limits: MempoolLimits::default(),
        }
    }
}
