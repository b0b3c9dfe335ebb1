//! Core type definitions for the mempool.

use lumen_primitives::encode::{Decodable, Encodable, Error as EncodeError};
use lumen_primitives::{Amount, Transaction};
use slotmap::DefaultKey;
use std::io::{Read, Write};

/// Handle to an entry in the mempool arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub(crate) DefaultKey);

/// Fee rate in base units per virtual kilobyte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FeeRate(pub i64);

impl FeeRate {
    pub fn from_sat_per_kvb(sat_kvb: i64) -> Self {
        FeeRate(sat_kvb)
    }

    /// Fee this rate charges for `vsize` virtual bytes, rounded down.
    pub fn fee_for(&self, vsize: i64) -> Amount {
        Amount::from_sat(self.0.saturating_mul(vsize) / 1000)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MempoolError {
    #[error("transaction already in mempool")]
    Duplicate,

    #[error("coinbase transaction not allowed in the mempool")]
    Coinbase,

    #[error("too many ancestors: {0}")]
    TooManyAncestors(usize),

    #[error("ancestor size too large: {0} vbytes")]
    AncestorSizeTooLarge(i64),

    #[error("too many descendants: {0}")]
    TooManyDescendants(usize),

    #[error("descendant size too large: {0} vbytes")]
    DescendantSizeTooLarge(i64),

    #[error("another reissue of token '{0}' is already pending")]
    ReissueConflict(String),

    #[error("fee overflow while aggregating package fees")]
    FeeOverflow,

    #[error("no mempool entry for the given transaction")]
    MissingEntry,
}

/// Why an entry left the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Included in a block.
    Block,
    /// Chain reorganization.
    Reorg,
    /// Conflicted with an in-block transaction.
    Conflict,
    /// Evicted by the size limit.
    SizeLimit,
    /// Expired by age.
    Expiry,
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemovalReason::Block => "block",
            RemovalReason::Reorg => "reorg",
            RemovalReason::Conflict => "conflict",
            RemovalReason::SizeLimit => "sizelimit",
            RemovalReason::Expiry => "expiry",
        }
    }
}

/// Per-call ancestor walk limits.
#[derive(Debug, Clone, Copy)]
pub struct AncestorLimits {
    pub max_ancestors: usize,
    pub max_ancestor_size: i64,
    pub max_descendants: usize,
    pub max_descendant_size: i64,
}

impl AncestorLimits {
    /// No limits; used by the template assembler.
    pub fn unlimited() -> Self {
        AncestorLimits {
            max_ancestors: usize::MAX,
            max_ancestor_size: i64::MAX,
            max_descendants: usize::MAX,
            max_descendant_size: i64::MAX,
        }
    }
}

/// Serializable form of one pool entry, used when persisting the mempool
/// across restarts. Aggregates are not stored; they are recomputed as the
/// entries are re-accepted in time order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub tx: Transaction,
    pub fee: Amount,
    pub time: i64,
    pub entry_height: u32,
}

impl Encodable for EntrySnapshot {
    fn encode_to<W: Write>(&self, w: &mut W) -> std::io::Result<usize> {
        let mut len = self.tx.encode_to(w)?;
        len += self.fee.encode_to(w)?;
        len += self.time.encode_to(w)?;
        len += self.entry_height.encode_to(w)?;
        Ok(len)
    }
}

impl Decodable for EntrySnapshot {
    fn decode_from<R: Read>(r: &mut R) -> Result<Self, EncodeError> {
        Ok(EntrySnapshot {
            tx: Transaction::decode_from(r)?,
            fee: Amount::decode_from(r)?,
            time: i64::decode_from(r)?,
            entry_height: u32::decode_from(r)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_primitives::encode::{deserialize, serialize};

    #[test]
    fn fee_for_scales_by_size() {
        let rate = FeeRate::from_sat_per_kvb(1000);
        assert_eq!(rate.fee_for(250).to_sat(), 250);
        assert_eq!(rate.fee_for(1000).to_sat(), 1000);
        let fractional = FeeRate::from_sat_per_kvb(123);
        assert_eq!(fractional.fee_for(100).to_sat(), 12);
    }

    #[test]
    fn entry_snapshot_round_trip() {
        let snapshot = EntrySnapshot {
            tx: Transaction::default(),
            fee: Amount::from_sat(1234),
            time: 1_700_000_000,
            entry_height: 42,
        };
        let bytes = serialize(&snapshot);
        assert_eq!(deserialize::<EntrySnapshot>(&bytes).unwrap(), snapshot);
    }
}
