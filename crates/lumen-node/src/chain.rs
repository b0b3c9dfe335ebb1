//! In-memory header chain: the canonical index the consensus and token
//! layers read through [`ChainView`].

use lumen_consensus::{ChainEntry, ChainView, MEDIAN_TIME_SPAN};
use lumen_primitives::{Block, BlockHash};
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("block does not extend the current tip")]
    NotOnTip,

    #[error("cannot disconnect: chain is empty or hash mismatch")]
    BadDisconnect,
}

/// Hash-indexed header chain with a single active tip.
#[derive(Default)]
pub struct Chain {
    entries: HashMap<BlockHash, ChainEntry>,
    tip: Option<BlockHash>,
}

impl Chain {
    pub fn new() -> Self {
        Chain::default()
    }

    pub fn height(&self) -> Option<u32> {
        self.tip_entry().map(|entry| entry.height)
    }

    pub fn tip_entry(&self) -> Option<ChainEntry> {
        self.tip.and_then(|hash| self.entries.get(&hash).copied())
    }

    /// Append a block at the tip.
    pub fn connect(&mut self, block: &Block) -> Result<ChainEntry, ChainError> {
        let prev = self.tip.unwrap_or_else(BlockHash::all_zeros);
        if block.header.prev_blockhash != prev {
            return Err(ChainError::NotOnTip);
        }
        let height = self.height().map(|h| h + 1).unwrap_or(0);
        let entry = ChainEntry {
            hash: block.block_hash(),
            prev: block.header.prev_blockhash,
            height,
            time: block.header.time,
            bits: block.header.bits,
            proof_of_stake: block.is_proof_of_stake(),
        };
        self.entries.insert(entry.hash, entry);
        self.tip = Some(entry.hash);
        Ok(entry)
    }

    /// Detach the tip block.
    pub fn disconnect(&mut self, block: &Block) -> Result<ChainEntry, ChainError> {
        let tip_hash = self.tip.ok_or(ChainError::BadDisconnect)?;
        if block.block_hash() != tip_hash {
            return Err(ChainError::BadDisconnect);
        }
        let entry = self
            .entries
            .remove(&tip_hash)
            .ok_or(ChainError::BadDisconnect)?;
        self.tip = (!entry.prev.to_byte_array().iter().all(|b| *b == 0))
            .then_some(entry.prev);
        Ok(entry)
    }

    /// Median time of the last [`MEDIAN_TIME_SPAN`] blocks at the tip.
    pub fn median_time_past(&self) -> u32 {
        match self.tip {
            Some(tip) => lumen_consensus::median_time_past(self, &tip),
            None => 0,
        }
    }
}

impl ChainView for Chain {
    fn entry(&self, hash: &BlockHash) -> Option<ChainEntry> {
        self.entries.get(hash).copied()
    }
}
