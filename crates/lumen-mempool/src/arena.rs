//! Arena-based entry storage with sorted secondary indices.
//!
//! Entries live in a slotmap and link to each other by handle. Each sorted
//! index key is cached in the entry so a mutation can remove the stale key
//! before recomputing: remove with the old key, mutate, reinsert with the
//! new one.

use crate::types::EntryId;
use lumen_primitives::{Amount, Transaction, Txid, Wtxid};
use slotmap::{DefaultKey, SlotMap};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Index key ordering entries by ancestor feerate, best package first.
///
/// Feerates compare by cross-multiplication so no precision is lost; ties
/// break to the higher ancestor fee, then the smaller ancestor size, then
/// the lexicographically smaller txid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AncestorScoreKey {
    pub fees: i64,
    pub size: i64,
    pub txid: Txid,
}

impl Ord for AncestorScoreKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.fees as i128 * other.size as i128;
        let rhs = other.fees as i128 * self.size as i128;
        rhs.cmp(&lhs)
            .then_with(|| other.fees.cmp(&self.fees))
            .then_with(|| self.size.cmp(&other.size))
            .then_with(|| {
                self.txid
                    .to_byte_array()
                    .cmp(&other.txid.to_byte_array())
            })
    }
}

impl PartialOrd for AncestorScoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Index key ordering entries by eviction priority: the maximum of the
/// entry's own feerate and its descendant feerate, lowest first, older
/// entries before newer at equal rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescendantScoreKey {
    pub fees: i64,
    pub size: i64,
    pub time: i64,
}

impl Ord for DescendantScoreKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.fees as i128 * other.size as i128;
        let rhs = other.fees as i128 * self.size as i128;
        lhs.cmp(&rhs).then_with(|| self.time.cmp(&other.time))
    }
}

impl PartialOrd for DescendantScoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One transaction in the pool with its precomputed statistics and package
/// aggregates.
pub struct MempoolEntry {
    pub tx: Arc<Transaction>,
    pub txid: Txid,
    pub wtxid: Wtxid,

    /// Base fee the transaction pays.
    pub fee: Amount,
    /// Fee plus any prioritisation delta.
    pub modified_fee: Amount,
    /// Virtual size in bytes.
    pub vsize: i64,
    pub sigop_cost: i64,
    /// Entry timestamp, seconds since epoch.
    pub time: i64,
    /// Chain height when the entry was accepted.
    pub entry_height: u32,
    /// True iff any input spends a coinbase or coinstake output.
    pub spends_coinbase: bool,
    /// Token name this entry reissues, if it carries a reissue output.
    pub reissued_token: Option<String>,

    // === package aggregates; an entry counts itself ===
    pub ancestor_count: u64,
    pub ancestor_size: i64,
    pub ancestor_fees: Amount,
    pub ancestor_sigops: i64,

    pub descendant_count: u64,
    pub descendant_size: i64,
    pub descendant_fees: Amount,

    // === graph links ===
    pub parents: HashSet<EntryId>,
    pub children: HashSet<EntryId>,

    // === cached index keys ===
    cached_ancestor_key: AncestorScoreKey,
    cached_descendant_key: DescendantScoreKey,
}

impl MempoolEntry {
    pub fn new(
        tx: Arc<Transaction>,
        fee: Amount,
        time: i64,
        entry_height: u32,
        spends_coinbase: bool,
        sigop_cost: i64,
        reissued_token: Option<String>,
    ) -> Self {
        let txid = tx.txid();
        let wtxid = tx.wtxid();
        let vsize = tx.vsize() as i64;
        MempoolEntry {
            tx,
            txid,
            wtxid,
            fee,
            modified_fee: fee,
            vsize,
            sigop_cost,
            time,
            entry_height,
            spends_coinbase,
            reissued_token,
            ancestor_count: 1,
            ancestor_size: vsize,
            ancestor_fees: fee,
            ancestor_sigops: sigop_cost,
            descendant_count: 1,
            descendant_size: vsize,
            descendant_fees: fee,
            parents: HashSet::new(),
            children: HashSet::new(),
            cached_ancestor_key: AncestorScoreKey {
                fees: 0,
                size: 1,
                txid,
            },
            cached_descendant_key: DescendantScoreKey {
                fees: 0,
                size: 1,
                time,
            },
        }
    }

    fn ancestor_key(&self) -> AncestorScoreKey {
        AncestorScoreKey {
            fees: self.ancestor_fees.to_sat(),
            size: self.ancestor_size,
            txid: self.txid,
        }
    }

    /// Eviction key: max of own and descendant feerate.
    fn descendant_key(&self) -> DescendantScoreKey {
        let own = (self.modified_fee.to_sat(), self.vsize);
        let desc = (self.descendant_fees.to_sat(), self.descendant_size);
        let own_wins =
            own.0 as i128 * desc.1 as i128 >= desc.0 as i128 * own.1 as i128;
        let (fees, size) = if own_wins { own } else { desc };
        DescendantScoreKey {
            fees,
            size,
            time: self.time,
        }
    }
}

/// Entry storage plus every secondary index.
#[derive(Default)]
pub struct MempoolArena {
    entries: SlotMap<DefaultKey, MempoolEntry>,

    by_txid: HashMap<Txid, EntryId>,
    by_wtxid: HashMap<Wtxid, EntryId>,

    /// Mining order: best ancestor-feerate package first.
    by_ancestor_score: BTreeSet<(AncestorScoreKey, EntryId)>,
    /// Eviction order: cheapest cluster first.
    by_descendant_score: BTreeSet<(DescendantScoreKey, EntryId)>,
    /// Expiry order: oldest first.
    by_entry_time: BTreeSet<(i64, EntryId)>,
}

impl MempoolArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, mut entry: MempoolEntry) -> EntryId {
        entry.cached_ancestor_key = entry.ancestor_key();
        entry.cached_descendant_key = entry.descendant_key();
        let anc_key = entry.cached_ancestor_key;
        let desc_key = entry.cached_descendant_key;
        let txid = entry.txid;
        let wtxid = entry.wtxid;
        let time = entry.time;

        let id = EntryId(self.entries.insert(entry));
        self.by_txid.insert(txid, id);
        self.by_wtxid.insert(wtxid, id);
        self.by_ancestor_score.insert((anc_key, id));
        self.by_descendant_score.insert((desc_key, id));
        self.by_entry_time.insert((time, id));
        id
    }

    pub fn remove(&mut self, id: EntryId) -> Option<MempoolEntry> {
        let entry = self.entries.remove(id.0)?;
        self.by_txid.remove(&entry.txid);
        self.by_wtxid.remove(&entry.wtxid);
        self.by_ancestor_score
            .remove(&(entry.cached_ancestor_key, id));
        self.by_descendant_score
            .remove(&(entry.cached_descendant_key, id));
        self.by_entry_time.remove(&(entry.time, id));
        Some(entry)
    }

    pub fn get(&self, id: EntryId) -> Option<&MempoolEntry> {
        self.entries.get(id.0)
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut MempoolEntry> {
        self.entries.get_mut(id.0)
    }

    pub fn by_txid(&self, txid: &Txid) -> Option<EntryId> {
        self.by_txid.get(txid).copied()
    }

    pub fn by_wtxid(&self, wtxid: &Wtxid) -> Option<EntryId> {
        self.by_wtxid.get(wtxid).copied()
    }

    /// Apply `mutate` to an entry and refresh its index keys.
    pub fn update_entry<F: FnOnce(&mut MempoolEntry)>(&mut self, id: EntryId, mutate: F) {
        let Some(entry) = self.entries.get(id.0) else {
            return;
        };
        let old_anc = entry.cached_ancestor_key;
        let old_desc = entry.cached_descendant_key;
        self.by_ancestor_score.remove(&(old_anc, id));
        self.by_descendant_score.remove(&(old_desc, id));

        let entry = self
            .entries
            .get_mut(id.0)
            .expect("entry exists; checked above");
        mutate(entry);
        entry.cached_ancestor_key = entry.ancestor_key();
        entry.cached_descendant_key = entry.descendant_key();
        let new_anc = entry.cached_ancestor_key;
        let new_desc = entry.cached_descendant_key;

        self.by_ancestor_score.insert((new_anc, id));
        self.by_descendant_score.insert((new_desc, id));
    }

    /// Mining order: best ancestor-feerate package first.
    pub fn iter_by_ancestor_score(
        &self,
    ) -> impl Iterator<Item = (EntryId, &MempoolEntry)> + '_ {
        self.by_ancestor_score
            .iter()
            .map(|(_, id)| (*id, &self.entries[id.0]))
    }

    /// Eviction order: cheapest cluster first.
    pub fn iter_by_descendant_score(
        &self,
    ) -> impl Iterator<Item = (EntryId, &MempoolEntry)> + '_ {
        self.by_descendant_score
            .iter()
            .map(|(_, id)| (*id, &self.entries[id.0]))
    }

    /// Oldest entries first.
    pub fn iter_by_entry_time(&self) -> impl Iterator<Item = (EntryId, &MempoolEntry)> + '_ {
        self.by_entry_time
            .iter()
            .map(|(_, id)| (*id, &self.entries[id.0]))
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &MempoolEntry)> + '_ {
        self.entries.iter().map(|(key, entry)| (EntryId(key), entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(fees: i64, size: i64, tag: u8) -> AncestorScoreKey {
        AncestorScoreKey {
            fees,
            size,
            txid: Txid::from_byte_array([tag; 32]),
        }
    }

    #[test]
    fn higher_feerate_sorts_first() {
        let fast = key(2000, 100, 1);
        let slow = key(1000, 100, 2);
        assert!(fast < slow);
    }

    #[test]
    fn feerate_tie_breaks_to_higher_fee_then_smaller_size() {
        // Same rate 10 sat/vb.
        let big = key(2000, 200, 1);
        let small = key(1000, 100, 2);
        assert!(big < small);

        // Same rate and fee impossible with different sizes, so same
        // everything but txid: lexicographic txid decides.
        let a = key(1000, 100, 1);
        let b = key(1000, 100, 2);
        assert!(a < b);
    }

    #[test]
    fn cross_multiplication_has_no_rounding() {
        // 667/100 vs 666/100: the integer-division rates collide at 6 but
        // cross-multiplication keeps them apart.
        let slightly_better = key(667, 100, 1);
        let slightly_worse = key(666, 100, 2);
        assert!(slightly_better < slightly_worse);
    }
}
