//! The transaction memory pool: candidate transactions indexed by txid,
//! spent outpoint, and package feerate, with ancestor/descendant aggregates
//! kept live as entries come and go.

pub mod arena;
pub mod options;
pub mod types;

pub use self::arena::{AncestorScoreKey, MempoolArena, MempoolEntry};
pub use self::options::{MempoolLimits, MempoolOptions};
pub use self::types::{
    AncestorLimits, EntryId, EntrySnapshot, FeeRate, MempoolError, RemovalReason,
};

use lumen_primitives::script::TokenScriptOp;
use lumen_primitives::{Amount, OutPoint, Transaction, Txid};
use lumen_tokens::token_output_from_script;
use lumen_primitives::AddressPrefixes;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Pool state behind the lock.
pub struct MempoolInner {
    pub(crate) arena: MempoolArena,

    /// Outpoint -> txid spending it, for conflict detection.
    map_next_tx: HashMap<OutPoint, Txid>,

    /// Token name -> txid of the pending reissue. At most one reissue per
    /// token is accepted at a time.
    reissued_tokens: HashMap<String, Txid>,

    /// Prioritisation deltas applied to entries as they arrive.
    map_deltas: HashMap<Txid, Amount>,

    total_vsize: u64,
    total_fee: Amount,

    prefixes: AddressPrefixes,
}

impl MempoolInner {
    fn new(prefixes: AddressPrefixes) -> Self {
        MempoolInner {
            arena: MempoolArena::new(),
            map_next_tx: HashMap::new(),
            reissued_tokens: HashMap::new(),
            map_deltas: HashMap::new(),
            total_vsize: 0,
            total_fee: Amount::ZERO,
            prefixes,
        }
    }

    // === read API ===

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn total_vsize(&self) -> u64 {
        self.total_vsize
    }

    pub fn total_fee(&self) -> Amount {
        self.total_fee
    }

    pub fn contains(&self, txid: &Txid) -> bool {
        self.arena.by_txid(txid).is_some()
    }

    pub fn entry(&self, id: EntryId) -> Option<&MempoolEntry> {
        self.arena.get(id)
    }

    pub fn entry_by_txid(&self, txid: &Txid) -> Option<&MempoolEntry> {
        self.arena.by_txid(txid).and_then(|id| self.arena.get(id))
    }

    pub fn get_tx(&self, txid: &Txid) -> Option<Arc<Transaction>> {
        self.entry_by_txid(txid).map(|entry| entry.tx.clone())
    }

    /// Which in-pool transaction spends `outpoint`, if any.
    pub fn conflicting_tx(&self, outpoint: &OutPoint) -> Option<Txid> {
        self.map_next_tx.get(outpoint).copied()
    }

    /// Pending reissue for a token name, if any.
    pub fn pending_reissue(&self, name: &str) -> Option<Txid> {
        self.reissued_tokens.get(name).copied()
    }

    /// The ordered ancestor-score view the assembler consumes.
    pub fn iter_by_ancestor_score(
        &self,
    ) -> impl Iterator<Item = (EntryId, &MempoolEntry)> + '_ {
        self.arena.iter_by_ancestor_score()
    }

    /// The entry's closure under the children relation, itself included.
    pub fn calculate_descendants(&self, id: EntryId, out: &mut HashSet<EntryId>) {
        if !out.insert(id) {
            return;
        }
        if let Some(entry) = self.arena.get(id) {
            for &child in &entry.children {
                self.calculate_descendants(child, out);
            }
        }
    }

    /// Walk in-pool ancestors of the given parent set under `limits`. The
    /// returned set excludes the would-be entry itself.
    pub fn calculate_ancestors(
        &self,
        parents: &HashSet<EntryId>,
        entry_vsize: i64,
        limits: AncestorLimits,
    ) -> Result<HashSet<EntryId>, MempoolError> {
        let mut ancestors: HashSet<EntryId> = HashSet::new();
        let mut queue: Vec<EntryId> = parents.iter().copied().collect();
        let mut total_size = entry_vsize;

        while let Some(id) = queue.pop() {
            if !ancestors.insert(id) {
                continue;
            }
            let entry = self.arena.get(id).ok_or(MempoolError::MissingEntry)?;
            total_size += entry.vsize;

            if ancestors.len() + 1 > limits.max_ancestors {
                return Err(MempoolError::TooManyAncestors(ancestors.len() + 1));
            }
            if total_size > limits.max_ancestor_size {
                return Err(MempoolError::AncestorSizeTooLarge(total_size));
            }
            // The new entry becomes a descendant of every ancestor.
            if entry.descendant_count as usize + 1 > limits.max_descendants {
                return Err(MempoolError::TooManyDescendants(
                    entry.descendant_count as usize + 1,
                ));
            }
            if entry.descendant_size + entry_vsize > limits.max_descendant_size {
                return Err(MempoolError::DescendantSizeTooLarge(
                    entry.descendant_size + entry_vsize,
                ));
            }

            for &parent in &entry.parents {
                queue.push(parent);
            }
        }
        Ok(ancestors)
    }

    // === mutation ===

    /// Insert a transaction already validated for standardness and input
    /// availability.
    pub fn add(
        &mut self,
        tx: Transaction,
        fee: Amount,
        time: i64,
        entry_height: u32,
        spends_coinbase: bool,
        sigop_cost: i64,
        limits: AncestorLimits,
    ) -> Result<EntryId, MempoolError> {
        if tx.is_coinbase() {
            return Err(MempoolError::Coinbase);
        }
        let txid = tx.txid();
        if self.contains(&txid) {
            return Err(MempoolError::Duplicate);
        }

        // One pending reissue per token name.
        let reissued_token = self.reissued_token_of(&tx);
        if let Some(name) = &reissued_token {
            if self.reissued_tokens.contains_key(name) {
                return Err(MempoolError::ReissueConflict(name.clone()));
            }
        }

        let mut parents = HashSet::new();
        for input in &tx.inputs {
            if let Some(parent) = self.arena.by_txid(&input.prevout.txid) {
                parents.insert(parent);
            }
        }

        let tx = Arc::new(tx);
        let mut entry = MempoolEntry::new(
            tx.clone(),
            fee,
            time,
            entry_height,
            spends_coinbase,
            sigop_cost,
            reissued_token.clone(),
        );
        if let Some(delta) = self.map_deltas.get(&txid) {
            entry.modified_fee = entry
                .modified_fee
                .checked_add(*delta)
                .ok_or(MempoolError::FeeOverflow)?;
            entry.ancestor_fees = entry.modified_fee;
            entry.descendant_fees = entry.modified_fee;
        }

        let ancestors = self.calculate_ancestors(&parents, entry.vsize, limits)?;

        // Seed the new entry's ancestor aggregates.
        for &ancestor_id in &ancestors {
            let ancestor = self
                .arena
                .get(ancestor_id)
                .expect("ancestor walk returned live entries");
            entry.ancestor_count += 1;
            entry.ancestor_size += ancestor.vsize;
            entry.ancestor_fees = entry
                .ancestor_fees
                .checked_add(ancestor.modified_fee)
                .ok_or(MempoolError::FeeOverflow)?;
            entry.ancestor_sigops += ancestor.sigop_cost;
        }
        entry.parents = parents.clone();

        let vsize = entry.vsize;
        let modified_fee = entry.modified_fee;
        let id = self.arena.insert(entry);

        for &parent in &parents {
            if let Some(parent_entry) = self.arena.get_mut(parent) {
                parent_entry.children.insert(id);
            }
        }

        // Every ancestor gains a descendant.
        for &ancestor_id in &ancestors {
            self.arena.update_entry(ancestor_id, |ancestor| {
                ancestor.descendant_count += 1;
                ancestor.descendant_size += vsize;
                ancestor.descendant_fees = Amount::from_sat(
                    ancestor.descendant_fees.to_sat() + modified_fee.to_sat(),
                );
            });
        }

        for input in &tx.inputs {
            self.map_next_tx.insert(input.prevout, txid);
        }
        if let Some(name) = reissued_token {
            self.reissued_tokens.insert(name, txid);
        }

        self.total_vsize += vsize as u64;
        self.total_fee = self
            .total_fee
            .checked_add(fee)
            .ok_or(MempoolError::FeeOverflow)?;

        tracing::debug!(%txid, vsize, fee = %fee, "accepted transaction");
        Ok(id)
    }

    /// Remove one entry, keeping every aggregate consistent for survivors.
    pub fn remove(&mut self, txid: &Txid, reason: RemovalReason) -> Result<(), MempoolError> {
        let id = self.arena.by_txid(txid).ok_or(MempoolError::MissingEntry)?;
        let mut set = HashSet::new();
        set.insert(id);
        self.remove_staged(&set, reason);
        Ok(())
    }

    /// Remove a transaction and all of its in-pool descendants.
    pub fn remove_recursive(&mut self, txid: &Txid, reason: RemovalReason) {
        let Some(id) = self.arena.by_txid(txid) else {
            return;
        };
        let mut set = HashSet::new();
        self.calculate_descendants(id, &mut set);
        self.remove_staged(&set, reason);
    }

    /// Remove the transactions of a connected block. Surviving descendants
    /// see their ancestor aggregates shrink.
    pub fn remove_for_block(&mut self, txs: &[Transaction]) {
        let mut set = HashSet::new();
        for tx in txs {
            if let Some(id) = self.arena.by_txid(&tx.txid()) {
                set.insert(id);
            }
            // Entries conflicting with in-block spends are gone either way.
            for input in &tx.inputs {
                if let Some(conflict) = self.map_next_tx.get(&input.prevout).copied() {
                    if conflict != tx.txid() {
                        if let Some(conflict_id) = self.arena.by_txid(&conflict) {
                            self.calculate_descendants(conflict_id, &mut set);
                        }
                    }
                }
            }
        }
        self.remove_staged(&set, RemovalReason::Block);
    }

    fn remove_staged(&mut self, to_remove: &HashSet<EntryId>, reason: RemovalReason) {
        for &id in to_remove {
            let Some(entry) = self.arena.get(id) else {
                continue;
            };
            let vsize = entry.vsize;
            let modified_fee = entry.modified_fee.to_sat();
            let sigop_cost = entry.sigop_cost;

            // Surviving descendants lose this entry from their ancestor
            // aggregates.
            let mut descendants = HashSet::new();
            self.calculate_descendants(id, &mut descendants);
            for desc_id in descendants {
                if desc_id == id || to_remove.contains(&desc_id) {
                    continue;
                }
                self.arena.update_entry(desc_id, |desc| {
                    desc.ancestor_count -= 1;
                    desc.ancestor_size -= vsize;
                    desc.ancestor_fees =
                        Amount::from_sat(desc.ancestor_fees.to_sat() - modified_fee);
                    desc.ancestor_sigops -= sigop_cost;
                });
            }

            // Surviving ancestors lose a descendant.
            let mut ancestors = HashSet::new();
            let entry = self.arena.get(id).expect("entry is live");
            let parents: HashSet<EntryId> = entry.parents.clone();
            for &parent in &parents {
                self.collect_ancestors_unbounded(parent, &mut ancestors);
            }
            for anc_id in ancestors {
                if to_remove.contains(&anc_id) {
                    continue;
                }
                self.arena.update_entry(anc_id, |anc| {
                    anc.descendant_count -= 1;
                    anc.descendant_size -= vsize;
                    anc.descendant_fees =
                        Amount::from_sat(anc.descendant_fees.to_sat() - modified_fee);
                });
            }
        }

        // Unlink and drop.
        for &id in to_remove {
            let Some(entry) = self.arena.get(id) else {
                continue;
            };
            let parents: Vec<EntryId> = entry.parents.iter().copied().collect();
            let children: Vec<EntryId> = entry.children.iter().copied().collect();
            for parent in parents {
                if let Some(parent_entry) = self.arena.get_mut(parent) {
                    parent_entry.children.remove(&id);
                }
            }
            for child in children {
                if let Some(child_entry) = self.arena.get_mut(child) {
                    child_entry.parents.remove(&id);
                }
            }

            let entry = self.arena.remove(id).expect("entry is live");
            for input in &entry.tx.inputs {
                self.map_next_tx.remove(&input.prevout);
            }
            if let Some(name) = &entry.reissued_token {
                self.reissued_tokens.remove(name);
            }
            self.total_vsize -= entry.vsize as u64;
            self.total_fee = Amount::from_sat(
                self.total_fee.to_sat().saturating_sub(entry.fee.to_sat()),
            );
            tracing::debug!(txid = %entry.txid, reason = reason.as_str(), "removed transaction");
        }
    }

    fn collect_ancestors_unbounded(&self, id: EntryId, out: &mut HashSet<EntryId>) {
        if !out.insert(id) {
            return;
        }
        if let Some(entry) = self.arena.get(id) {
            for &parent in &entry.parents {
                self.collect_ancestors_unbounded(parent, out);
            }
        }
    }

    /// Adjust an entry's modified fee; the delta also lands on ancestors'
    /// descendant fees and descendants' ancestor fees. Deltas for unknown
    /// txids are remembered and applied on arrival.
    pub fn prioritise_transaction(&mut self, txid: &Txid, delta: Amount) {
        let accumulated = self
            .map_deltas
            .entry(*txid)
            .or_insert(Amount::ZERO);
        *accumulated = Amount::from_sat(accumulated.to_sat() + delta.to_sat());

        let Some(id) = self.arena.by_txid(txid) else {
            return;
        };

        self.arena.update_entry(id, |entry| {
            entry.modified_fee = Amount::from_sat(entry.modified_fee.to_sat() + delta.to_sat());
            entry.ancestor_fees = Amount::from_sat(entry.ancestor_fees.to_sat() + delta.to_sat());
            entry.descendant_fees =
                Amount::from_sat(entry.descendant_fees.to_sat() + delta.to_sat());
        });

        let mut descendants = HashSet::new();
        self.calculate_descendants(id, &mut descendants);
        for desc_id in descendants {
            if desc_id == id {
                continue;
            }
            self.arena.update_entry(desc_id, |desc| {
                desc.ancestor_fees =
                    Amount::from_sat(desc.ancestor_fees.to_sat() + delta.to_sat());
            });
        }

        let mut ancestors = HashSet::new();
        self.collect_ancestors_unbounded(id, &mut ancestors);
        for anc_id in ancestors {
            if anc_id == id {
                continue;
            }
            self.arena.update_entry(anc_id, |anc| {
                anc.descendant_fees =
                    Amount::from_sat(anc.descendant_fees.to_sat() + delta.to_sat());
            });
        }
    }

    /// Drop entries older than `cutoff_time`, with their descendants.
    pub fn expire(&mut self, cutoff_time: i64) -> usize {
        let mut stale = Vec::new();
        for (id, entry) in self.arena.iter_by_entry_time() {
            if entry.time < cutoff_time {
                stale.push(id);
            } else {
                break;
            }
        }
        let mut set = HashSet::new();
        for id in stale {
            self.calculate_descendants(id, &mut set);
        }
        let removed = set.len();
        if removed > 0 {
            self.remove_staged(&set, RemovalReason::Expiry);
        }
        removed
    }

    /// Evict the cheapest clusters until the pool fits `max_vsize`.
    pub fn trim_to_size(&mut self, max_vsize: u64) -> usize {
        let mut removed = 0;
        while self.total_vsize > max_vsize {
            let Some((victim, _)) = self.arena.iter_by_descendant_score().next() else {
                break;
            };
            let mut set = HashSet::new();
            self.calculate_descendants(victim, &mut set);
            removed += set.len();
            self.remove_staged(&set, RemovalReason::SizeLimit);
        }
        removed
    }

    /// Entries in acceptance-time order, for persisting across restarts.
    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        self.arena
            .iter_by_entry_time()
            .map(|(_, entry)| EntrySnapshot {
                tx: (*entry.tx).clone(),
                fee: entry.fee,
                time: entry.time,
                entry_height: entry.entry_height,
            })
            .collect()
    }

    fn reissued_token_of(&self, tx: &Transaction) -> Option<String> {
        for output in &tx.outputs {
            if let Ok(Some(token_output)) =
                token_output_from_script(&output.script_pubkey, self.prefixes)
            {
                if token_output.op == TokenScriptOp::Reissue {
                    return Some(token_output.name);
                }
            }
        }
        None
    }
}

/// The shared pool: one committed view per operation, writers exclusive.
pub struct Mempool {
    inner: RwLock<MempoolInner>,
    options: MempoolOptions,
}

impl Mempool {
    pub fn new(options: MempoolOptions, prefixes: AddressPrefixes) -> Self {
        Mempool {
            inner: RwLock::new(MempoolInner::new(prefixes)),
            options,
        }
    }

    pub fn options(&self) -> &MempoolOptions {
        &self.options
    }

    /// A consistent read view, held for the duration of a template build.
    pub fn read(&self) -> RwLockReadGuard<'_, MempoolInner> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, MempoolInner> {
        self.inner.write()
    }

    /// Accept a validated transaction under the configured limits.
    pub fn add(
        &self,
        tx: Transaction,
        fee: Amount,
        time: i64,
        entry_height: u32,
        spends_coinbase: bool,
        sigop_cost: i64,
    ) -> Result<EntryId, MempoolError> {
        self.inner.write().add(
            tx,
            fee,
            time,
            entry_height,
            spends_coinbase,
            sigop_cost,
            self.options.limits.as_ancestor_limits(),
        )
    }

    pub fn remove(&self, txid: &Txid, reason: RemovalReason) -> Result<(), MempoolError> {
        self.inner.write().remove(txid, reason)
    }

    pub fn remove_recursive(&self, txid: &Txid, reason: RemovalReason) {
        self.inner.write().remove_recursive(txid, reason)
    }

    pub fn remove_for_block(&self, txs: &[Transaction]) {
        self.inner.write().remove_for_block(txs)
    }

    /// Re-accept persisted entries, oldest first so dependency order is
    /// preserved. Entries that no longer fit are dropped.
    pub fn load(&self, snapshots: Vec<EntrySnapshot>) -> usize {
        let mut accepted = 0;
        let mut inner = self.inner.write();
        for snapshot in snapshots {
            let sigop_cost =
                (lumen_primitives::WITNESS_SCALE_FACTOR * snapshot.tx.legacy_sigop_count()) as i64;
            if inner
                .add(
                    snapshot.tx,
                    snapshot.fee,
                    snapshot.time,
                    snapshot.entry_height,
                    false,
                    sigop_cost,
                    self.options.limits.as_ancestor_limits(),
                )
                .is_ok()
            {
                accepted += 1;
            }
        }
        accepted
    }

    pub fn contains(&self, txid: &Txid) -> bool {
        self.inner.read().contains(txid)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests;
