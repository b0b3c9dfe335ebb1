//! Block-template assembly: ancestor-feerate package selection under the
//! block weight and sigop budgets.
//!
//! Entries are not removed from the pool as they are selected, so the
//! ancestor aggregates of not-yet-chosen descendants go stale the moment an
//! ancestor enters the block. Those entries move into a modified set
//! carrying reduced aggregates, and every round compares the best modified
//! package against the next entry in the pool's ancestor-score order.

use crate::error::AssembleError;
use lumen_consensus::{
    get_block_subsidy, is_final_tx, next_target_required, ChainEntry, ChainParams, ChainView,
    DEFAULT_BLOCK_MIN_TX_FEE, MAX_BLOCK_SIGOPS_COST, MAX_BLOCK_WEIGHT,
};
use lumen_mempool::{AncestorLimits, AncestorScoreKey, EntryId, FeeRate, MempoolInner};
use lumen_primitives::transaction::WITNESS_SCALE_FACTOR;
use lumen_primitives::{
    merkle_root, Amount, Block, BlockHash, Header, Script, Transaction, TxIn, TxOut,
};
use lumen_primitives::transaction::OutPoint;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Weight reserved for the coinbase transaction.
const COINBASE_WEIGHT_RESERVE: usize = 4000;

/// Sigops reserved for the coinbase transaction.
const COINBASE_SIGOPS_RESERVE: i64 = 400;

/// Failed package attempts tolerated near a full block before giving up.
const MAX_CONSECUTIVE_FAILURES: u32 = 1000;

#[derive(Debug, Clone)]
pub struct AssemblerOptions {
    pub max_weight: usize,
    pub block_min_fee_rate: FeeRate,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        AssemblerOptions {
            max_weight: MAX_BLOCK_WEIGHT - 4000,
            block_min_fee_rate: FeeRate::from_sat_per_kvb(DEFAULT_BLOCK_MIN_TX_FEE),
        }
    }
}

/// The assembled template: the block plus per-transaction bookkeeping.
/// The fee slot of the coinbase holds the negated total, as callers use it
/// to recompute the reward.
#[derive(Debug)]
pub struct BlockTemplate {
    pub block: Block,
    pub tx_fees: Vec<Amount>,
    pub tx_sigops: Vec<i64>,
    pub total_fees: Amount,
    pub height: u32,
}

pub struct BlockAssembler {
    params: ChainParams,
    max_weight: usize,
    block_min_fee_rate: FeeRate,
}

/// Reduced aggregates of an entry whose ancestors are partly in the block.
#[derive(Debug, Clone, Copy)]
struct ModifiedState {
    size: i64,
    fees: i64,
    sigops: i64,
    txid: lumen_primitives::Txid,
}

impl ModifiedState {
    fn key(&self) -> AncestorScoreKey {
        AncestorScoreKey {
            fees: self.fees,
            size: self.size,
            txid: self.txid,
        }
    }
}

struct Selection {
    in_block: HashSet<EntryId>,
    failed: HashSet<EntryId>,
    modified_order: BTreeSet<(AncestorScoreKey, EntryId)>,
    modified: HashMap<EntryId, ModifiedState>,
    txs: Vec<Transaction>,
    tx_fees: Vec<Amount>,
    tx_sigops: Vec<i64>,
    block_weight: usize,
    block_sigops: i64,
    fees: Amount,
}

impl BlockAssembler {
    pub fn new(params: ChainParams, options: AssemblerOptions) -> Self {
        // Clamp to sane bounds either side.
        let max_weight = options
            .max_weight
            .clamp(4000, MAX_BLOCK_WEIGHT - 4000);
        BlockAssembler {
            params,
            max_weight,
            block_min_fee_rate: options.block_min_fee_rate,
        }
    }

    /// Build a template on top of `tip`. For proof-of-stake the coinbase is
    /// empty and a placeholder coinstake sits at index 1 for the staker to
    /// fill and sign.
    pub fn create_new_block<C: ChainView>(
        &self,
        chain: &C,
        tip: Option<ChainEntry>,
        mempool: &MempoolInner,
        script_pub_key: Script,
        proof_of_stake: bool,
        now: u32,
    ) -> Result<BlockTemplate, AssembleError> {
        let height = tip.map(|t| t.height + 1).unwrap_or(0);
        let prev_blockhash = tip.map(|t| t.hash).unwrap_or_else(BlockHash::all_zeros);

        let mut block_time = std::cmp::max(
            now,
            tip.map(|t| t.time.saturating_add(1)).unwrap_or(0),
        );
        if proof_of_stake {
            block_time &= !self.params.stake_timestamp_mask;
        }
        let lock_time_cutoff = i64::from(block_time);

        let mut selection = Selection {
            in_block: HashSet::new(),
            failed: HashSet::new(),
            modified_order: BTreeSet::new(),
            modified: HashMap::new(),
            txs: Vec::new(),
            tx_fees: Vec::new(),
            tx_sigops: Vec::new(),
            block_weight: COINBASE_WEIGHT_RESERVE,
            block_sigops: COINBASE_SIGOPS_RESERVE,
            fees: Amount::ZERO,
        };

        let (packages, descendants_updated) =
            self.add_package_txs(mempool, &mut selection, height, lock_time_cutoff)?;
        tracing::debug!(
            height,
            packages,
            descendants_updated,
            weight = selection.block_weight,
            fees = %selection.fees,
            "assembled transaction set"
        );

        // Coinbase pays fees plus subsidy; empty for proof-of-stake.
        let mut coinbase = Transaction {
            time: block_time,
            ..Transaction::default()
        };
        let mut coinbase_input = TxIn::new(OutPoint::null());
        coinbase_input.script_sig.push_int(i64::from(height));
        coinbase.inputs.push(coinbase_input);
        if proof_of_stake {
            coinbase.outputs.push(TxOut::empty());
        } else {
            let reward = selection
                .fees
                .checked_add(get_block_subsidy(height, &self.params))
                .ok_or(AssembleError::RewardOverflow)?;
            coinbase
                .outputs
                .push(TxOut::new(reward, script_pub_key.clone()));
        }

        let coinbase_sigops =
            (WITNESS_SCALE_FACTOR * coinbase.legacy_sigop_count()) as i64;

        let mut transactions = vec![coinbase];
        if proof_of_stake {
            // Placeholder coinstake for the staker to fill in.
            let mut coinstake = Transaction {
                time: block_time,
                ..Transaction::default()
            };
            coinstake.outputs.push(TxOut::empty());
            coinstake.outputs.push(TxOut::new(Amount::ZERO, script_pub_key));
            transactions.push(coinstake);
        }
        transactions.append(&mut selection.txs);

        let bits = next_target_required(chain, tip, proof_of_stake, &self.params);
        let merkle = merkle_root(
            &transactions
                .iter()
                .map(Transaction::txid)
                .collect::<Vec<_>>(),
        );

        let block = Block {
            header: Header {
                version: 1,
                prev_blockhash,
                merkle_root: merkle,
                time: block_time,
                bits,
                nonce: 0,
            },
            transactions,
            signature: Vec::new(),
        };

        let mut tx_fees = vec![Amount::from_sat(-selection.fees.to_sat())];
        tx_fees.append(&mut selection.tx_fees);
        let mut tx_sigops = vec![coinbase_sigops];
        tx_sigops.append(&mut selection.tx_sigops);

        Ok(BlockTemplate {
            block,
            tx_fees,
            tx_sigops,
            total_fees: selection.fees,
            height,
        })
    }

    /// The selection loop. Returns (packages selected, descendant updates).
    fn add_package_txs(
        &self,
        mempool: &MempoolInner,
        selection: &mut Selection,
        height: u32,
        lock_time_cutoff: i64,
    ) -> Result<(usize, usize), AssembleError> {
        let mut packages_selected = 0;
        let mut descendants_updated = 0;
        let mut consecutive_failures: u32 = 0;

        let pool_order: Vec<EntryId> = mempool
            .iter_by_ancestor_score()
            .map(|(id, _)| id)
            .collect();
        let mut cursor = 0usize;

        loop {
            // Skip pool entries already handled one way or another.
            while cursor < pool_order.len() {
                let id = pool_order[cursor];
                if selection.in_block.contains(&id)
                    || selection.failed.contains(&id)
                    || selection.modified.contains_key(&id)
                {
                    cursor += 1;
                } else {
                    break;
                }
            }

            let pool_candidate = pool_order.get(cursor).copied();
            let modified_candidate = selection.modified_order.iter().next().copied();

            // Pick whichever package scores better.
            let (id, using_modified) = match (pool_candidate, modified_candidate) {
                (None, None) => break,
                (Some(pool_id), None) => {
                    cursor += 1;
                    (pool_id, false)
                }
                (None, Some((_, mod_id))) => (mod_id, true),
                (Some(pool_id), Some((mod_key, mod_id))) => {
                    let entry = mempool.entry(pool_id).ok_or(AssembleError::StaleEntry)?;
                    let pool_key = AncestorScoreKey {
                        fees: entry.ancestor_fees.to_sat(),
                        size: entry.ancestor_size,
                        txid: entry.txid,
                    };
                    if mod_key < pool_key {
                        (mod_id, true)
                    } else {
                        cursor += 1;
                        (pool_id, false)
                    }
                }
            };

            assert!(
                !selection.in_block.contains(&id),
                "selected entry is already in the block"
            );

            let entry = mempool.entry(id).ok_or(AssembleError::StaleEntry)?;
            let (package_size, package_fees, package_sigops) = match selection.modified.get(&id)
            {
                Some(state) => (state.size, state.fees, state.sigops),
                None => (
                    entry.ancestor_size,
                    entry.ancestor_fees.to_sat(),
                    entry.ancestor_sigops,
                ),
            };

            // Everything after this point scores lower still.
            if package_fees < self.block_min_fee_rate.fee_for(package_size).to_sat() {
                break;
            }

            if !self.test_package(selection, package_size, package_sigops) {
                if using_modified {
                    // Drop it so the next best modified package surfaces.
                    self.erase_modified(selection, id);
                    selection.failed.insert(id);
                }
                consecutive_failures += 1;
                if consecutive_failures > MAX_CONSECUTIVE_FAILURES
                    && selection.block_weight > self.max_weight - 4000
                {
                    // Close enough to full; stop burning cycles.
                    break;
                }
                continue;
            }

            // Materialize the package: unconfirmed ancestors plus the entry.
            let ancestors = mempool
                .calculate_ancestors(&entry.parents, entry.vsize, AncestorLimits::unlimited())
                .map_err(|_| AssembleError::StaleEntry)?;
            let mut package: Vec<EntryId> = ancestors
                .into_iter()
                .filter(|ancestor| !selection.in_block.contains(ancestor))
                .collect();
            package.push(id);

            if !self.package_is_final(mempool, &package, height, lock_time_cutoff)? {
                if using_modified {
                    self.erase_modified(selection, id);
                    selection.failed.insert(id);
                }
                continue;
            }

            consecutive_failures = 0;

            // Ancestors first: a dependency always has the smaller
            // ancestor count.
            package.sort_by_key(|&member| {
                mempool
                    .entry(member)
                    .map(|e| e.ancestor_count)
                    .unwrap_or(u64::MAX)
            });

            for &member in &package {
                self.add_to_block(mempool, selection, member)?;
                self.erase_modified(selection, member);
            }
            packages_selected += 1;

            descendants_updated += self.update_packages_for_added(mempool, selection, &package);
        }

        Ok((packages_selected, descendants_updated))
    }

    fn test_package(&self, selection: &Selection, package_size: i64, package_sigops: i64) -> bool {
        if selection.block_weight + WITNESS_SCALE_FACTOR * package_size as usize
            >= self.max_weight
        {
            return false;
        }
        if selection.block_sigops + package_sigops >= MAX_BLOCK_SIGOPS_COST {
            return false;
        }
        true
    }

    fn package_is_final(
        &self,
        mempool: &MempoolInner,
        package: &[EntryId],
        height: u32,
        lock_time_cutoff: i64,
    ) -> Result<bool, AssembleError> {
        for &member in package {
            let entry = mempool.entry(member).ok_or(AssembleError::StaleEntry)?;
            if !is_final_tx(&entry.tx, height, lock_time_cutoff) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn add_to_block(
        &self,
        mempool: &MempoolInner,
        selection: &mut Selection,
        id: EntryId,
    ) -> Result<(), AssembleError> {
        let entry = mempool.entry(id).ok_or(AssembleError::StaleEntry)?;
        selection.txs.push((*entry.tx).clone());
        selection.tx_fees.push(entry.fee);
        selection.tx_sigops.push(entry.sigop_cost);
        selection.block_weight += WITNESS_SCALE_FACTOR * entry.vsize as usize;
        selection.block_sigops += entry.sigop_cost;
        selection.fees = selection
            .fees
            .checked_add(entry.fee)
            .ok_or(AssembleError::RewardOverflow)?;
        selection.in_block.insert(id);
        Ok(())
    }

    /// Push the in-pool descendants of newly added entries into the
    /// modified set, shrinking their aggregates by what is now in-block.
    fn update_packages_for_added(
        &self,
        mempool: &MempoolInner,
        selection: &mut Selection,
        added: &[EntryId],
    ) -> usize {
        let mut updated = 0;
        for &added_id in added {
            let Some(added_entry) = mempool.entry(added_id) else {
                continue;
            };
            let added_size = added_entry.vsize;
            let added_fees = added_entry.modified_fee.to_sat();
            let added_sigops = added_entry.sigop_cost;

            let mut descendants = HashSet::new();
            mempool.calculate_descendants(added_id, &mut descendants);
            for desc_id in descendants {
                if desc_id == added_id || selection.in_block.contains(&desc_id) {
                    continue;
                }
                updated += 1;
                let Some(desc) = mempool.entry(desc_id) else {
                    continue;
                };
                let state = match selection.modified.get(&desc_id).copied() {
                    Some(mut state) => {
                        self.erase_modified(selection, desc_id);
                        state.size -= added_size;
                        state.fees -= added_fees;
                        state.sigops -= added_sigops;
                        state
                    }
                    None => ModifiedState {
                        size: desc.ancestor_size - added_size,
                        fees: desc.ancestor_fees.to_sat() - added_fees,
                        sigops: desc.ancestor_sigops - added_sigops,
                        txid: desc.txid,
                    },
                };
                selection.modified_order.insert((state.key(), desc_id));
                selection.modified.insert(desc_id, state);
            }
        }
        updated
    }

    fn erase_modified(&self, selection: &mut Selection, id: EntryId) {
        if let Some(state) = selection.modified.remove(&id) {
            selection.modified_order.remove(&(state.key(), id));
        }
    }
}
