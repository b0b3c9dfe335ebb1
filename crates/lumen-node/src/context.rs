//! The node context: every subsystem behind one handle, with the global
//! lock order (chain first, then mempool) encoded in the connect and
//! disconnect drivers.

use crate::apply::{
    apply_governance_actions, apply_token_tx, collect_governance_actions,
    revert_governance_actions, revert_token_tx, UtxoProvider,
};
use crate::chain::Chain;
use crate::error::NodeError;
use lumen_consensus::{check_proof_of_work, next_target_required, ChainParams};
use lumen_governance::GovernanceStore;
use lumen_mempool::{Mempool, MempoolOptions};
use lumen_primitives::Block;
use lumen_tokens::{TokensCache, TokensDb};
use parking_lot::{Mutex, RwLock};
use std::path::Path;

pub struct Context {
    params: ChainParams,
    /// The chain lock; acquire before the mempool lock, release after.
    chain: RwLock<Chain>,
    mempool: Mempool,
    tokens_db: TokensDb,
    tokens: Mutex<TokensCache>,
    governance: GovernanceStore,
}

impl Context {
    /// Open the databases under `data_dir` and seed governance state.
    pub fn open(data_dir: &Path, params: ChainParams) -> Result<Self, NodeError> {
        let tokens_db = TokensDb::open(&data_dir.join("tokens"))?;
        let governance = GovernanceStore::open(&data_dir.join("governance"))?;
        governance.init(&params)?;

        tracing::info!(data_dir = %data_dir.display(), "opened node context");
        Ok(Context {
            mempool: Mempool::new(MempoolOptions::default(), params.address_prefixes),
            tokens: Mutex::new(TokensCache::new(params.address_prefixes)),
            chain: RwLock::new(Chain::new()),
            tokens_db,
            governance,
            params,
        })
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn governance(&self) -> &GovernanceStore {
        &self.governance
    }

    pub fn tokens_db(&self) -> &TokensDb {
        &self.tokens_db
    }

    pub fn with_tokens<T>(&self, f: impl FnOnce(&mut TokensCache, &TokensDb) -> T) -> T {
        let mut cache = self.tokens.lock();
        f(&mut cache, &self.tokens_db)
    }

    pub fn chain(&self) -> &RwLock<Chain> {
        &self.chain
    }

    /// Connect a block at the tip: consensus gate, token and governance
    /// deltas (one batch each), then mempool cleanup.
    pub fn connect_block<U: UtxoProvider>(
        &self,
        block: &Block,
        utxos: &U,
    ) -> Result<(), NodeError> {
        let mut chain = self.chain.write();

        let proof_of_stake = block.is_proof_of_stake();
        let tip = chain.tip_entry();
        let height = tip.map(|t| t.height + 1).unwrap_or(0);
        let median_time = chain.median_time_past();
        let block_hash = block.block_hash();

        // The retarget engine dictates the bits for this kind.
        let expected_bits = next_target_required(&*chain, tip, proof_of_stake, &self.params);
        if block.header.bits != expected_bits {
            return Err(NodeError::BadDifficultyBits {
                got: block.header.bits,
                expected: expected_bits,
            });
        }
        if !proof_of_stake
            && !check_proof_of_work(&block_hash, block.header.bits, &self.params)
        {
            return Err(NodeError::InvalidProofOfWork);
        }

        // Token state transitions commit as a single batch; a failure
        // part-way discards the dirty layer so nothing half-applied leaks.
        {
            let mut cache = self.tokens.lock();
            let applied = (|| {
                let mut undo_records = Vec::new();
                for tx in &block.transactions {
                    undo_records.extend(apply_token_tx(
                        &mut cache,
                        &self.tokens_db,
                        &self.governance,
                        tx,
                        utxos,
                        height,
                        median_time,
                        block_hash,
                    )?);
                }
                Ok::<_, NodeError>(undo_records)
            })();
            match applied {
                Ok(undo_records) => {
                    cache.flush_connected(&self.tokens_db, &block_hash, undo_records)?
                }
                Err(err) => {
                    cache.discard_dirty();
                    return Err(err);
                }
            }
        }

        // Governance actions activate once the layer is live.
        if height >= self.params.governance_height {
            let actions = collect_governance_actions(&block.transactions);
            apply_governance_actions(&self.governance, &actions, height as i32)?;
        }

        chain.connect(block)?;
        self.mempool.remove_for_block(&block.transactions);

        tracing::info!(height, hash = %block_hash, txs = block.transactions.len(), "connected block");
        Ok(())
    }

    /// Disconnect the tip block, applying the inverse deltas.
    pub fn disconnect_block<U: UtxoProvider>(
        &self,
        block: &Block,
        utxos: &U,
    ) -> Result<(), NodeError> {
        let mut chain = self.chain.write();

        let block_hash = block.block_hash();
        let height = chain
            .tip_entry()
            .filter(|tip| tip.hash == block_hash)
            .ok_or(crate::chain::ChainError::BadDisconnect)?
            .height;

        if height >= self.params.governance_height {
            let actions = collect_governance_actions(&block.transactions);
            revert_governance_actions(&self.governance, &actions, height as i32)?;
        }

        {
            let mut cache = self.tokens.lock();
            let undo_records = self.tokens_db.read_block_undo(&block_hash)?;
            let reverted = (|| {
                for tx in block.transactions.iter().rev() {
                    revert_token_tx(&mut cache, &self.tokens_db, tx, utxos, &undo_records)?;
                }
                Ok::<_, NodeError>(())
            })();
            match reverted {
                Ok(()) => cache.flush_disconnected(&self.tokens_db, &block_hash)?,
                Err(err) => {
                    cache.discard_dirty();
                    return Err(err);
                }
            }
        }

        chain.disconnect(block)?;
        tracing::info!(height, hash = %block_hash, "disconnected block");
        Ok(())
    }
}
