//! The in-memory token state layer.
//!
//! Dirty entries accumulate here while a block connects or disconnects and
//! land in the database as one batch. Every add has a remove counterpart
//! keyed the same way, so a disconnect unwinds exactly what a connect wrote.

use crate::db::TokensDb;
use crate::lru::LruCache;
use crate::script::token_output_from_script;
use crate::types::{
    check_amount_with_units, is_name_an_owner, IssueToken, ReissueToken, ReissueUndo,
    TokenError, TokenMetadata, TokenTransfer, MAX_UNIT, OWNER_TOKEN_AMOUNT,
};
use lumen_primitives::amount::MAX_MONEY_TOKENS;
use lumen_primitives::script::TokenScriptOp;
use lumen_primitives::transaction::LOCKTIME_THRESHOLD;
use lumen_primitives::{AddressPrefixes, Amount, BlockHash, OutPoint, TxOut};
use lumen_store::Batch;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Default bound on the metadata LRU.
pub const MAX_CACHE_TOKENS_SIZE: usize = 2500;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Store(#[from] lumen_store::Error),

    #[error("token cache state is corrupt: {0}")]
    CorruptState(&'static str),
}

pub type Result<T> = std::result::Result<T, CacheError>;

// Dirty-set entries compare by their unwind key alone, mirroring how the
// disconnect path looks them up.

#[derive(Debug, Clone)]
pub struct CacheNewToken {
    pub token: IssueToken,
    pub address: String,
    pub height: i32,
    pub block_hash: BlockHash,
}

impl PartialEq for CacheNewToken {
    fn eq(&self, other: &Self) -> bool {
        self.token.name == other.token.name
    }
}
impl Eq for CacheNewToken {}
impl PartialOrd for CacheNewToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for CacheNewToken {
    fn cmp(&self, other: &Self) -> Ordering {
        self.token.name.cmp(&other.token.name)
    }
}

#[derive(Debug, Clone)]
pub struct CacheReissue {
    pub reissue: ReissueToken,
    pub address: String,
    pub outpoint: OutPoint,
    pub previous_height: i32,
    pub previous_block_hash: BlockHash,
}

impl PartialEq for CacheReissue {
    fn eq(&self, other: &Self) -> bool {
        self.outpoint == other.outpoint
    }
}
impl Eq for CacheReissue {}
impl PartialOrd for CacheReissue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for CacheReissue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.outpoint.cmp(&other.outpoint)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CacheOwner {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct CacheTransfer {
    pub transfer: TokenTransfer,
    pub address: String,
    pub outpoint: OutPoint,
}

impl PartialEq for CacheTransfer {
    fn eq(&self, other: &Self) -> bool {
        self.outpoint == other.outpoint
    }
}
impl Eq for CacheTransfer {}
impl PartialOrd for CacheTransfer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for CacheTransfer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.outpoint.cmp(&other.outpoint)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSpend {
    pub name: String,
    pub address: String,
    pub amount: Amount,
}

/// Token state above the database: touched balances, reissued metadata,
/// and the dirty sets of the block in flight.
pub struct TokensCache {
    prefixes: AddressPrefixes,

    /// (token name, address) -> live balance. Populated on demand from the
    /// database; flushed entirely.
    balances: HashMap<(String, String), Amount>,

    /// Post-reissue metadata not yet on disk.
    reissued: HashMap<String, TokenMetadata>,

    tokens_to_add: BTreeSet<CacheNewToken>,
    tokens_to_remove: BTreeSet<CacheNewToken>,
    reissues_to_add: BTreeSet<CacheReissue>,
    reissues_to_remove: BTreeSet<CacheReissue>,
    owners_to_add: BTreeSet<CacheOwner>,
    owners_to_remove: BTreeSet<CacheOwner>,
    transfers_to_add: BTreeSet<CacheTransfer>,
    transfers_to_remove: BTreeSet<CacheTransfer>,
    spent_tokens: Vec<CacheSpend>,
    undo_amounts: Vec<CacheSpend>,

    metadata_cache: LruCache<String, TokenMetadata>,
}

impl TokensCache {
    pub fn new(prefixes: AddressPrefixes) -> Self {
        Self::with_cache_size(prefixes, MAX_CACHE_TOKENS_SIZE)
    }

    pub fn with_cache_size(prefixes: AddressPrefixes, cache_size: usize) -> Self {
        TokensCache {
            prefixes,
            balances: HashMap::new(),
            reissued: HashMap::new(),
            tokens_to_add: BTreeSet::new(),
            tokens_to_remove: BTreeSet::new(),
            reissues_to_add: BTreeSet::new(),
            reissues_to_remove: BTreeSet::new(),
            owners_to_add: BTreeSet::new(),
            owners_to_remove: BTreeSet::new(),
            transfers_to_add: BTreeSet::new(),
            transfers_to_remove: BTreeSet::new(),
            spent_tokens: Vec::new(),
            undo_amounts: Vec::new(),
            metadata_cache: LruCache::new(cache_size),
        }
    }

    pub fn address_prefixes(&self) -> AddressPrefixes {
        self.prefixes
    }

    pub fn metadata_cache(&self) -> &LruCache<String, TokenMetadata> {
        &self.metadata_cache
    }

    pub fn dirty_entry_count(&self) -> usize {
        self.tokens_to_add.len()
            + self.tokens_to_remove.len()
            + self.reissues_to_add.len()
            + self.reissues_to_remove.len()
            + self.owners_to_add.len()
            + self.owners_to_remove.len()
            + self.transfers_to_add.len()
            + self.transfers_to_remove.len()
            + self.spent_tokens.len()
            + self.undo_amounts.len()
    }

    fn name_probe(name: &str) -> CacheNewToken {
        CacheNewToken {
            token: IssueToken::new(name, Amount::ZERO),
            address: String::new(),
            height: 0,
            block_hash: BlockHash::all_zeros(),
        }
    }

    // === queries ===

    /// Whether a token exists, honoring in-flight dirty state before the
    /// LRU and the database.
    pub fn check_if_token_exists(&mut self, db: &TokensDb, name: &str) -> Result<bool> {
        let probe = Self::name_probe(name);
        if self.tokens_to_remove.contains(&probe) {
            return Ok(false);
        }
        if self.tokens_to_add.contains(&probe) {
            return Ok(true);
        }
        if self.metadata_cache.exists(&name.to_string()) {
            return Ok(true);
        }
        if let Some(metadata) = db.read_token_data(name)? {
            self.metadata_cache.put(name.to_string(), metadata);
            return Ok(true);
        }
        Ok(false)
    }

    /// Metadata lookup through the same layering, refilling the LRU from
    /// the database on a miss.
    pub fn get_token_metadata(
        &mut self,
        db: &TokensDb,
        name: &str,
    ) -> Result<Option<TokenMetadata>> {
        if let Some(metadata) = self.reissued.get(name) {
            return Ok(Some(metadata.clone()));
        }

        let probe = Self::name_probe(name);
        if self.tokens_to_remove.contains(&probe) {
            return Ok(None);
        }
        if let Some(entry) = self.tokens_to_add.get(&probe) {
            return Ok(Some(TokenMetadata::new(
                entry.token.clone(),
                entry.height,
                entry.block_hash,
            )));
        }
        if let Some(metadata) = self.metadata_cache.get(&name.to_string()) {
            return Ok(Some(metadata.clone()));
        }
        if let Some(metadata) = db.read_token_data(name)? {
            self.metadata_cache.put(name.to_string(), metadata.clone());
            return Ok(Some(metadata));
        }
        Ok(None)
    }

    /// Current balance of `(name, address)`, loading the database value
    /// into the live map on first touch.
    pub fn get_balance(&mut self, db: &TokensDb, name: &str, address: &str) -> Result<Amount> {
        let key = (name.to_string(), address.to_string());
        if let Some(amount) = self.balances.get(&key) {
            return Ok(*amount);
        }
        let amount = db
            .read_token_address_quantity(name, address)?
            .unwrap_or(Amount::ZERO);
        self.balances.insert(key, amount);
        Ok(amount)
    }

    fn add_to_balance(&mut self, db: &TokensDb, name: &str, address: &str, amount: Amount) -> Result<()> {
        let current = self.get_balance(db, name, address)?;
        let updated = if is_name_an_owner(name) {
            Amount::from_sat(OWNER_TOKEN_AMOUNT)
        } else {
            current
                .checked_add(amount)
                .ok_or(TokenError::AmountOutOfRange)?
        };
        self.balances
            .insert((name.to_string(), address.to_string()), updated);
        Ok(())
    }

    // === connect-side operations ===

    /// Record a new token issuance.
    pub fn add_new_token(
        &mut self,
        db: &TokensDb,
        token: IssueToken,
        address: &str,
        height: i32,
        block_hash: BlockHash,
    ) -> Result<()> {
        if self.check_if_token_exists(db, &token.name)? {
            return Err(TokenError::DuplicateIssue(token.name).into());
        }
        let name = token.name.clone();
        let amount = token.amount;
        let entry = CacheNewToken {
            token,
            address: address.to_string(),
            height,
            block_hash,
        };
        self.tokens_to_remove.remove(&entry);
        self.tokens_to_add.insert(entry);
        self.balances
            .insert((name, address.to_string()), amount);
        Ok(())
    }

    /// Record the owner token minted with an issuance.
    pub fn add_owner_token(&mut self, name: &str, address: &str) -> Result<()> {
        let entry = CacheOwner {
            name: name.to_string(),
            address: address.to_string(),
        };
        self.owners_to_remove.remove(&entry);
        self.owners_to_add.insert(entry);
        self.balances.insert(
            (name.to_string(), address.to_string()),
            Amount::from_sat(OWNER_TOKEN_AMOUNT),
        );
        Ok(())
    }

    /// Record a transfer output crediting `address`.
    pub fn add_transfer_token(
        &mut self,
        db: &TokensDb,
        transfer: TokenTransfer,
        address: &str,
        outpoint: OutPoint,
    ) -> Result<()> {
        transfer.check_valid()?;
        if !self.check_if_token_exists(db, &transfer.name)?
            && !is_name_an_owner(&transfer.name)
        {
            return Err(TokenError::TokenNotFound(transfer.name).into());
        }
        let name = transfer.name.clone();
        self.add_to_balance(db, &name, address, transfer.amount)?;
        let entry = CacheTransfer {
            transfer,
            address: address.to_string(),
            outpoint,
        };
        self.transfers_to_remove.remove(&entry);
        self.transfers_to_add.insert(entry);
        Ok(())
    }

    /// Record a reissue: metadata checks against the live view, then the
    /// amount lands on the reissuer's balance.
    pub fn add_reissue_token(
        &mut self,
        db: &TokensDb,
        reissue: ReissueToken,
        address: &str,
        outpoint: OutPoint,
    ) -> Result<ReissueUndo> {
        reissue.check_valid()?;

        let current = self
            .get_token_metadata(db, &reissue.name)?
            .ok_or_else(|| TokenError::TokenNotFound(reissue.name.clone()))?;

        if !current.token.reissuable {
            return Err(TokenError::NotReissuable(reissue.name).into());
        }
        let new_total = current
            .token
            .amount
            .checked_add(reissue.amount)
            .ok_or(TokenError::AmountOutOfRange)?;
        if new_total.to_sat() > MAX_MONEY_TOKENS {
            return Err(TokenError::AmountOutOfRange.into());
        }
        if !check_amount_with_units(reissue.amount, current.token.units) {
            return Err(TokenError::AmountNotDivisible.into());
        }
        if reissue.units != -1 && reissue.units < current.token.units {
            return Err(TokenError::UnitsDecrease.into());
        }
        debug_assert!(reissue.units <= MAX_UNIT);

        let changed_units = reissue.units != -1 && reissue.units != current.token.units;
        let undo = ReissueUndo {
            name: reissue.name.clone(),
            changed_units,
            previous_units: current.token.units,
        };

        let mut updated = current.token.clone();
        updated.amount = new_total;
        updated.reissuable = reissue.reissuable;
        if reissue.units != -1 {
            updated.units = reissue.units;
        }
        self.reissued.insert(
            reissue.name.clone(),
            TokenMetadata::new(updated, current.height, current.block_hash),
        );

        let reissue_name = reissue.name.clone();
        self.add_to_balance(db, &reissue_name, address, reissue.amount)?;

        let entry = CacheReissue {
            reissue,
            address: address.to_string(),
            outpoint,
            previous_height: current.height,
            previous_block_hash: current.block_hash,
        };
        self.reissues_to_remove.remove(&entry);
        self.reissues_to_add.insert(entry);
        Ok(undo)
    }

    /// Account for a spent token input. Locked transfer outputs cannot be
    /// spent before their token lock time passes.
    pub fn try_spend_coin(
        &mut self,
        db: &TokensDb,
        outpoint: OutPoint,
        spent_output: &TxOut,
        height: u32,
        median_time: u32,
    ) -> Result<()> {
        let Some(output) = token_output_from_script(&spent_output.script_pubkey, self.prefixes)?
        else {
            // Plain value output; nothing to account.
            return Ok(());
        };

        if output.op == TokenScriptOp::Transfer && output.token_lock_time != 0 {
            let cutoff = if output.token_lock_time < LOCKTIME_THRESHOLD {
                height
            } else {
                median_time
            };
            if output.token_lock_time > cutoff {
                return Err(TokenError::TokenLocked {
                    name: output.name,
                    until: output.token_lock_time,
                }
                .into());
            }
        }

        let have = self.get_balance(db, &output.name, &output.address)?;
        if have < output.amount {
            return Err(TokenError::InsufficientBalance {
                name: output.name,
                address: output.address,
                have,
                need: output.amount,
            }
            .into());
        }
        self.balances.insert(
            (output.name.clone(), output.address.clone()),
            Amount::from_sat(have.to_sat() - output.amount.to_sat()),
        );
        self.spent_tokens.push(CacheSpend {
            name: output.name,
            address: output.address,
            amount: output.amount,
        });
        let _ = outpoint;
        Ok(())
    }

    // === disconnect-side operations ===

    /// Restore a token amount that a disconnected block had spent.
    pub fn undo_token_coin(
        &mut self,
        db: &TokensDb,
        spent_output: &TxOut,
        outpoint: OutPoint,
    ) -> Result<()> {
        let Some(output) = token_output_from_script(&spent_output.script_pubkey, self.prefixes)?
        else {
            return Ok(());
        };
        if output.amount.to_sat() <= 0 {
            tracing::error!(%outpoint, "undo of a token coin with no amount");
            return Err(CacheError::CorruptState("token coin undo carried no amount"));
        }
        self.add_to_balance(db, &output.name.clone(), &output.address.clone(), output.amount)?;
        self.undo_amounts.push(CacheSpend {
            name: output.name,
            address: output.address,
            amount: output.amount,
        });
        Ok(())
    }

    /// Erase an issuance while disconnecting its block.
    pub fn remove_new_token(
        &mut self,
        db: &TokensDb,
        token: IssueToken,
        address: &str,
    ) -> Result<()> {
        if !self.check_if_token_exists(db, &token.name)? {
            return Err(CacheError::CorruptState(
                "disconnect removed a token that was never issued",
            ));
        }
        let name = token.name.clone();
        let entry = CacheNewToken {
            token,
            address: address.to_string(),
            height: 0,
            block_hash: BlockHash::all_zeros(),
        };
        self.tokens_to_add.remove(&entry);
        self.tokens_to_remove.insert(entry);
        self.reissued.remove(&name);
        self.metadata_cache.erase(&name);
        self.balances
            .insert((name, address.to_string()), Amount::ZERO);
        Ok(())
    }

    pub fn remove_owner_token(&mut self, name: &str, address: &str) -> Result<()> {
        let entry = CacheOwner {
            name: name.to_string(),
            address: address.to_string(),
        };
        self.owners_to_add.remove(&entry);
        self.owners_to_remove.insert(entry);
        self.balances
            .insert((name.to_string(), address.to_string()), Amount::ZERO);
        Ok(())
    }

    /// Undo a transfer credit on disconnect.
    pub fn remove_transfer(
        &mut self,
        db: &TokensDb,
        transfer: TokenTransfer,
        address: &str,
        outpoint: OutPoint,
    ) -> Result<()> {
        let have = self.get_balance(db, &transfer.name, address)?;
        if have < transfer.amount {
            return Err(CacheError::CorruptState(
                "transfer undo exceeds the address balance",
            ));
        }
        self.balances.insert(
            (transfer.name.clone(), address.to_string()),
            Amount::from_sat(have.to_sat() - transfer.amount.to_sat()),
        );
        let entry = CacheTransfer {
            transfer,
            address: address.to_string(),
            outpoint,
        };
        self.transfers_to_add.remove(&entry);
        self.transfers_to_remove.insert(entry);
        Ok(())
    }

    /// Roll back a reissue using the block's undo records.
    pub fn remove_reissue_token(
        &mut self,
        db: &TokensDb,
        reissue: ReissueToken,
        address: &str,
        outpoint: OutPoint,
        undo_records: &[ReissueUndo],
    ) -> Result<()> {
        let current = self
            .get_token_metadata(db, &reissue.name)?
            .ok_or(CacheError::CorruptState(
                "disconnect reverted a reissue of an unknown token",
            ))?;

        let mut restored = current.token.clone();
        restored.amount = restored
            .amount
            .checked_sub(reissue.amount)
            .ok_or(CacheError::CorruptState("reissue undo made the total negative"))?;
        // A reissue is only applied when the token was reissuable.
        restored.reissuable = true;
        for undo in undo_records {
            if undo.name == reissue.name && undo.changed_units {
                restored.units = undo.previous_units;
            }
        }
        self.reissued.insert(
            reissue.name.clone(),
            TokenMetadata::new(restored, current.height, current.block_hash),
        );

        let have = self.get_balance(db, &reissue.name, address)?;
        if have < reissue.amount {
            return Err(CacheError::CorruptState(
                "reissue undo exceeds the address balance",
            ));
        }
        self.balances.insert(
            (reissue.name.clone(), address.to_string()),
            Amount::from_sat(have.to_sat() - reissue.amount.to_sat()),
        );

        let entry = CacheReissue {
            reissue,
            address: address.to_string(),
            outpoint,
            previous_height: current.height,
            previous_block_hash: current.block_hash,
        };
        self.reissues_to_add.remove(&entry);
        self.reissues_to_remove.insert(entry);
        Ok(())
    }

    // === flushing ===

    /// Commit the dirty state for a connected block together with its undo
    /// records, as one batch. Dirty state survives a failed commit.
    pub fn flush_connected(
        &mut self,
        db: &TokensDb,
        block_hash: &BlockHash,
        undo_records: Vec<ReissueUndo>,
    ) -> Result<()> {
        let mut batch = Batch::new();
        if !undo_records.is_empty() {
            TokensDb::batch_write_block_undo(&mut batch, block_hash, &undo_records);
        }
        self.fill_batch(&mut batch);
        db.write_batch(batch)?;
        self.finish_flush();
        Ok(())
    }

    /// Commit the dirty state for a disconnected block and drop its undo
    /// records.
    pub fn flush_disconnected(&mut self, db: &TokensDb, block_hash: &BlockHash) -> Result<()> {
        let mut batch = Batch::new();
        TokensDb::batch_erase_block_undo(&mut batch, block_hash);
        self.fill_batch(&mut batch);
        db.write_batch(batch)?;
        self.finish_flush();
        Ok(())
    }

    fn fill_batch(&self, batch: &mut Batch) {
        for entry in &self.tokens_to_remove {
            TokensDb::batch_erase_token_data(batch, &entry.token.name);
        }
        for entry in &self.tokens_to_add {
            TokensDb::batch_write_token_data(
                batch,
                &TokenMetadata::new(entry.token.clone(), entry.height, entry.block_hash),
            );
        }
        for metadata in self.reissued.values() {
            TokensDb::batch_write_token_data(batch, metadata);
        }
        for ((name, address), amount) in &self.balances {
            if amount.to_sat() == 0 {
                TokensDb::batch_erase_quantity(batch, name, address);
            } else {
                TokensDb::batch_write_quantity(batch, name, address, *amount);
            }
        }
    }

    /// Drop uncommitted dirty state after a failed block application, so
    /// the cache again mirrors the database.
    pub fn discard_dirty(&mut self) {
        self.clear_dirty();
    }

    fn finish_flush(&mut self) {
        for entry in &self.tokens_to_remove {
            self.metadata_cache.erase(&entry.token.name);
        }
        let added: Vec<TokenMetadata> = self
            .tokens_to_add
            .iter()
            .map(|entry| TokenMetadata::new(entry.token.clone(), entry.height, entry.block_hash))
            .chain(self.reissued.values().cloned())
            .collect();
        for metadata in added {
            self.metadata_cache
                .put(metadata.token.name.clone(), metadata);
        }
        self.clear_dirty();
    }

    fn clear_dirty(&mut self) {
        self.balances.clear();
        self.reissued.clear();
        self.tokens_to_add.clear();
        self.tokens_to_remove.clear();
        self.reissues_to_add.clear();
        self.reissues_to_remove.clear();
        self.owners_to_add.clear();
        self.owners_to_remove.clear();
        self.transfers_to_add.clear();
        self.transfers_to_remove.clear();
        self.spent_tokens.clear();
        self.undo_amounts.clear();
    }
}

/// Count token outputs by operation, used by the transaction-shape checks.
pub fn count_token_outputs(
    outputs: &[TxOut],
    prefixes: AddressPrefixes,
) -> (usize, usize, usize, usize) {
    let mut issues = 0;
    let mut reissues = 0;
    let mut transfers = 0;
    let mut owners = 0;
    for output in outputs {
        if let Ok(Some(token_output)) = token_output_from_script(&output.script_pubkey, prefixes) {
            match token_output.op {
                TokenScriptOp::Issue => issues += 1,
                TokenScriptOp::Reissue => reissues += 1,
                TokenScriptOp::Transfer => transfers += 1,
                TokenScriptOp::Owner => owners += 1,
            }
        }
    }
    (issues, reissues, transfers, owners)
}
