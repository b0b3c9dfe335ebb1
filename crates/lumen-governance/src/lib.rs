//! Governance state: the script freeze registry, the height-indexed token
//! issuance cost table, and the fee-address table.
//!
//! Freeze/unfreeze are the forward operations applied when a governance
//! action connects; the `revert_*` pair are their single-step inverses used
//! on block disconnect. A revert whose precondition does not hold means the
//! database no longer matches the chain and is treated as corruption.

use lumen_consensus::ChainParams;
use lumen_primitives::{decode_destination, script_for_destination, Amount, Script};
use lumen_store::{Batch, Database};
use std::path::Path;

const DB_GOVERNANCE_INIT: u8 = b'G';
const DB_NUMBER_FROZEN: u8 = b'N';
const DB_ADDRESS: u8 = b'a';
const DB_COST: u8 = b'c';
const DB_FEE_ADDRESS: u8 = b'f';

/// Which issuance operation a cost entry prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostType {
    Root = 1,
    Reissue = 2,
    Unique = 3,
    Sub = 4,
    Username = 5,
}

impl CostType {
    pub fn from_i32(value: i32) -> Option<CostType> {
        match value {
            1 => Some(CostType::Root),
            2 => Some(CostType::Reissue),
            3 => Some(CostType::Unique),
            4 => Some(CostType::Sub),
            5 => Some(CostType::Username),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CostType::Root => "root",
            CostType::Reissue => "reissue",
            CostType::Unique => "unique",
            CostType::Sub => "sub",
            CostType::Username => "username",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] lumen_store::Error),

    #[error("governance state is corrupt: {0}")]
    CorruptState(&'static str),

    #[error("fee address in chain params does not decode")]
    BadFeeAddress,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Persistent governance registry. Owns its database and delegates to it.
pub struct GovernanceStore {
    db: Database,
}

impl GovernanceStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(GovernanceStore {
            db: Database::open(path)?,
        })
    }

    pub fn from_database(db: Database) -> Self {
        GovernanceStore { db }
    }

    /// Seed the initial cost rows and fee script unless already present.
    pub fn init(&self, params: &ChainParams) -> Result<()> {
        if self.db.read::<_, bool>(&DB_GOVERNANCE_INIT)?.unwrap_or(false) {
            return Ok(());
        }
        tracing::info!("governance: creating new database");

        let fee_dest = decode_destination(&params.token_fee_address, params.address_prefixes)
            .map_err(|_| Error::BadFeeAddress)?;
        let fee_script = script_for_destination(&fee_dest, 0);

        let mut batch = Batch::new();
        batch.write(&DB_NUMBER_FROZEN, &0u32);

        for (cost_type, amount) in [
            (CostType::Root, params.root_fee),
            (CostType::Reissue, params.reissue_fee),
            (CostType::Unique, params.unique_fee),
            (CostType::Sub, params.sub_fee),
            (CostType::Username, params.username_fee),
        ] {
            batch.write(&cost_key(cost_type as i32, 0), &amount);
        }

        batch.write(&fee_key(0), &fee_script);
        batch.write(&DB_GOVERNANCE_INIT, &true);
        self.db.write_batch(batch)?;
        Ok(())
    }

    // === statistics ===

    pub fn number_of_frozen_scripts(&self) -> Result<u32> {
        Ok(self.db.read(&DB_NUMBER_FROZEN)?.unwrap_or(0))
    }

    // === freeze list ===

    /// Mark a script frozen. The counter moves only on a real transition.
    pub fn freeze_script(&self, script: &Script) -> Result<()> {
        let number = self.number_of_frozen_scripts()?;
        let mut batch = Batch::new();

        match self.db.read::<_, bool>(&freeze_key(script))? {
            Some(false) => {
                tracing::info!(script = %short(script), "governance: adding script back to freeze list");
                batch.write(&freeze_key(script), &true);
                batch.write(&DB_NUMBER_FROZEN, &(number + 1));
            }
            Some(true) => {
                tracing::debug!(script = %short(script), "governance: script already frozen");
                batch.write(&freeze_key(script), &true);
            }
            None => {
                tracing::info!(script = %short(script), "governance: freezing previously unknown script");
                batch.write(&freeze_key(script), &true);
                batch.write(&DB_NUMBER_FROZEN, &(number + 1));
            }
        }

        Ok(self.db.write_batch(batch)?)
    }

    /// Mark a script explicitly unfrozen.
    pub fn unfreeze_script(&self, script: &Script) -> Result<()> {
        let number = self.number_of_frozen_scripts()?;
        let mut batch = Batch::new();

        match self.db.read::<_, bool>(&freeze_key(script))? {
            Some(true) => {
                tracing::info!(script = %short(script), "governance: removing script from freeze list");
                batch.write(&freeze_key(script), &false);
                batch.write(&DB_NUMBER_FROZEN, &(number.saturating_sub(1)));
            }
            Some(false) => {
                tracing::debug!(script = %short(script), "governance: script already unfrozen");
                batch.write(&freeze_key(script), &false);
            }
            None => {
                tracing::info!(script = %short(script), "governance: unfreezing previously unknown script");
                batch.write(&freeze_key(script), &false);
            }
        }

        Ok(self.db.write_batch(batch)?)
    }

    /// Undo a freeze. Valid only when the last applied operation for the
    /// script was a freeze; anything else is corruption.
    pub fn revert_freeze_script(&self, script: &Script) -> Result<()> {
        let number = self.number_of_frozen_scripts()?;
        let mut batch = Batch::new();

        match self.db.read::<_, bool>(&freeze_key(script))? {
            Some(true) => {
                tracing::info!(script = %short(script), "governance: reverting freeze of script");
                batch.write(&freeze_key(script), &false);
                batch.write(&DB_NUMBER_FROZEN, &(number.saturating_sub(1)));
            }
            Some(false) => {
                return Err(Error::CorruptState(
                    "revert of a freeze found the script unfrozen",
                ));
            }
            None => {
                return Err(Error::CorruptState(
                    "revert of a freeze found no entry for the script",
                ));
            }
        }

        Ok(self.db.write_batch(batch)?)
    }

    /// Undo an unfreeze; the dual of [`Self::revert_freeze_script`].
    pub fn revert_unfreeze_script(&self, script: &Script) -> Result<()> {
        let number = self.number_of_frozen_scripts()?;
        let mut batch = Batch::new();

        match self.db.read::<_, bool>(&freeze_key(script))? {
            Some(false) => {
                tracing::info!(script = %short(script), "governance: reverting unfreeze of script");
                batch.write(&freeze_key(script), &true);
                batch.write(&DB_NUMBER_FROZEN, &(number + 1));
            }
            Some(true) => {
                return Err(Error::CorruptState(
                    "revert of an unfreeze found the script frozen",
                ));
            }
            None => {
                return Err(Error::CorruptState(
                    "revert of an unfreeze found no entry for the script",
                ));
            }
        }

        Ok(self.db.write_batch(batch)?)
    }

    pub fn script_exists(&self, script: &Script) -> Result<bool> {
        Ok(self.db.exists(&freeze_key(script))?)
    }

    /// A script can send unless it is present and currently frozen.
    pub fn can_send(&self, script: &Script) -> Result<bool> {
        match self.db.read::<_, bool>(&freeze_key(script))? {
            Some(frozen) => Ok(!frozen),
            None => Ok(true),
        }
    }

    /// Every freeze entry with its current state.
    pub fn dump_freeze_stats(&self) -> Result<Vec<(Script, bool)>> {
        self.db
            .iter_family::<Script, bool>(DB_ADDRESS)
            .map(|item| item.map_err(Error::from))
            .collect()
    }

    /// Only the scripts currently frozen.
    pub fn frozen_scripts(&self) -> Result<Vec<Script>> {
        Ok(self
            .dump_freeze_stats()?
            .into_iter()
            .filter_map(|(script, frozen)| frozen.then_some(script))
            .collect())
    }

    // === cost table ===

    /// The amount at the entry with the greatest height for the type.
    pub fn get_cost(&self, cost_type: CostType) -> Result<Amount> {
        let mut best_height = -1i32;
        let mut best = Amount::ZERO;
        for item in self.db.iter_family::<(i32, i32), Amount>(DB_COST) {
            let ((entry_type, height), amount) = item?;
            if entry_type == cost_type as i32 && height > best_height {
                best_height = height;
                best = amount;
            }
        }
        Ok(best)
    }

    /// Append a cost entry. Writing over an existing (type, height) slot is
    /// a no-op, matching forward re-application during reorg replay.
    pub fn update_cost(&self, cost_type: CostType, height: i32, amount: Amount) -> Result<()> {
        let key = cost_key(cost_type as i32, height);
        if self.db.exists(&key)? {
            return Ok(());
        }
        tracing::info!(
            type_name = cost_type.name(),
            height,
            %amount,
            "governance: updating issuance cost"
        );
        let mut batch = Batch::new();
        batch.write(&key, &amount);
        Ok(self.db.write_batch(batch)?)
    }

    /// Delete a cost entry on disconnect. Deleting a missing entry is
    /// corruption.
    pub fn revert_update_cost(&self, cost_type: CostType, height: i32) -> Result<()> {
        let key = cost_key(cost_type as i32, height);
        match self.db.read::<_, Amount>(&key)? {
            Some(amount) => {
                tracing::info!(
                    type_name = cost_type.name(),
                    height,
                    %amount,
                    "governance: reverting issuance cost update"
                );
                let mut batch = Batch::new();
                batch.erase(&key);
                Ok(self.db.write_batch(batch)?)
            }
            None => Err(Error::CorruptState(
                "revert of an unknown issuance cost update",
            )),
        }
    }

    // === fee address ===

    /// The fee script at the entry with the greatest height.
    pub fn get_fee_script(&self) -> Result<Script> {
        let mut best_height = -1i32;
        let mut best = Script::new();
        for item in self.db.iter_family::<i32, Script>(DB_FEE_ADDRESS) {
            let (height, script) = item?;
            if height > best_height {
                best_height = height;
                best = script;
            }
        }
        Ok(best)
    }

    pub fn update_fee_script(&self, script: &Script, height: i32) -> Result<()> {
        let key = fee_key(height);
        if self.db.exists(&key)? {
            return Ok(());
        }
        tracing::info!(script = %short(script), height, "governance: updating fee script");
        let mut batch = Batch::new();
        batch.write(&key, script);
        Ok(self.db.write_batch(batch)?)
    }

    pub fn revert_update_fee_script(&self, height: i32) -> Result<()> {
        let key = fee_key(height);
        match self.db.read::<_, Script>(&key)? {
            Some(script) => {
                tracing::info!(script = %short(&script), height, "governance: reverting fee script update");
                let mut batch = Batch::new();
                batch.erase(&key);
                Ok(self.db.write_batch(batch)?)
            }
            None => Err(Error::CorruptState("revert of an unknown fee script update")),
        }
    }

    pub fn sync(&self) -> Result<()> {
        Ok(self.db.sync()?)
    }
}

fn freeze_key(script: &Script) -> (u8, Script) {
    (DB_ADDRESS, script.clone())
}

fn cost_key(cost_type: i32, height: i32) -> (u8, (i32, i32)) {
    (DB_COST, (cost_type, height))
}

fn fee_key(height: i32) -> (u8, i32) {
    (DB_FEE_ADDRESS, height)
}

fn short(script: &Script) -> String {
    let mut s = script.to_hex();
    s.truncate(10);
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_primitives::hashes::PubkeyHash;
    use lumen_primitives::Destination;

    fn open_store() -> (tempfile::TempDir, GovernanceStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = GovernanceStore::open(dir.path()).unwrap();
        store.init(&ChainParams::testnet()).unwrap();
        (dir, store)
    }

    fn script(n: u8) -> Script {
        script_for_destination(
            &Destination::PubkeyHash(PubkeyHash::from_byte_array([n; 20])),
            0,
        )
    }

    #[test]
    fn init_seeds_costs_and_fee_script() {
        let (_dir, store) = open_store();
        let params = ChainParams::testnet();

        assert_eq!(store.get_cost(CostType::Root).unwrap(), params.root_fee);
        assert_eq!(store.get_cost(CostType::Reissue).unwrap(), params.reissue_fee);
        assert_eq!(store.get_cost(CostType::Unique).unwrap(), params.unique_fee);
        assert_eq!(store.get_cost(CostType::Sub).unwrap(), params.sub_fee);
        assert_eq!(store.get_cost(CostType::Username).unwrap(), params.username_fee);

        let fee_dest =
            decode_destination(&params.token_fee_address, params.address_prefixes).unwrap();
        assert_eq!(
            store.get_fee_script().unwrap(),
            script_for_destination(&fee_dest, 0)
        );

        // Re-running init must not disturb anything.
        store.init(&params).unwrap();
        assert_eq!(store.number_of_frozen_scripts().unwrap(), 0);
    }

    #[test]
    fn freeze_toggle_updates_counter_and_can_send() {
        let (_dir, store) = open_store();
        let s = script(1);

        assert!(store.can_send(&s).unwrap());
        assert!(!store.script_exists(&s).unwrap());

        store.freeze_script(&s).unwrap();
        assert!(!store.can_send(&s).unwrap());
        assert_eq!(store.number_of_frozen_scripts().unwrap(), 1);

        store.unfreeze_script(&s).unwrap();
        assert!(store.can_send(&s).unwrap());
        assert_eq!(store.number_of_frozen_scripts().unwrap(), 0);
        // The entry stays, explicitly unfrozen.
        assert!(store.script_exists(&s).unwrap());
    }

    #[test]
    fn double_freeze_counts_once() {
        let (_dir, store) = open_store();
        let s = script(2);
        store.freeze_script(&s).unwrap();
        store.freeze_script(&s).unwrap();
        assert_eq!(store.number_of_frozen_scripts().unwrap(), 1);
    }

    #[test]
    fn counter_matches_frozen_set() {
        let (_dir, store) = open_store();
        for n in 0..5u8 {
            store.freeze_script(&script(n)).unwrap();
        }
        store.unfreeze_script(&script(0)).unwrap();
        store.unfreeze_script(&script(1)).unwrap();

        let frozen = store.frozen_scripts().unwrap();
        assert_eq!(frozen.len(), 3);
        assert_eq!(store.number_of_frozen_scripts().unwrap() as usize, frozen.len());
        assert_eq!(store.dump_freeze_stats().unwrap().len(), 5);
    }

    #[test]
    fn revert_freeze_restores_and_double_revert_is_corrupt() {
        let (_dir, store) = open_store();
        let s = script(3);

        store.freeze_script(&s).unwrap();
        store.revert_freeze_script(&s).unwrap();
        assert_eq!(store.number_of_frozen_scripts().unwrap(), 0);
        assert!(store.can_send(&s).unwrap());

        assert!(matches!(
            store.revert_freeze_script(&s),
            Err(Error::CorruptState(_))
        ));
    }

    #[test]
    fn revert_unfreeze_is_dual() {
        let (_dir, store) = open_store();
        let s = script(4);

        store.freeze_script(&s).unwrap();
        store.unfreeze_script(&s).unwrap();
        store.revert_unfreeze_script(&s).unwrap();
        assert!(!store.can_send(&s).unwrap());
        assert_eq!(store.number_of_frozen_scripts().unwrap(), 1);

        assert!(matches!(
            store.revert_unfreeze_script(&s),
            Err(Error::CorruptState(_))
        ));
    }

    #[test]
    fn revert_of_unknown_script_is_corrupt() {
        let (_dir, store) = open_store();
        assert!(matches!(
            store.revert_freeze_script(&script(9)),
            Err(Error::CorruptState(_))
        ));
    }

    #[test]
    fn cost_reads_entry_with_greatest_height() {
        let (_dir, store) = open_store();
        let raised = Amount::from_sat(20_000 * lumen_primitives::COIN);
        let lowered = Amount::from_sat(5_000 * lumen_primitives::COIN);

        store.update_cost(CostType::Root, 150, raised).unwrap();
        store.update_cost(CostType::Root, 90, lowered).unwrap();
        assert_eq!(store.get_cost(CostType::Root).unwrap(), raised);

        // Other types are unaffected.
        let params = ChainParams::testnet();
        assert_eq!(store.get_cost(CostType::Sub).unwrap(), params.sub_fee);

        store.revert_update_cost(CostType::Root, 150).unwrap();
        assert_eq!(store.get_cost(CostType::Root).unwrap(), lowered);

        assert!(matches!(
            store.revert_update_cost(CostType::Root, 150),
            Err(Error::CorruptState(_))
        ));
    }

    #[test]
    fn fee_script_reads_entry_with_greatest_height() {
        let (_dir, store) = open_store();
        let newer = script(7);
        store.update_fee_script(&newer, 500).unwrap();
        assert_eq!(store.get_fee_script().unwrap(), newer);

        store.revert_update_fee_script(500).unwrap();
        assert_ne!(store.get_fee_script().unwrap(), newer);
    }
}
