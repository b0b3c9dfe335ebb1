//! Persistent token tables: metadata by name, balances by (name, address)
//! and (address, name), and per-block reissue undo records.

use crate::types::{ReissueUndo, TokenMetadata};
use lumen_primitives::{Amount, BlockHash};
use lumen_store::{Batch, Database};
use std::path::Path;

const DB_TOKEN_DATA: u8 = b'T';
const DB_TOKEN_ADDRESS_QUANTITY: u8 = b'B';
const DB_ADDRESS_TOKEN_QUANTITY: u8 = b'C';
const DB_BLOCK_UNDO: u8 = b'U';

/// Upper bound on entries visited by one directory scan.
pub const MAX_DATABASE_RESULTS: usize = 50_000;

pub type Result<T> = std::result::Result<T, lumen_store::Error>;

pub struct TokensDb {
    db: Database,
}

impl TokensDb {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(TokensDb {
            db: Database::open(path)?,
        })
    }

    pub fn from_database(db: Database) -> Self {
        TokensDb { db }
    }

    // === point reads and writes ===

    pub fn read_token_data(&self, name: &str) -> Result<Option<TokenMetadata>> {
        self.db.read(&(DB_TOKEN_DATA, name.to_string()))
    }

    pub fn token_exists(&self, name: &str) -> Result<bool> {
        self.db.exists(&(DB_TOKEN_DATA, name.to_string()))
    }

    pub fn read_token_address_quantity(&self, name: &str, address: &str) -> Result<Option<Amount>> {
        self.db.read(&(
            DB_TOKEN_ADDRESS_QUANTITY,
            (name.to_string(), address.to_string()),
        ))
    }

    pub fn read_block_undo(&self, block_hash: &BlockHash) -> Result<Vec<ReissueUndo>> {
        Ok(self
            .db
            .read(&(DB_BLOCK_UNDO, *block_hash))?
            .unwrap_or_default())
    }

    pub fn sync(&self) -> Result<()> {
        self.db.sync()
    }

    pub fn write_batch(&self, batch: Batch) -> Result<()> {
        self.db.write_batch(batch)
    }

    // === batch building (one batch per block transition) ===

    pub fn batch_write_token_data(batch: &mut Batch, metadata: &TokenMetadata) {
        batch.write(&(DB_TOKEN_DATA, metadata.token.name.clone()), metadata);
    }

    pub fn batch_erase_token_data(batch: &mut Batch, name: &str) {
        batch.erase(&(DB_TOKEN_DATA, name.to_string()));
    }

    pub fn batch_write_quantity(batch: &mut Batch, name: &str, address: &str, amount: Amount) {
        batch.write(
            &(
                DB_TOKEN_ADDRESS_QUANTITY,
                (name.to_string(), address.to_string()),
            ),
            &amount,
        );
        batch.write(
            &(
                DB_ADDRESS_TOKEN_QUANTITY,
                (address.to_string(), name.to_string()),
            ),
            &amount,
        );
    }

    pub fn batch_erase_quantity(batch: &mut Batch, name: &str, address: &str) {
        batch.erase(&(
            DB_TOKEN_ADDRESS_QUANTITY,
            (name.to_string(), address.to_string()),
        ));
        batch.erase(&(
            DB_ADDRESS_TOKEN_QUANTITY,
            (address.to_string(), name.to_string()),
        ));
    }

    pub fn batch_write_block_undo(
        batch: &mut Batch,
        block_hash: &BlockHash,
        undo: &Vec<ReissueUndo>,
    ) {
        batch.write(&(DB_BLOCK_UNDO, *block_hash), undo);
    }

    pub fn batch_erase_block_undo(batch: &mut Batch, block_hash: &BlockHash) {
        batch.erase(&(DB_BLOCK_UNDO, *block_hash));
    }

    // === directory scans ===

    /// All token metadata whose name passes `filter`, paginated. A filter
    /// ending in `*` matches by prefix; empty or `*` matches everything.
    /// Negative `start` counts back from the end. Returns the page and the
    /// total number of matches.
    pub fn token_dir(
        &self,
        filter: &str,
        count: usize,
        start: i64,
    ) -> Result<(Vec<TokenMetadata>, usize)> {
        let matches_filter = name_filter(filter);
        let mut matches = Vec::new();
        for item in self
            .db
            .iter_family::<String, TokenMetadata>(DB_TOKEN_DATA)
            .take(MAX_DATABASE_RESULTS)
        {
            let (name, metadata) = item?;
            if matches_filter(&name) {
                matches.push(metadata);
            }
        }
        Ok(paginate(matches, count, start))
    }

    /// Balances of every token held by one address.
    pub fn address_dir(
        &self,
        address: &str,
        only_total: bool,
        count: usize,
        start: i64,
    ) -> Result<(Vec<(String, Amount)>, usize)> {
        let mut matches = Vec::new();
        for item in self
            .db
            .iter_family::<(String, String), Amount>(DB_ADDRESS_TOKEN_QUANTITY)
            .take(MAX_DATABASE_RESULTS)
        {
            let ((entry_address, name), amount) = item?;
            if entry_address == address {
                matches.push((name, amount));
            }
        }
        let total = matches.len();
        if only_total {
            return Ok((Vec::new(), total));
        }
        Ok(paginate(matches, count, start))
    }

    /// Balances of one token across every address holding it.
    pub fn token_address_dir(
        &self,
        name: &str,
        only_total: bool,
        count: usize,
        start: i64,
    ) -> Result<(Vec<(String, Amount)>, usize)> {
        let mut matches = Vec::new();
        for item in self
            .db
            .iter_family::<(String, String), Amount>(DB_TOKEN_ADDRESS_QUANTITY)
            .take(MAX_DATABASE_RESULTS)
        {
            let ((entry_name, address), amount) = item?;
            if entry_name == name {
                matches.push((address, amount));
            }
        }
        let total = matches.len();
        if only_total {
            return Ok((Vec::new(), total));
        }
        Ok(paginate(matches, count, start))
    }
}

fn name_filter(filter: &str) -> impl Fn(&str) -> bool {
    let filter = filter.to_string();
    move |name: &str| {
        if filter.is_empty() || filter == "*" {
            return true;
        }
        match filter.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => name == filter,
        }
    }
}

fn paginate<T>(matches: Vec<T>, count: usize, start: i64) -> (Vec<T>, usize) {
    let total = matches.len();
    let offset = if start < 0 {
        total.saturating_sub(start.unsigned_abs() as usize)
    } else {
        (start as usize).min(total)
    };
    let page = matches.into_iter().skip(offset).take(count).collect();
    (page, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IssueToken;
    use lumen_primitives::amount::COIN;

    fn open_db() -> (tempfile::TempDir, TokensDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = TokensDb::open(dir.path()).unwrap();
        (dir, db)
    }

    fn metadata(name: &str) -> TokenMetadata {
        TokenMetadata::new(
            IssueToken::new(name, Amount::from_sat(100 * COIN)),
            1,
            BlockHash::all_zeros(),
        )
    }

    fn seed(db: &TokensDb) {
        let mut batch = Batch::new();
        for name in ["GOLD", "GOLD/BAR", "GOLDEN", "SILVER"] {
            TokensDb::batch_write_token_data(&mut batch, &metadata(name));
        }
        TokensDb::batch_write_quantity(&mut batch, "GOLD", "addr1", Amount::from_sat(60 * COIN));
        TokensDb::batch_write_quantity(&mut batch, "GOLD", "addr2", Amount::from_sat(40 * COIN));
        TokensDb::batch_write_quantity(&mut batch, "SILVER", "addr1", Amount::from_sat(5 * COIN));
        db.write_batch(batch).unwrap();
    }

    #[test]
    fn point_round_trip() {
        let (_dir, db) = open_db();
        let meta = metadata("GOLD");
        let mut batch = Batch::new();
        TokensDb::batch_write_token_data(&mut batch, &meta);
        db.write_batch(batch).unwrap();

        assert!(db.token_exists("GOLD").unwrap());
        assert_eq!(db.read_token_data("GOLD").unwrap(), Some(meta));
        assert_eq!(db.read_token_data("IRON").unwrap(), None);
    }

    #[test]
    fn token_dir_filters_and_paginates() {
        let (_dir, db) = open_db();
        seed(&db);

        let (all, total) = db.token_dir("*", 100, 0).unwrap();
        assert_eq!(total, 4);
        assert_eq!(all.len(), 4);

        let (gold, total) = db.token_dir("GOLD*", 100, 0).unwrap();
        assert_eq!(total, 3);
        assert!(gold.iter().all(|m| m.token.name.starts_with("GOLD")));

        let (exact, total) = db.token_dir("GOLD", 100, 0).unwrap();
        assert_eq!((exact.len(), total), (1, 1));

        // Pagination from the end.
        let (page, total) = db.token_dir("*", 10, -2).unwrap();
        assert_eq!(total, 4);
        assert_eq!(page.len(), 2);

        let (page, _) = db.token_dir("*", 2, 1).unwrap();
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn address_dir_by_holder_and_by_token() {
        let (_dir, db) = open_db();
        seed(&db);

        let (held, total) = db.address_dir("addr1", false, 100, 0).unwrap();
        assert_eq!(total, 2);
        assert!(held.iter().any(|(name, _)| name == "GOLD"));
        assert!(held.iter().any(|(name, _)| name == "SILVER"));

        let (_, only_total) = db.address_dir("addr1", true, 100, 0).unwrap();
        assert_eq!(only_total, 2);

        let (holders, total) = db.token_address_dir("GOLD", false, 100, 0).unwrap();
        assert_eq!(total, 2);
        let sum: i64 = holders.iter().map(|(_, amount)| amount.to_sat()).sum();
        assert_eq!(sum, 100 * COIN);
    }

    #[test]
    fn block_undo_round_trip() {
        let (_dir, db) = open_db();
        let hash = BlockHash::all_zeros();
        // Missing undo data reads back empty, not an error.
        assert!(db.read_block_undo(&hash).unwrap().is_empty());

        let undo = vec![ReissueUndo {
            name: "GOLD".to_string(),
            changed_units: true,
            previous_units: 2,
        }];
        let mut batch = Batch::new();
        TokensDb::batch_write_block_undo(&mut batch, &hash, &undo);
        db.write_batch(batch).unwrap();
        assert_eq!(db.read_block_undo(&hash).unwrap(), undo);

        let mut batch = Batch::new();
        TokensDb::batch_erase_block_undo(&mut batch, &hash);
        db.write_batch(batch).unwrap();
        assert!(db.read_block_undo(&hash).unwrap().is_empty());
    }
}
