//! Ordered key/value persistence over RocksDB.
//!
//! Keys are consensus-serialized with a leading tag byte per entry family,
//! so a prefix scan of one tag visits exactly that family before a foreign
//! tag sorts higher. Writes group into atomic batches; one batch per logical
//! state transition.

use lumen_primitives::encode::{deserialize, serialize, Decodable, Encodable};
use rocksdb::{IteratorMode, Options, WriteBatch, DB};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("storage backend error: {0}")]
    Backend(#[from] rocksdb::Error),

    #[error("corrupt record under key {key_hex}: {source}")]
    Corrupt {
        key_hex: String,
        #[source]
        source: lumen_primitives::encode::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A handle to one on-disk key/value store.
pub struct Database {
    db: DB,
}

impl Database {
    /// Open or create a store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)?;
        tracing::debug!(path = %path.display(), "opened database");
        Ok(Database { db })
    }

    pub fn read<K: Encodable, V: Decodable>(&self, key: &K) -> Result<Option<V>> {
        let raw_key = serialize(key);
        match self.db.get(&raw_key)? {
            Some(bytes) => {
                let value = deserialize(&bytes).map_err(|source| Error::Corrupt {
                    key_hex: hex::encode(&raw_key),
                    source,
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub fn write<K: Encodable, V: Encodable>(&self, key: &K, value: &V) -> Result<()> {
        Ok(self.db.put(serialize(key), serialize(value))?)
    }

    pub fn erase<K: Encodable>(&self, key: &K) -> Result<()> {
        Ok(self.db.delete(serialize(key))?)
    }

    pub fn exists<K: Encodable>(&self, key: &K) -> Result<bool> {
        Ok(self.db.get(serialize(key))?.is_some())
    }

    pub fn is_empty(&self) -> Result<bool> {
        let mut iter = self.db.iterator(IteratorMode::Start);
        match iter.next() {
            Some(item) => {
                item?;
                Ok(false)
            }
            None => Ok(true),
        }
    }

    /// Commit a batch atomically. On error nothing is applied.
    pub fn write_batch(&self, batch: Batch) -> Result<()> {
        Ok(self.db.write(batch.inner)?)
    }

    /// Flush WAL and memtables to disk.
    pub fn sync(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Iterate all `(key, value)` pairs whose key starts with `prefix`,
    /// in key order. The iterator holds a read snapshot.
    pub fn prefix_iterator(&self, prefix: &[u8]) -> PrefixIter<'_> {
        PrefixIter {
            inner: self.db.iterator(IteratorMode::From(
                prefix,
                rocksdb::Direction::Forward,
            )),
            prefix: prefix.to_vec(),
        }
    }

    /// Decoded prefix iteration over one entry family.
    pub fn iter_family<K: Decodable, V: Decodable>(
        &self,
        tag: u8,
    ) -> impl Iterator<Item = Result<(K, V)>> + '_ {
        self.prefix_iterator(&[tag]).map(|item| {
            let (raw_key, raw_value) = item?;
            let key = deserialize::<(u8, K)>(&raw_key)
                .map(|(_, key)| key)
                .map_err(|source| Error::Corrupt {
                    key_hex: hex::encode(&raw_key),
                    source,
                })?;
            let value = deserialize(&raw_value).map_err(|source| Error::Corrupt {
                key_hex: hex::encode(&raw_key),
                source,
            })?;
            Ok((key, value))
        })
    }
}

/// An atomic group of writes.
#[derive(Default)]
pub struct Batch {
    inner: WriteBatch,
}

impl Batch {
    pub fn new() -> Self {
        Batch::default()
    }

    pub fn write<K: Encodable, V: Encodable>(&mut self, key: &K, value: &V) {
        self.inner.put(serialize(key), serialize(value));
    }

    pub fn erase<K: Encodable>(&mut self, key: &K) {
        self.inner.delete(serialize(key));
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

pub struct PrefixIter<'a> {
    inner: rocksdb::DBIterator<'a>,
    prefix: Vec<u8>,
}

impl Iterator for PrefixIter<'_> {
    type Item = Result<(Box<[u8]>, Box<[u8]>)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok((key, value)) => {
                if !key.starts_with(&self.prefix) {
                    return None;
                }
                Some(Ok((key, value)))
            }
            Err(err) => Some(Err(err.into())),
        }
    }
}
