use rocksdb::{BlockBasedOptions, Cache, DB, Error as RocksError, Options, WriteBatch};
use std::{path::Path, sync::Arc};

use crate::error::StoreError;

/// ===== Cache / open-time tuning =====
/// RocksDB's own block cache; independent of the decoded-block LRU in `BlockStore`.
pub const ROCKS_BLOCK_CACHE_BYTES: usize = 256 << 20; // 256 MiB

/// Bloom filter bits/key (helps point lookups).
pub const BLOOM_BITS_PER_KEY: f64 = 10.0;

/// A single write inside an atomic batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KvWrite {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Byte-oriented key-value store the block store persists into.
///
/// Single-key reads and writes are atomic; `write_batch` applies all of its
/// operations or none.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;
    fn write_batch(&self, ops: Vec<KvWrite>) -> Result<(), StoreError>;
}

/// Namespaced view over a shared RocksDB handle.
#[derive(Clone)]
pub struct Mdb {
    db: Arc<DB>,
    prefix: Vec<u8>,
}

impl Mdb {
    pub fn from_db(db: Arc<DB>, prefix: impl AsRef<[u8]>) -> Self {
        Self { db, prefix: prefix.as_ref().to_vec() }
    }

    #[inline]
    pub fn prefixed(&self, k: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.prefix.len() + k.len());
        out.extend_from_slice(&self.prefix);
        out.extend_from_slice(k);
        out
    }

    pub fn get(&self, k: &[u8]) -> Result<Option<Vec<u8>>, RocksError> {
        self.db.get(self.prefixed(k))
    }

    pub fn put(&self, k: &[u8], v: &[u8]) -> Result<(), RocksError> {
        self.db.put(self.prefixed(k), v)
    }

    pub fn delete(&self, k: &[u8]) -> Result<(), RocksError> {
        self.db.delete(self.prefixed(k))
    }

    pub fn bulk_write<F>(&self, build: F) -> Result<(), RocksError>
    where
        F: FnOnce(&mut MdbBatch<'_>),
    {
        let mut wb = WriteBatch::default();
        {
            let mut mb = MdbBatch { mdb: self, wb: &mut wb };
            build(&mut mb);
        }
        self.db.write(wb)
    }

    #[inline]
    pub fn inner_db(&self) -> &DB {
        &self.db
    }
}

/// Open (or create) the node's RocksDB with point-lookup friendly table options.
pub fn open_rocks(path: impl AsRef<Path>) -> Result<DB, RocksError> {
    let cache = Cache::new_lru_cache(ROCKS_BLOCK_CACHE_BYTES);

    let mut table = BlockBasedOptions::default();
    table.set_block_cache(&cache);
    // Put index + filter in the cache (hot metadata)
    table.set_cache_index_and_filter_blocks(true);
    table.set_pin_l0_filter_and_index_blocks_in_cache(true);
    table.set_bloom_filter(BLOOM_BITS_PER_KEY, false);

    let mut opts = Options::default();
    opts.create_if_missing(true);
    // Keep readers open (avoid fd thrash)
    opts.set_max_open_files(-1);
    opts.set_block_based_table_factory(&table);

    DB::open(&opts, path)
}

pub struct MdbBatch<'a> {
    mdb: &'a Mdb,
    wb: &'a mut WriteBatch,
}

impl<'a> MdbBatch<'a> {
    #[inline]
    pub fn put(&mut self, k: &[u8], v: &[u8]) {
        self.wb.put(self.mdb.prefixed(k), v);
    }
    #[inline]
    pub fn delete(&mut self, k: &[u8]) {
        self.wb.delete(self.mdb.prefixed(k));
    }
}

impl KvStore for Mdb {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(Mdb::get(self, key)?)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        Ok(Mdb::put(self, key, value)?)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        Ok(Mdb::delete(self, key)?)
    }

    fn write_batch(&self, ops: Vec<KvWrite>) -> Result<(), StoreError> {
        self.bulk_write(|wb| {
            for op in &ops {
                match op {
                    KvWrite::Put(k, v) => wb.put(k, v),
                    KvWrite::Delete(k) => wb.delete(k),
                }
            }
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_db() -> (Arc<DB>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, temp_dir.path()).unwrap();
        (Arc::new(db), temp_dir)
    }

    #[test]
    fn namespaces_do_not_collide() {
        let (db, _temp) = create_test_db();
        let a = Mdb::from_db(db.clone(), b"a/");
        let b = Mdb::from_db(db, b"b/");

        Mdb::put(&a, b"k", b"1").unwrap();
        assert_eq!(Mdb::get(&a, b"k").unwrap(), Some(b"1".to_vec()));
        assert_eq!(Mdb::get(&b, b"k").unwrap(), None);
        assert_eq!(a.inner_db().get(b"a/k").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn write_batch_applies_puts_and_deletes() {
        let (db, _temp) = create_test_db();
        let mdb = Mdb::from_db(db, b"ns/");
        Mdb::put(&mdb, b"gone", b"x").unwrap();

        KvStore::write_batch(
            &mdb,
            vec![
                KvWrite::Put(b"k1".to_vec(), b"v1".to_vec()),
                KvWrite::Put(b"k2".to_vec(), b"v2".to_vec()),
                KvWrite::Delete(b"gone".to_vec()),
            ],
        )
        .unwrap();

        assert_eq!(KvStore::get(&mdb, b"k1").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(KvStore::get(&mdb, b"k2").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(KvStore::get(&mdb, b"gone").unwrap(), None);
    }
}
