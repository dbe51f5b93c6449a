use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::consts::{DEFAULT_BLOCK_CACHE_SIZE, HEIGHT_INDEX_TAG, INITIALIZED_KEY, LAST_ACCEPTED_KEY};
use crate::error::{OracleError, OracleResult};
use crate::runtime::mdb::{KvStore, KvWrite};
use crate::schemas::{BlockEnvelope, BlockId, BlockStatus, MirroredBlock};

/// `None` is the negative-cache marker: the ID is known to be absent from the DB.
type CachedBlock = Option<Arc<MirroredBlock>>;

/// Result of a backward height scan, with the number of blocks visited.
#[derive(Debug)]
pub struct ScanOutcome {
    pub found: Option<Arc<MirroredBlock>>,
    pub steps: usize,
}

/// Cache + persistent store of mirrored blocks, keyed by content ID.
///
/// Key layout inside the store's namespace:
/// - `0x00` → last accepted block ID
/// - `0x01` → initialized marker
/// - `<32-byte id>` → borsh `BlockEnvelope`
/// - `'H' ‖ be_u64(source height)` → block ID (secondary height index)
pub struct BlockStore {
    kv: Arc<dyn KvStore>,
    cache: Mutex<LruCache<BlockId, CachedBlock>>,
    last_accepted: RwLock<Option<BlockId>>,
}

impl BlockStore {
    pub fn new(kv: Arc<dyn KvStore>, cache_size: usize) -> Self {
        let cap = NonZeroUsize::new(cache_size)
            .or_else(|| NonZeroUsize::new(DEFAULT_BLOCK_CACHE_SIZE))
            .unwrap_or(NonZeroUsize::MIN);
        Self { kv, cache: Mutex::new(LruCache::new(cap)), last_accepted: RwLock::new(None) }
    }

    #[inline]
    fn cache(&self) -> MutexGuard<'_, LruCache<BlockId, CachedBlock>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn height_key(height: u64) -> [u8; 9] {
        let mut k = [0u8; 9];
        k[0] = HEIGHT_INDEX_TAG;
        k[1..].copy_from_slice(&height.to_be_bytes());
        k
    }

    /// Source height a block should be indexed under, if its payload is a snapshot.
    fn indexed_height(block: &MirroredBlock) -> Option<u64> {
        if block.is_genesis() {
            return None;
        }
        block.snapshot().ok().flatten().map(|s| s.height)
    }

    pub fn get(&self, id: &BlockId) -> OracleResult<Arc<MirroredBlock>> {
        if let Some(cached) = self.cache().get(id) {
            return match cached {
                Some(blk) => Ok(Arc::clone(blk)),
                None => {
                    trace!(%id, "negative cache hit");
                    Err(OracleError::BlockNotFound(*id))
                }
            };
        }

        let Some(raw) = self.kv.get(id.as_bytes())? else {
            // Remember the miss so repeated lookups stay off the DB.
            self.cache().put(*id, None);
            return Err(OracleError::BlockNotFound(*id));
        };

        let envelope = BlockEnvelope::decode(&raw)?;
        let block = MirroredBlock::from_body(&envelope.body, envelope.status)?;
        if block.id != *id {
            return Err(OracleError::DataIntegrity {
                id: *id,
                height: block.height,
                reason: format!("body hashes to {}", block.id),
            });
        }

        let block = Arc::new(block);
        self.cache().put(*id, Some(Arc::clone(&block)));
        Ok(block)
    }

    /// Persist `block` under its ID. The last accepted pointer is left alone.
    pub fn put(&self, block: &MirroredBlock) -> OracleResult<()> {
        let encoded = block.envelope()?.encode()?;

        let mut ops = vec![KvWrite::Put(block.id.as_bytes().to_vec(), encoded)];
        if let Some(h) = Self::indexed_height(block) {
            ops.push(KvWrite::Put(Self::height_key(h).to_vec(), block.id.as_bytes().to_vec()));
        }

        self.kv.write_batch(ops)?;
        self.cache().put(block.id, Some(Arc::new(block.clone())));
        debug!(id = %block.id, height = block.height, status = ?block.status, "stored mirrored block");
        Ok(())
    }

    pub fn delete(&self, id: &BlockId) -> OracleResult<()> {
        let existing = match self.get(id) {
            Ok(blk) => Some(blk),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let mut ops = vec![KvWrite::Delete(id.as_bytes().to_vec())];
        if let Some(h) = existing.as_deref().and_then(Self::indexed_height) {
            let key = Self::height_key(h);
            if self.kv.get(&key)?.as_deref() == Some(id.as_bytes()) {
                ops.push(KvWrite::Delete(key.to_vec()));
            }
        }

        self.kv.write_batch(ops)?;
        self.cache().put(*id, None);
        Ok(())
    }

    pub fn last_accepted(&self) -> OracleResult<BlockId> {
        if let Some(id) = *self.last_accepted.read().unwrap_or_else(PoisonError::into_inner) {
            return Ok(id);
        }

        // Load under the write lock so a concurrent set is never overwritten.
        let mut current = self.last_accepted.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = *current {
            return Ok(id);
        }
        let raw = self.kv.get(LAST_ACCEPTED_KEY)?.ok_or(OracleError::StateUninitialized)?;
        let id = BlockId::from_slice(&raw).ok_or_else(|| {
            OracleError::Codec(format!("last accepted key holds {} bytes", raw.len()))
        })?;
        *current = Some(id);
        Ok(id)
    }

    pub fn set_last_accepted(&self, id: BlockId) -> OracleResult<()> {
        let mut current = self.last_accepted.write().unwrap_or_else(PoisonError::into_inner);
        if *current == Some(id) {
            return Ok(());
        }
        self.kv.put(LAST_ACCEPTED_KEY, id.as_bytes())?;
        *current = Some(id);
        Ok(())
    }

    pub fn is_initialized(&self) -> OracleResult<bool> {
        Ok(self.kv.get(INITIALIZED_KEY)?.is_some())
    }

    pub fn set_initialized(&self) -> OracleResult<()> {
        Ok(self.kv.put(INITIALIZED_KEY, &[1u8])?)
    }

    /// Mirrored block whose embedded snapshot has source height `target`.
    pub fn get_by_height(&self, target: u64) -> OracleResult<Arc<MirroredBlock>> {
        self.get_by_height_with(target, &CancellationToken::new())
    }

    pub fn get_by_height_with(
        &self,
        target: u64,
        cancel: &CancellationToken,
    ) -> OracleResult<Arc<MirroredBlock>> {
        if let Some(blk) = self.lookup_height_index(target)? {
            return Ok(blk);
        }

        let outcome = self.scan_by_height(target, cancel)?;
        match outcome.found {
            Some(blk) => {
                self.kv.put(&Self::height_key(target), blk.id.as_bytes())?;
                Ok(blk)
            }
            None => Err(OracleError::HeightNotFound(target)),
        }
    }

    /// Index entries are hints: only an Accepted block whose snapshot still
    /// carries `target` is returned.
    fn lookup_height_index(&self, target: u64) -> OracleResult<Option<Arc<MirroredBlock>>> {
        let Some(raw) = self.kv.get(&Self::height_key(target))? else {
            return Ok(None);
        };
        let Some(id) = BlockId::from_slice(&raw) else {
            warn!(height = target, "malformed height index entry; falling back to scan");
            return Ok(None);
        };
        let blk = match self.get(&id) {
            Ok(blk) => blk,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        if blk.status != BlockStatus::Accepted || Self::indexed_height(&blk) != Some(target) {
            debug!(height = target, %id, "stale height index entry");
            return Ok(None);
        }
        Ok(Some(blk))
    }

    /// Walk parent links from the last accepted block until a snapshot with
    /// height `target` is found or genesis is reached.
    pub fn scan_by_height(
        &self,
        target: u64,
        cancel: &CancellationToken,
    ) -> OracleResult<ScanOutcome> {
        let mut id = self.last_accepted()?;
        let mut steps = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(OracleError::Cancelled);
            }
            let blk = self.get(&id)?;
            steps += 1;

            // Genesis carries raw genesis data, never a snapshot.
            if blk.is_genesis() {
                return Ok(ScanOutcome { found: None, steps });
            }
            if let Some(snapshot) = blk.snapshot()? {
                if snapshot.height == target {
                    return Ok(ScanOutcome { found: Some(blk), steps });
                }
            }
            id = blk.parent_id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mdb::Mdb;
    use crate::schemas::SourceBlockSnapshot;
    use crate::test_utils::{CountingStore, MemoryStore, MirroredChainBuilder};
    use rocksdb::{DB, Options};
    use tempfile::TempDir;

    fn rocks_store() -> (BlockStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, temp_dir.path()).unwrap();
        let mdb = Mdb::from_db(Arc::new(db), b"mirror/");
        (BlockStore::new(Arc::new(mdb), 16), temp_dir)
    }

    fn snapshot_block(parent: BlockId, height: u64, hash: &str) -> MirroredBlock {
        let payload = SourceBlockSnapshot::summary(hash, height).to_payload().unwrap();
        MirroredBlock::new(parent, height, 1_700_000_000 + height as i64, payload, BlockStatus::Accepted)
            .unwrap()
    }

    #[test]
    fn put_then_get_round_trips_every_field() {
        let (store, _temp) = rocks_store();
        let mut blk = snapshot_block(BlockId::ZERO, 7, "h7");
        blk.status = BlockStatus::Processing;
        store.put(&blk).unwrap();

        assert_eq!(*store.get(&blk.id).unwrap(), blk);

        // A fresh store over the same DB decodes the persisted envelope.
        let reopened = BlockStore::new(Arc::clone(&store.kv), 16);
        assert_eq!(*reopened.get(&blk.id).unwrap(), blk);
    }

    #[test]
    fn repeated_miss_is_served_from_negative_cache() {
        let counting = Arc::new(CountingStore::new(MemoryStore::default()));
        let store = BlockStore::new(counting.clone(), 16);
        let missing = BlockId::digest(b"missing");

        assert!(matches!(store.get(&missing), Err(OracleError::BlockNotFound(_))));
        assert_eq!(counting.gets(), 1);
        assert!(matches!(store.get(&missing), Err(OracleError::BlockNotFound(_))));
        assert!(matches!(store.get(&missing), Err(OracleError::BlockNotFound(_))));
        assert_eq!(counting.gets(), 1);
    }

    #[test]
    fn cache_eviction_falls_back_to_db() {
        let counting = Arc::new(CountingStore::new(MemoryStore::default()));
        let store = BlockStore::new(counting.clone(), 1);
        let a = snapshot_block(BlockId::ZERO, 1, "a");
        let b = snapshot_block(a.id, 2, "b");
        store.put(&a).unwrap();
        store.put(&b).unwrap();

        let before = counting.gets();
        assert_eq!(*store.get(&a.id).unwrap(), a);
        assert_eq!(counting.gets(), before + 1);
    }

    #[test]
    fn delete_marks_absent_and_removes_from_db() {
        let (store, _temp) = rocks_store();
        let blk = snapshot_block(BlockId::ZERO, 3, "h3");
        store.put(&blk).unwrap();
        store.delete(&blk.id).unwrap();

        assert!(matches!(store.get(&blk.id), Err(OracleError::BlockNotFound(_))));
        assert_eq!(store.kv.get(blk.id.as_bytes()).unwrap(), None);
        assert_eq!(store.kv.get(&BlockStore::height_key(3)).unwrap(), None);
    }

    #[test]
    fn failed_batch_leaves_cache_untouched() {
        let counting = Arc::new(CountingStore::new(MemoryStore::default()));
        let store = BlockStore::new(counting.clone(), 16);
        let kept = snapshot_block(BlockId::ZERO, 1, "h1");
        store.put(&kept).unwrap();

        counting.fail_batches(true);
        let lost = snapshot_block(kept.id, 2, "h2");
        assert!(matches!(store.put(&lost), Err(OracleError::Storage(_))));
        assert!(matches!(store.get(&lost.id), Err(OracleError::BlockNotFound(_))));

        assert!(matches!(store.delete(&kept.id), Err(OracleError::Storage(_))));
        assert_eq!(*store.get(&kept.id).unwrap(), kept);
        assert_eq!(counting.batches(), 3);

        counting.fail_batches(false);
        store.put(&lost).unwrap();
        assert_eq!(*store.get(&lost.id).unwrap(), lost);
    }

    #[test]
    fn concurrent_load_does_not_clobber_newer_pointer() {
        let mem = Arc::new(MemoryStore::default());
        let old = BlockId::digest(b"old");
        let new = BlockId::digest(b"new");
        mem.put(LAST_ACCEPTED_KEY, old.as_bytes()).unwrap();
        let store = Arc::new(BlockStore::new(mem, 16));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    if i == 0 {
                        store.set_last_accepted(new).unwrap();
                    } else {
                        store.last_accepted().unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.last_accepted().unwrap(), new);
    }

    #[test]
    fn last_accepted_requires_initialization() {
        let (store, _temp) = rocks_store();
        assert!(matches!(store.last_accepted(), Err(OracleError::StateUninitialized)));

        let id = BlockId::digest(b"tip");
        store.set_last_accepted(id).unwrap();
        assert_eq!(store.last_accepted().unwrap(), id);

        let reopened = BlockStore::new(Arc::clone(&store.kv), 16);
        assert_eq!(reopened.last_accepted().unwrap(), id);
    }

    #[test]
    fn set_last_accepted_is_idempotent() {
        let counting = Arc::new(CountingStore::new(MemoryStore::default()));
        let store = BlockStore::new(counting.clone(), 16);
        let id = BlockId::digest(b"tip");

        store.set_last_accepted(id).unwrap();
        let puts = counting.puts();
        store.set_last_accepted(id).unwrap();
        assert_eq!(counting.puts(), puts);
        assert_eq!(store.last_accepted().unwrap(), id);
    }

    #[test]
    fn scan_terminates_within_distance_from_tip() {
        let (store, _temp) = rocks_store();
        let chain = MirroredChainBuilder::new().add_snapshots(10).build();
        chain.store_into(&store).unwrap();
        let cancel = CancellationToken::new();

        for h in 1..=10u64 {
            let out = store.scan_by_height(h, &cancel).unwrap();
            assert_eq!(out.found.unwrap().height, h);
            assert!(out.steps as u64 <= 10 - h + 1, "height {h} took {} steps", out.steps);
        }

        let out = store.scan_by_height(11, &cancel).unwrap();
        assert!(out.found.is_none());
        assert_eq!(out.steps, 11);
    }

    #[test]
    fn get_by_height_reports_not_found_for_gaps() {
        let (store, _temp) = rocks_store();
        // Source heights 1, 2, 4: height 3 was never mirrored.
        let chain = MirroredChainBuilder::new()
            .add_snapshot("s1", 1)
            .add_snapshot("s2", 2)
            .add_snapshot("s4", 4)
            .build();
        chain.store_into(&store).unwrap();

        assert!(matches!(store.get_by_height(3), Err(OracleError::HeightNotFound(3))));
        assert!(matches!(store.get_by_height(0), Err(OracleError::HeightNotFound(0))));
        assert_eq!(store.get_by_height(4).unwrap().id, chain.tip().id);
    }

    #[test]
    fn stale_index_entry_falls_back_to_scan() {
        let (store, _temp) = rocks_store();
        let chain = MirroredChainBuilder::new().add_snapshots(3).build();
        chain.store_into(&store).unwrap();

        // A rejected sibling at source height 2 overwrites the index entry.
        let rejected = {
            let mut b = snapshot_block(chain.blocks[1].id, 2, "orphan");
            b.status = BlockStatus::Rejected;
            b
        };
        store.put(&rejected).unwrap();

        let found = store.get_by_height(2).unwrap();
        assert_eq!(found.id, chain.blocks[2].id);
        assert_eq!(
            store.kv.get(&BlockStore::height_key(2)).unwrap(),
            Some(found.id.as_bytes().to_vec())
        );
    }

    #[test]
    fn cancelled_scan_stops() {
        let (store, _temp) = rocks_store();
        MirroredChainBuilder::new().add_snapshots(3).build().store_into(&store).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(store.scan_by_height(1, &cancel), Err(OracleError::Cancelled)));
    }

    #[test]
    fn corrupt_payload_surfaces_as_data_integrity() {
        let (store, _temp) = rocks_store();
        let chain = MirroredChainBuilder::new().add_snapshots(1).build();
        chain.store_into(&store).unwrap();
        let bad =
            MirroredBlock::new(chain.tip().id, 2, 0, b"garbage".to_vec(), BlockStatus::Accepted)
                .unwrap();
        store.put(&bad).unwrap();
        store.set_last_accepted(bad.id).unwrap();

        // Height 1 is still served from the index; a scan has to cross the bad block.
        assert_eq!(store.get_by_height(1).unwrap().id, chain.tip().id);
        assert!(matches!(store.get_by_height(5), Err(OracleError::DataIntegrity { .. })));
    }
}
