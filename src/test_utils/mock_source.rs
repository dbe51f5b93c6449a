use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::core::source::SourceChainRpc;
use crate::error::{OracleError, OracleResult};
use crate::schemas::SourceBlockSnapshot;

#[derive(Default)]
struct MockState {
    hashes: BTreeMap<u64, String>,
    tip: u64,
    fail_next: HashSet<&'static str>,
    /// Height the node lies about in `getblock`, keyed by the real height.
    misreported: HashMap<u64, u64>,
    latency: Option<Duration>,
    calls: HashMap<&'static str, usize>,
}

/// In-memory source chain node.
/// Block hashes default to `h{height}`; reorgs rewrite them with a suffix.
pub struct MockSourceChain {
    state: Mutex<MockState>,
}

impl MockSourceChain {
    /// Chain with blocks 0..=`tip`.
    pub fn with_height(tip: u64) -> Self {
        let hashes = (0..=tip).map(|h| (h, format!("h{h}"))).collect();
        Self { state: Mutex::new(MockState { hashes, tip, ..Default::default() }) }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn hash_at(&self, height: u64) -> Option<String> {
        self.state().hashes.get(&height).cloned()
    }

    /// Overwrite the hash the node reports for `height`.
    pub fn set_hash(&self, height: u64, hash: impl Into<String>) {
        self.state().hashes.insert(height, hash.into());
    }

    /// Mine blocks until the head reaches `tip`.
    pub fn extend_to(&self, tip: u64) {
        let mut st = self.state();
        for h in st.tip + 1..=tip {
            st.hashes.insert(h, format!("h{h}"));
        }
        st.tip = st.tip.max(tip);
    }

    /// Replace every block from `fork_height` up with `h{height}-{tag}`.
    pub fn reorg(&self, fork_height: u64, tag: &str) {
        let mut st = self.state();
        for (h, hash) in st.hashes.range_mut(fork_height..) {
            *hash = format!("h{h}-{tag}");
        }
    }

    /// Make the next call to `method` fail at the transport level.
    pub fn fail_next(&self, method: &'static str) {
        self.state().fail_next.insert(method);
    }

    /// Make `getblock` for `height` report `reported` instead.
    pub fn corrupt_height(&self, height: u64, reported: u64) {
        self.state().misreported.insert(height, reported);
    }

    /// Delay every `getblock` response.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = Some(latency);
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state().calls.get(method).copied().unwrap_or(0)
    }

    /// Snapshot the node would return for `height`.
    pub fn snapshot_at(&self, height: u64) -> Option<SourceBlockSnapshot> {
        let st = self.state();
        let hash = st.hashes.get(&height)?.clone();
        let mut snap = SourceBlockSnapshot::summary(hash, height);
        snap.confirmations = (st.tip.saturating_sub(height) + 1) as i64;
        snap.time = 1_477_641_360 + height as i64 * 150;
        snap.previous_block_hash = height.checked_sub(1).and_then(|p| st.hashes.get(&p).cloned());
        snap.next_block_hash = st.hashes.get(&(height + 1)).cloned();
        Some(snap)
    }

    fn enter(&self, method: &'static str) -> OracleResult<()> {
        let mut st = self.state();
        *st.calls.entry(method).or_default() += 1;
        if st.fail_next.remove(method) {
            return Err(OracleError::fetch_failed(method, "connection reset by mock"));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceChainRpc for MockSourceChain {
    async fn get_block_hash(&self, height: u64) -> OracleResult<String> {
        self.enter("getblockhash")?;
        self.hash_at(height).ok_or(OracleError::HeightNotFound(height))
    }

    async fn get_block(&self, hash: &str) -> OracleResult<SourceBlockSnapshot> {
        self.enter("getblock")?;
        let latency = self.state().latency;
        if let Some(d) = latency {
            tokio::time::sleep(d).await;
        }

        let height = {
            let st = self.state();
            st.hashes.iter().find(|(_, h)| h.as_str() == hash).map(|(height, _)| *height)
        };
        let height = height.ok_or_else(|| OracleError::fetch_failed("getblock", "Block not found"))?;
        let mut snap = self
            .snapshot_at(height)
            .ok_or_else(|| OracleError::fetch_failed("getblock", "Block not found"))?;
        if let Some(reported) = self.state().misreported.get(&height) {
            snap.height = *reported;
        }
        Ok(snap)
    }

    async fn get_block_count(&self) -> OracleResult<u64> {
        self.enter("getblockcount")?;
        Ok(self.state().tip)
    }
}
