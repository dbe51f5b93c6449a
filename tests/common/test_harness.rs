/// Full integration test harness for zmirror
///
/// Wires a real RocksDB-backed block store, the mock source chain, the
/// mempool + block builder task and the oracle service the same way `main`
/// does, with temporary directories cleaned up on drop.
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use zmirror::config::AppConfig;
use zmirror::consts::{MAX_MEMPOOL_SIZE, MIRROR_NAMESPACE};
use zmirror::core::builder::{BlockBuilder, init_genesis};
use zmirror::core::oracle::OracleService;
use zmirror::core::source::SourceChainClient;
use zmirror::runtime::block_store::BlockStore;
use zmirror::runtime::mdb::{Mdb, open_rocks};
use zmirror::runtime::mempool::{Mempool, mempool};
use zmirror::runtime::tracker::RequestTracker;
use zmirror::test_utils::{MockSourceChain, TestConfigBuilder};

pub struct OracleTestHarness {
    pub config: AppConfig,
    pub store: Arc<BlockStore>,
    pub source: Arc<MockSourceChain>,
    pub service: Arc<OracleService>,
    pub mempool: Mempool,
    pub shutdown: CancellationToken,

    // Resource cleanup
    _temp_dir: TempDir,
}

impl OracleTestHarness {
    /// Source chain with blocks `0..=source_height`, mirrored chain holding only genesis.
    pub fn new(source_height: u64, confirmation_depth: u64) -> Result<Self> {
        let (config, temp_dir) =
            TestConfigBuilder::new().with_confirmation_depth(confirmation_depth).build();

        let db = open_rocks(std::path::Path::new(&config.db_path).join("mirror"))?;
        let mdb = Mdb::from_db(Arc::new(db), MIRROR_NAMESPACE);
        let store = Arc::new(BlockStore::new(Arc::new(mdb), config.block_cache_size));
        init_genesis(&store, &config.genesis_data)?;

        let source = Arc::new(MockSourceChain::with_height(source_height));
        let shutdown = CancellationToken::new();
        let (pool, queue) = mempool(MAX_MEMPOOL_SIZE);
        tokio::spawn(BlockBuilder::new(Arc::clone(&store), queue).run(shutdown.clone()));

        let service = Arc::new(OracleService::new(
            Arc::clone(&store),
            SourceChainClient::new(source.clone(), config.confirmation_depth),
            Arc::new(RequestTracker::new(config.tracker_stale_after)),
            pool.clone(),
            config.backfill_timeout,
            shutdown.clone(),
        ));

        Ok(Self { config, store, source, service, mempool: pool, shutdown, _temp_dir: temp_dir })
    }

    /// Block until no backfill for `height` is in flight.
    pub async fn wait_for_backfill(&self, height: u64) {
        if let Some(signal) = self.service.tracker().is_processing(height) {
            tokio::time::timeout(Duration::from_secs(5), signal.wait())
                .await
                .expect("backfill finished in time");
        }
    }
}

impl Drop for OracleTestHarness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
