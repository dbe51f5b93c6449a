// End-to-end mirroring and reconciliation over a real RocksDB store

mod common;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use zmirror::core::reconcile::ReconciliationEngine;
use zmirror::core::source::SourceChainClient;
use zmirror::runtime::block_store::BlockStore;
use zmirror::runtime::mdb::{Mdb, open_rocks};
use zmirror::schemas::{BlockId, SourceBlockSnapshot};
use zmirror::OracleError;

use common::{MirroredChainBuilder, MockSourceChain, OracleTestHarness, TestConfigBuilder};

#[tokio::test]
async fn single_block_chain_reconciles_against_source() {
    let (config, _temp) = TestConfigBuilder::new().build();
    let db = open_rocks(&config.db_path).unwrap();
    let store = Arc::new(BlockStore::new(Arc::new(Mdb::from_db(Arc::new(db), b"mirror/")), 64));

    let chain = MirroredChainBuilder::new().add_snapshot("h1", 1).build();
    chain.store_into(&store).unwrap();
    let genesis = chain.genesis();
    let a = chain.tip();
    assert_eq!((genesis.height, genesis.payload.len(), genesis.parent_id), (0, 0, BlockId::ZERO));
    assert_eq!(a.parent_id, genesis.id);

    assert_eq!(store.get_by_height(1).unwrap().id, a.id);
    assert!(matches!(store.get_by_height(2), Err(OracleError::HeightNotFound(2))));

    let source = Arc::new(MockSourceChain::with_height(50));
    let engine = ReconciliationEngine::new(Arc::clone(&store), SourceChainClient::new(source.clone(), 24));
    let cancel = CancellationToken::new();
    assert!(engine.reconcile(&cancel).await.unwrap().mismatched_heights.is_empty());

    source.set_hash(1, "h1-forked");
    assert_eq!(engine.reconcile(&cancel).await.unwrap().mismatched_heights, vec![1]);
}

#[tokio::test]
async fn reorg_below_depth_is_detected_above_is_not() {
    let harness = OracleTestHarness::new(100, 24).unwrap();
    for h in 1..=100u64 {
        let payload = SourceBlockSnapshot::summary(format!("h{h}"), h).to_payload().unwrap();
        harness.mempool.submit_with_ack(payload).unwrap().await.unwrap();
    }

    // Source reorgs its last 30 blocks: 71..=100.
    harness.source.reorg(71, "reorged");
    let mismatched = harness.service.reconcile_blocks().await.unwrap();
    // Only 71..=76 are buried deep enough to be compared.
    assert_eq!(mismatched, vec![76, 75, 74, 73, 72, 71]);

    // The source keeps mining; everything reorged becomes final.
    harness.source.extend_to(130);
    let mismatched = harness.service.reconcile_blocks().await.unwrap();
    assert_eq!(mismatched, (71..=100).rev().collect::<Vec<_>>());
}

#[tokio::test]
async fn mirrored_chain_survives_reopen() {
    let (config, _temp) = TestConfigBuilder::new().build();
    let chain = MirroredChainBuilder::new().add_snapshots(5).build();
    {
        let db = open_rocks(&config.db_path).unwrap();
        let store = BlockStore::new(Arc::new(Mdb::from_db(Arc::new(db), b"mirror/")), 8);
        chain.store_into(&store).unwrap();
    }

    let db = open_rocks(&config.db_path).unwrap();
    let store = BlockStore::new(Arc::new(Mdb::from_db(Arc::new(db), b"mirror/")), 8);
    assert!(store.is_initialized().unwrap());
    assert_eq!(store.last_accepted().unwrap(), chain.tip().id);
    for blk in &chain.blocks {
        assert_eq!(*store.get(&blk.id).unwrap(), *blk);
    }
    assert_eq!(store.get_by_height(3).unwrap().id, chain.blocks[3].id);
}
