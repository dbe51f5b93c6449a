use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use zmirror::config::{AppConfig, init_config};
use zmirror::consts::{MAX_MEMPOOL_SIZE, MIRROR_NAMESPACE};
use zmirror::core::builder::{BlockBuilder, init_genesis};
use zmirror::core::oracle::OracleService;
use zmirror::core::source::SourceChainClient;
use zmirror::runtime::block_store::BlockStore;
use zmirror::runtime::mdb::{Mdb, open_rocks};
use zmirror::runtime::mempool::mempool;
use zmirror::runtime::tracker::RequestTracker;
use zmirror::{server, utils::fmt_duration};

fn init_tracing(cfg: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = init_config()?;
    init_tracing(cfg);

    let db_dir = std::path::Path::new(&cfg.db_path).join("mirror");
    let db = open_rocks(&db_dir).with_context(|| format!("failed to open {}", db_dir.display()))?;
    let mdb = Mdb::from_db(Arc::new(db), MIRROR_NAMESPACE);
    let store = Arc::new(BlockStore::new(Arc::new(mdb), cfg.block_cache_size));

    let started = std::time::Instant::now();
    match init_genesis(&store, &cfg.genesis_data)? {
        Some(id) => info!(%id, "fresh store, genesis written"),
        None => info!(tip = %store.last_accepted()?, "resuming mirrored chain"),
    }

    let source = SourceChainClient::new(cfg.source_client()?, cfg.confirmation_depth);
    match source.head_height().await {
        Ok(head) => info!(head, url = %cfg.source_rpc_url, "source chain reachable"),
        Err(e) => warn!(error = %e, url = %cfg.source_rpc_url, "source chain unreachable at startup"),
    }

    let shutdown = CancellationToken::new();
    let (pool, queue) = mempool(MAX_MEMPOOL_SIZE);
    let builder = tokio::spawn(BlockBuilder::new(Arc::clone(&store), queue).run(shutdown.clone()));

    let service = Arc::new(OracleService::new(
        Arc::clone(&store),
        source,
        Arc::new(RequestTracker::new(cfg.tracker_stale_after)),
        pool,
        cfg.backfill_timeout,
        shutdown.clone(),
    ));

    let server_shutdown = shutdown.clone();
    let mut server = tokio::spawn(server::run(cfg.rpc_addr(), service, server_shutdown));
    info!(startup = %fmt_duration(started.elapsed()), "oracle ready");

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown requested");
        }
        res = &mut server => {
            match res {
                Ok(Ok(())) => warn!("rpc server exited"),
                Ok(Err(e)) => error!(error = %e, "rpc server failed"),
                Err(e) => error!(error = %e, "rpc server task panicked"),
            }
        }
    }

    shutdown.cancel();
    if !server.is_finished() {
        let _ = server.await;
    }
    let built = builder.await.unwrap_or_default();
    info!(built, "bye");
    Ok(())
}
