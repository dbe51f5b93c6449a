use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::reconcile::{ReconcileReport, ReconciliationEngine};
use crate::core::source::SourceChainClient;
use crate::error::{OracleError, OracleResult, StoreError};
use crate::runtime::block_store::BlockStore;
use crate::runtime::mempool::Mempool;
use crate::runtime::tracker::{ProcessingTicket, RequestTracker};
use crate::schemas::{BlockId, MirroredBlock, SourceBlockSnapshot};

/// Client-facing rendering of a mirrored block.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BlockView {
    pub timestamp: i64,
    pub data: SourceBlockSnapshot,
    pub height: u64,
    pub id: BlockId,
    #[serde(rename = "parentID")]
    pub parent_id: BlockId,
}

impl BlockView {
    /// Genesis carries raw genesis data and renders with an empty snapshot.
    pub fn from_block(blk: &MirroredBlock) -> OracleResult<Self> {
        let data = if blk.is_genesis() { None } else { blk.snapshot()? };
        Ok(Self {
            timestamp: blk.timestamp,
            data: data.unwrap_or_default(),
            height: blk.height,
            id: blk.id,
            parent_id: blk.parent_id,
        })
    }
}

/// Answer to a height lookup.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum HeightLookup {
    Mirrored(BlockView),
    /// Not mirrored yet. `snapshot` is the confirmed source block when this
    /// call started the backfill, `None` when one was already in flight.
    Backfilling { height: u64, snapshot: Option<SourceBlockSnapshot> },
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthView {
    pub last_accepted: BlockId,
    pub height: u64,
    pub backfills_in_flight: usize,
    pub mempool_pending: usize,
}

/// The three client operations, on top of store, tracker and source client.
pub struct OracleService {
    store: Arc<BlockStore>,
    source: SourceChainClient,
    tracker: Arc<RequestTracker>,
    mempool: Mempool,
    engine: ReconciliationEngine,
    backfill_timeout: Duration,
    shutdown: CancellationToken,
}

impl OracleService {
    pub fn new(
        store: Arc<BlockStore>,
        source: SourceChainClient,
        tracker: Arc<RequestTracker>,
        mempool: Mempool,
        backfill_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let engine = ReconciliationEngine::new(Arc::clone(&store), source.clone());
        Self { store, source, tracker, mempool, engine, backfill_timeout, shutdown }
    }

    pub fn store(&self) -> &Arc<BlockStore> {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<RequestTracker> {
        &self.tracker
    }

    /// Block by ID; the last accepted block when `id` is `None`.
    pub fn get_block(&self, id: Option<BlockId>) -> OracleResult<BlockView> {
        let id = match id {
            Some(id) => id,
            None => self.store.last_accepted()?,
        };
        BlockView::from_block(&*self.store.get(&id)?)
    }

    async fn mirrored_at(&self, height: u64) -> OracleResult<Option<Arc<MirroredBlock>>> {
        let store = Arc::clone(&self.store);
        let cancel = self.shutdown.child_token();
        let found = tokio::task::spawn_blocking(move || store.get_by_height_with(height, &cancel))
            .await
            .map_err(|e| StoreError::Backend(format!("height scan task: {e}")))?;
        match found {
            Ok(blk) => Ok(Some(blk)),
            Err(OracleError::HeightNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Mirrored block for source height `height`, starting a backfill on a miss.
    pub async fn get_block_by_height(&self, height: u64) -> OracleResult<HeightLookup> {
        if height == 0 {
            return Err(OracleError::HeightNotFound(0));
        }

        if let Some(blk) = self.mirrored_at(height).await? {
            return Ok(HeightLookup::Mirrored(BlockView::from_block(&blk)?));
        }

        if self.tracker.is_processing(height).is_some() {
            debug!(height, "backfill already in flight");
            return Ok(HeightLookup::Backfilling { height, snapshot: None });
        }

        let snapshot = self.source.query_confirmed_snapshot(height, true).await?;
        let payload = snapshot.to_payload().map_err(|e| OracleError::Codec(e.to_string()))?;

        let Some(ticket) = self.tracker.try_begin_processing(height) else {
            debug!(height, "lost backfill race");
            return Ok(HeightLookup::Backfilling { height, snapshot: None });
        };
        // A backfill may have landed between the first lookup and the ticket.
        if let Some(blk) = self.mirrored_at(height).await? {
            drop(ticket);
            return Ok(HeightLookup::Mirrored(BlockView::from_block(&blk)?));
        }

        let task = Backfill {
            ticket,
            mempool: self.mempool.clone(),
            payload,
            timeout: self.backfill_timeout,
            cancel: self.shutdown.child_token(),
        };
        tokio::spawn(task.run());
        info!(height, hash = %snapshot.hash, "backfill started");
        Ok(HeightLookup::Backfilling { height, snapshot: Some(snapshot) })
    }

    /// Source heights whose mirrored copy diverges from the source chain.
    pub async fn reconcile_blocks(&self) -> OracleResult<Vec<u64>> {
        Ok(self.reconcile_report().await?.mismatched_heights)
    }

    pub async fn reconcile_report(&self) -> OracleResult<ReconcileReport> {
        self.engine.reconcile(&self.shutdown.child_token()).await
    }

    pub fn health(&self) -> OracleResult<HealthView> {
        let last_accepted = self.store.last_accepted()?;
        let tip = self.store.get(&last_accepted)?;
        Ok(HealthView {
            last_accepted,
            height: tip.height,
            backfills_in_flight: self.tracker.len(),
            mempool_pending: self.mempool.len(),
        })
    }
}

/// One spawned backfill; the ticket keeps the height marked until it finishes.
struct Backfill {
    ticket: ProcessingTicket,
    mempool: Mempool,
    payload: Vec<u8>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl Backfill {
    async fn run(self) {
        let height = self.ticket.height();
        let ack = match self.mempool.submit_with_ack(self.payload) {
            Ok(ack) => ack,
            Err(e) => {
                warn!(height, error = %e, "backfill could not be queued");
                return;
            }
        };

        tokio::select! {
            _ = self.cancel.cancelled() => warn!(height, "backfill cancelled by shutdown"),
            res = tokio::time::timeout(self.timeout, ack) => match res {
                Ok(Ok(id)) => info!(height, %id, "backfill absorbed"),
                Ok(Err(_)) => warn!(height, "block builder dropped backfill payload"),
                Err(_) => warn!(height, timeout = ?self.timeout, "backfill timed out"),
            },
        }
        drop(self.ticket);
    }
}
