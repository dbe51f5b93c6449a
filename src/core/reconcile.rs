use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::source::SourceChainClient;
use crate::error::{OracleError, OracleResult, StoreError};
use crate::runtime::block_store::BlockStore;
use crate::schemas::{BlockId, MirroredBlock, SourceBlockSnapshot};

/// Outcome of one reconciliation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Source heights whose mirrored hash no longer matches the node, in visit
    /// order (tip first).
    pub mismatched_heights: Vec<u64>,
    /// Blocks whose payload is byte-identical to another mirrored block's.
    pub duplicates: usize,
    pub visited: usize,
    pub compared: usize,
    pub source_head: u64,
}

/// Cross-checks the mirrored chain against the source node, newest to oldest.
/// Read-only: never writes to the store.
pub struct ReconciliationEngine {
    store: Arc<BlockStore>,
    source: SourceChainClient,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<BlockStore>, source: SourceChainClient) -> Self {
        Self { store, source }
    }

    fn decode(blk: &MirroredBlock) -> OracleResult<SourceBlockSnapshot> {
        let integrity = |reason: &str| OracleError::DataIntegrity {
            id: blk.id,
            height: blk.height,
            reason: reason.to_string(),
        };
        let snapshot = blk.snapshot()?.ok_or_else(|| integrity("empty payload"))?;
        if snapshot.hash.is_empty() {
            return Err(integrity("snapshot has an empty hash"));
        }
        if snapshot.height == 0 {
            return Err(integrity("snapshot has a zero height"));
        }
        Ok(snapshot)
    }

    async fn load(&self, id: BlockId) -> OracleResult<Arc<MirroredBlock>> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.get(&id))
            .await
            .map_err(|e| StoreError::Backend(format!("block read task: {e}")))?
    }

    pub async fn reconcile(&self, cancel: &CancellationToken) -> OracleResult<ReconcileReport> {
        let started = Instant::now();
        let depth = self.source.confirmation_depth();
        let head = self.source.head_height().await?;
        let mut id: BlockId = self.store.last_accepted()?;
        info!(tip = %id, source_head = head, depth, "reconciliation started");

        let mut report = ReconcileReport { source_head: head, ..Default::default() };
        let mut payload_seen: HashMap<BlockId, usize> = HashMap::new();
        let mut source_hashes: HashMap<u64, String> = HashMap::new();

        loop {
            if cancel.is_cancelled() {
                return Err(OracleError::Cancelled);
            }
            let blk = self.load(id).await?;
            report.visited += 1;

            if blk.is_genesis() {
                break;
            }

            let snapshot = Self::decode(&blk)?;
            *payload_seen.entry(BlockId::digest(&blk.payload)).or_default() += 1;

            let buried = head.checked_sub(snapshot.height).is_some_and(|d| d >= depth);
            if buried {
                let source_hash = match source_hashes.get(&snapshot.height) {
                    Some(h) => h.clone(),
                    None => {
                        let live = self.source.query_confirmed_snapshot(snapshot.height, false).await?;
                        source_hashes.insert(snapshot.height, live.hash.clone());
                        live.hash
                    }
                };
                report.compared += 1;
                if source_hash != snapshot.hash {
                    warn!(
                        height = snapshot.height,
                        mirrored = %snapshot.hash,
                        source = %source_hash,
                        "mirrored block diverges from source chain"
                    );
                    report.mismatched_heights.push(snapshot.height);
                }
            } else {
                debug!(height = snapshot.height, "not yet final, skipped");
            }

            id = blk.parent_id;
        }

        report.duplicates = payload_seen.values().filter(|&&n| n > 1).sum();
        if report.duplicates > 0 {
            warn!(duplicates = report.duplicates, "duplicate snapshots in mirrored chain");
        }
        info!(
            visited = report.visited,
            compared = report.compared,
            mismatched = report.mismatched_heights.len(),
            duplicates = report.duplicates,
            elapsed = %crate::utils::fmt_duration(started.elapsed()),
            "reconciliation finished"
        );
        Ok(report)
    }
}
