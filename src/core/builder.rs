use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::consts::MAX_GENESIS_DATA_LEN;
use crate::error::{OracleError, OracleResult};
use crate::runtime::block_store::BlockStore;
use crate::runtime::mempool::{MempoolItem, MempoolReceiver};
use crate::schemas::{BlockId, BlockStatus, MirroredBlock};
use crate::utils::now_ts;

/// Write the genesis block on a fresh store. Returns its ID, or `None` when
/// the store was already initialized.
pub fn init_genesis(store: &BlockStore, genesis_data: &[u8]) -> OracleResult<Option<BlockId>> {
    if store.is_initialized()? {
        return Ok(None);
    }
    if genesis_data.len() > MAX_GENESIS_DATA_LEN {
        return Err(OracleError::BadGenesis { len: genesis_data.len(), max: MAX_GENESIS_DATA_LEN });
    }

    let genesis =
        MirroredBlock::new(BlockId::ZERO, 0, 0, genesis_data.to_vec(), BlockStatus::Accepted)?;
    store.put(&genesis)?;
    store.set_last_accepted(genesis.id)?;
    store.set_initialized()?;
    info!(id = %genesis.id, data_len = genesis_data.len(), "genesis initialized");
    Ok(Some(genesis.id))
}

/// Appends one mirrored block per mempool item on top of the last accepted block.
pub struct BlockBuilder {
    store: Arc<BlockStore>,
    queue: MempoolReceiver,
}

impl BlockBuilder {
    pub fn new(store: Arc<BlockStore>, queue: MempoolReceiver) -> Self {
        Self { store, queue }
    }

    /// Build, persist and accept the block carrying `payload`.
    pub fn build_next(&self, payload: Vec<u8>) -> OracleResult<MirroredBlock> {
        let parent = self.store.get(&self.store.last_accepted()?)?;
        let blk = MirroredBlock::new(
            parent.id,
            parent.height + 1,
            now_ts().max(parent.timestamp),
            payload,
            BlockStatus::Accepted,
        )?;
        self.store.put(&blk)?;
        // The pointer only moves once the block itself is durable.
        self.store.set_last_accepted(blk.id)?;
        Ok(blk)
    }

    fn absorb(&self, item: MempoolItem) {
        match self.build_next(item.payload) {
            Ok(blk) => {
                debug!(id = %blk.id, height = blk.height, "mirrored block accepted");
                if let Some(ack) = item.absorbed {
                    let _ = ack.send(blk.id);
                }
            }
            // Dropping the ack tells the submitter the payload was lost.
            Err(e) => error!(error = %e, "failed to build mirrored block"),
        }
    }

    /// Drain the mempool until it closes or `cancel` fires. Returns the number
    /// of items processed.
    pub async fn run(mut self, cancel: CancellationToken) -> usize {
        let mut processed = 0usize;
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => break,
                item = self.queue.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };
            self.absorb(item);
            processed += 1;
        }
        info!(processed, "block builder stopped");
        processed
    }
}
