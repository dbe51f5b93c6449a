use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::{OracleError, OracleResult};
use crate::schemas::SourceBlockSnapshot;

/// Read-only calls against the source chain node.
#[async_trait]
pub trait SourceChainRpc: Send + Sync {
    /// `getblockhash`; `HeightNotFound` when the node has no block at `height`.
    async fn get_block_hash(&self, height: u64) -> OracleResult<String>;
    /// `getblock` at verbosity 1.
    async fn get_block(&self, hash: &str) -> OracleResult<SourceBlockSnapshot>;
    /// `getblockcount`: height of the current head.
    async fn get_block_count(&self) -> OracleResult<u64>;
}

/// Confirmation-depth policy on top of a [`SourceChainRpc`] transport.
#[derive(Clone)]
pub struct SourceChainClient {
    rpc: Arc<dyn SourceChainRpc>,
    confirmation_depth: u64,
}

impl SourceChainClient {
    pub fn new(rpc: Arc<dyn SourceChainRpc>, confirmation_depth: u64) -> Self {
        Self { rpc, confirmation_depth }
    }

    pub fn confirmation_depth(&self) -> u64 {
        self.confirmation_depth
    }

    pub async fn head_height(&self) -> OracleResult<u64> {
        self.rpc.get_block_count().await
    }

    pub async fn block_hash(&self, height: u64) -> OracleResult<String> {
        self.rpc.get_block_hash(height).await
    }

    /// Snapshot of the source block at `height`. With `require_confirmation`
    /// the block must be buried under at least `confirmation_depth` blocks.
    #[instrument(level = "debug", skip(self))]
    pub async fn query_confirmed_snapshot(
        &self,
        height: u64,
        require_confirmation: bool,
    ) -> OracleResult<SourceBlockSnapshot> {
        if require_confirmation {
            let head = self.rpc.get_block_count().await?;
            if head < height.saturating_add(self.confirmation_depth) {
                return Err(OracleError::NotYetConfirmed {
                    height,
                    head,
                    depth: self.confirmation_depth,
                });
            }
        }

        let hash = self.rpc.get_block_hash(height).await?;
        let snapshot = self.rpc.get_block(&hash).await?;
        if snapshot.height != height || snapshot.hash != hash {
            return Err(OracleError::fetch_failed(
                "getblock",
                format!(
                    "asked for {hash} at height {height}, node returned {} at height {}",
                    snapshot.hash, snapshot.height
                ),
            ));
        }
        debug!(height, %hash, "fetched source snapshot");
        Ok(snapshot)
    }
}
