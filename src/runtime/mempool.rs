use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{OracleError, OracleResult};
use crate::schemas::BlockId;

/// A snapshot payload waiting to be built into a mirrored block.
#[derive(Debug)]
pub struct MempoolItem {
    pub payload: Vec<u8>,
    /// Fired with the new block's ID once the payload is accepted.
    pub absorbed: Option<oneshot::Sender<BlockId>>,
}

/// Submission half of the bounded payload queue.
#[derive(Clone)]
pub struct Mempool {
    tx: mpsc::Sender<MempoolItem>,
}

/// Consumer half, owned by the block builder.
pub struct MempoolReceiver {
    rx: mpsc::Receiver<MempoolItem>,
}

pub fn mempool(capacity: usize) -> (Mempool, MempoolReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Mempool { tx }, MempoolReceiver { rx })
}

impl Mempool {
    fn push(&self, item: MempoolItem) -> OracleResult<()> {
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => OracleError::MempoolFull(self.tx.max_capacity()),
            mpsc::error::TrySendError::Closed(_) => OracleError::Cancelled,
        })?;
        debug!(pending = self.len(), "payload queued");
        Ok(())
    }

    /// Queue a payload without waiting for it to land.
    pub fn submit(&self, payload: Vec<u8>) -> OracleResult<()> {
        self.push(MempoolItem { payload, absorbed: None })
    }

    /// Queue a payload; the receiver resolves with the block ID that absorbed it.
    pub fn submit_with_ack(&self, payload: Vec<u8>) -> OracleResult<oneshot::Receiver<BlockId>> {
        let (ack, rx) = oneshot::channel();
        self.push(MempoolItem { payload, absorbed: Some(ack) })?;
        Ok(rx)
    }

    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MempoolReceiver {
    pub async fn recv(&mut self) -> Option<MempoolItem> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<MempoolItem> {
        self.rx.try_recv().ok()
    }
}
