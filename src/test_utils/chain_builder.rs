use crate::error::OracleResult;
use crate::runtime::block_store::BlockStore;
use crate::schemas::{BlockId, BlockStatus, MirroredBlock, SourceBlockSnapshot};

/// Builder for mirrored chains (genesis + one block per payload).
pub struct MirroredChainBuilder {
    payloads: Vec<Vec<u8>>,
    next_source_height: u64,
}

impl Default for MirroredChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MirroredChainBuilder {
    pub fn new() -> Self {
        Self { payloads: Vec::new(), next_source_height: 1 }
    }

    /// Append a block wrapping `{hash, height}`.
    pub fn add_snapshot(mut self, hash: &str, height: u64) -> Self {
        let payload = SourceBlockSnapshot::summary(hash, height)
            .to_payload()
            .expect("snapshot serializes");
        self.payloads.push(payload);
        self.next_source_height = height + 1;
        self
    }

    /// Append `count` blocks mirroring consecutive source heights `h{n}`.
    pub fn add_snapshots(mut self, count: u64) -> Self {
        for _ in 0..count {
            let h = self.next_source_height;
            self = self.add_snapshot(&format!("h{h}"), h);
        }
        self
    }

    /// Append a block with an arbitrary payload.
    pub fn add_payload(mut self, payload: &[u8]) -> Self {
        self.payloads.push(payload.to_vec());
        self
    }

    pub fn build(self) -> MirroredChain {
        let genesis =
            MirroredBlock::new(BlockId::ZERO, 0, 0, Vec::new(), BlockStatus::Accepted)
                .expect("genesis encodes");
        let mut blocks = vec![genesis];
        for payload in self.payloads {
            let parent = blocks.last().expect("genesis present");
            let height = parent.height + 1;
            let blk = MirroredBlock::new(
                parent.id,
                height,
                1_700_000_000 + height as i64,
                payload,
                BlockStatus::Accepted,
            )
            .expect("block encodes");
            blocks.push(blk);
        }
        MirroredChain { blocks }
    }
}

/// Blocks indexed by mirrored height.
pub struct MirroredChain {
    pub blocks: Vec<MirroredBlock>,
}

impl MirroredChain {
    pub fn genesis(&self) -> &MirroredBlock {
        &self.blocks[0]
    }

    pub fn tip(&self) -> &MirroredBlock {
        &self.blocks[self.blocks.len() - 1]
    }

    /// Persist every block, point last accepted at the tip, mark initialized.
    pub fn store_into(&self, store: &BlockStore) -> OracleResult<()> {
        for blk in &self.blocks {
            store.put(blk)?;
        }
        store.set_last_accepted(self.tip().id)?;
        store.set_initialized()
    }
}
