// Test utilities for zmirror unit and integration testing

pub use tempfile::TempDir;

pub mod chain_builder;
pub mod config_builder;
pub mod counting_store;
pub mod mock_source;

// Re-export commonly used items
pub use chain_builder::{MirroredChain, MirroredChainBuilder};
pub use config_builder::TestConfigBuilder;
pub use counting_store::{CountingStore, MemoryStore};
pub use mock_source::MockSourceChain;
