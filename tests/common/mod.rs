// Common utilities for integration tests

mod test_harness;

// Re-export test utilities for convenience in integration tests
#[allow(unused_imports)]
pub use zmirror::test_utils::{MirroredChainBuilder, MockSourceChain, TestConfigBuilder};

// Re-export the full test harness
#[allow(unused_imports)]
pub use test_harness::OracleTestHarness;
