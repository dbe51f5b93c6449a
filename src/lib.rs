pub mod config;
pub mod consts;
pub mod core;
pub mod error;
pub mod runtime;
pub mod schemas;
pub mod server;
pub mod source_rpc;
pub mod utils;

// Test utilities available for testing
// Always compiled so both unit tests and integration tests under tests/ can use them.
pub mod test_utils;

pub use error::{OracleError, OracleResult};
