use crate::config::AppConfig;
use std::time::Duration;
use tempfile::TempDir;

/// Builder for test `AppConfig`s backed by a temporary db directory.
pub struct TestConfigBuilder {
    config: AppConfig,
    temp_dir: TempDir,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("create temp db dir");
        let config = AppConfig {
            source_rpc_url: "http://127.0.0.1:8232/".to_string(), // Placeholder
            source_rpc_user: String::new(),
            source_rpc_pass: String::new(),
            source_rpc_timeout: Duration::from_secs(5),
            confirmation_depth: 24,
            db_path: temp_dir.path().to_string_lossy().to_string(),
            port: 0, // Let OS assign port
            block_cache_size: 128,
            tracker_stale_after: Duration::from_secs(60),
            backfill_timeout: Duration::from_secs(5),
            genesis_data: Vec::new(),
            log_filter: "debug".to_string(),
        };
        Self { config, temp_dir }
    }

    pub fn with_confirmation_depth(mut self, depth: u64) -> Self {
        self.config.confirmation_depth = depth;
        self
    }

    /// Returns the config and the temp dir guard; keep the guard alive for the test.
    pub fn build(self) -> (AppConfig, TempDir) {
        (self.config, self.temp_dir)
    }
}
