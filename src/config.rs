use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::{fs, path::Path, time::Duration};

use crate::consts::{
    DEFAULT_BACKFILL_TIMEOUT, DEFAULT_BLOCK_CACHE_SIZE, DEFAULT_CONFIRMATION_DEPTH,
    DEFAULT_TRACKER_STALE_AFTER, MAX_GENESIS_DATA_LEN,
};
use crate::source_rpc::JsonRpcSourceClient;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

fn default_source_rpc_url() -> String {
    "http://127.0.0.1:8232/".to_string()
}

fn default_source_rpc_timeout_secs() -> u64 {
    30
}

fn default_confirmation_depth() -> u64 {
    DEFAULT_CONFIRMATION_DEPTH
}

fn default_db_path() -> String {
    "./db".to_string()
}

fn default_port() -> u16 {
    9650
}

fn default_block_cache_size() -> usize {
    DEFAULT_BLOCK_CACHE_SIZE
}

fn default_tracker_stale_after_secs() -> u64 {
    DEFAULT_TRACKER_STALE_AFTER.as_secs()
}

fn default_backfill_timeout_secs() -> u64 {
    DEFAULT_BACKFILL_TIMEOUT.as_secs()
}

fn default_log_filter() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(default = "default_source_rpc_url")]
    pub source_rpc_url: String,
    #[serde(default)]
    pub source_rpc_user: String,
    #[serde(default)]
    pub source_rpc_pass: String,
    #[serde(default = "default_source_rpc_timeout_secs")]
    pub source_rpc_timeout_secs: u64,
    #[serde(default = "default_confirmation_depth")]
    pub confirmation_depth: u64,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_block_cache_size")]
    pub block_cache_size: usize,
    #[serde(default = "default_tracker_stale_after_secs")]
    pub tracker_stale_after_secs: u64,
    #[serde(default = "default_backfill_timeout_secs")]
    pub backfill_timeout_secs: u64,
    #[serde(default)]
    pub genesis_data_hex: String,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub source_rpc_url: String,
    pub source_rpc_user: String,
    pub source_rpc_pass: String,
    pub source_rpc_timeout: Duration,
    pub confirmation_depth: u64,
    pub db_path: String,
    pub port: u16,
    pub block_cache_size: usize,
    pub tracker_stale_after: Duration,
    pub backfill_timeout: Duration,
    pub genesis_data: Vec<u8>,
    pub log_filter: String,
}

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    /// Path to JSON config file.
    #[arg(long, default_value = "./config.json")]
    pub config_path: String,
}

fn load_config_file(path: &str) -> Result<ConfigFile> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read config file: {path}"))?;
    serde_json::from_str(&raw).context("failed to parse config JSON")
}

impl AppConfig {
    pub fn from_file(file: ConfigFile) -> Result<Self> {
        if file.source_rpc_url.trim().is_empty() {
            anyhow::bail!("source_rpc_url must be provided");
        }
        if file.confirmation_depth == 0 {
            anyhow::bail!("confirmation_depth must be greater than 0");
        }
        if file.block_cache_size == 0 {
            anyhow::bail!("block_cache_size must be greater than 0");
        }
        if file.source_rpc_timeout_secs == 0
            || file.tracker_stale_after_secs == 0
            || file.backfill_timeout_secs == 0
        {
            anyhow::bail!("timeouts must be greater than 0");
        }

        let hex_str = file.genesis_data_hex.trim();
        let genesis_data = hex::decode(hex_str.strip_prefix("0x").unwrap_or(hex_str))
            .context("genesis_data_hex is not valid hex")?;
        if genesis_data.len() > MAX_GENESIS_DATA_LEN {
            anyhow::bail!(
                "genesis data must be at most {MAX_GENESIS_DATA_LEN} bytes, got {}",
                genesis_data.len()
            );
        }

        Ok(Self {
            source_rpc_url: file.source_rpc_url.trim().to_string(),
            source_rpc_user: file.source_rpc_user,
            source_rpc_pass: file.source_rpc_pass,
            source_rpc_timeout: Duration::from_secs(file.source_rpc_timeout_secs),
            confirmation_depth: file.confirmation_depth,
            db_path: file.db_path,
            port: file.port,
            block_cache_size: file.block_cache_size,
            tracker_stale_after: Duration::from_secs(file.tracker_stale_after_secs),
            backfill_timeout: Duration::from_secs(file.backfill_timeout_secs),
            genesis_data,
            log_filter: file.log_filter,
        })
    }

    pub fn rpc_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    /// Basic-auth pair, only when both halves are set.
    pub fn source_auth(&self) -> Option<(String, String)> {
        if self.source_rpc_user.is_empty() || self.source_rpc_pass.is_empty() {
            return None;
        }
        Some((self.source_rpc_user.clone(), self.source_rpc_pass.clone()))
    }

    pub fn source_client(&self) -> Result<Arc<JsonRpcSourceClient>> {
        let client =
            JsonRpcSourceClient::new(&self.source_rpc_url, self.source_auth(), self.source_rpc_timeout)
                .context("failed to build source chain rpc client")?;
        Ok(Arc::new(client))
    }
}

pub fn init_config_from(cfg: AppConfig) -> Result<&'static AppConfig> {
    let db_root = Path::new(&cfg.db_path);
    if !db_root.exists() {
        fs::create_dir_all(db_root)
            .with_context(|| format!("failed to create db_path {}", cfg.db_path))?;
    } else if !db_root.is_dir() {
        anyhow::bail!("db_path is not a directory: {}", cfg.db_path);
    }

    CONFIG.set(cfg).map_err(|_| anyhow::anyhow!("config already initialized"))?;
    Ok(get_config())
}

pub fn init_config() -> Result<&'static AppConfig> {
    let cli = CliArgs::parse();
    let file = load_config_file(&cli.config_path)?;
    init_config_from(AppConfig::from_file(file)?)
}

pub fn get_config() -> &'static AppConfig {
    CONFIG.get().expect("init_config() must be called once at startup")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = AppConfig::from_file(serde_json::from_str("{}").unwrap()).unwrap();
        assert_eq!(cfg.source_rpc_url, "http://127.0.0.1:8232/");
        assert_eq!(cfg.confirmation_depth, 24);
        assert_eq!(cfg.port, 9650);
        assert_eq!(cfg.block_cache_size, 8192);
        assert_eq!(cfg.tracker_stale_after, Duration::from_secs(86_400));
        assert_eq!(cfg.backfill_timeout, Duration::from_secs(120));
        assert!(cfg.genesis_data.is_empty());
        assert!(cfg.source_auth().is_none());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let with = |patch: serde_json::Value| -> Result<AppConfig> {
            AppConfig::from_file(serde_json::from_value(patch).unwrap())
        };
        assert!(with(serde_json::json!({"confirmation_depth": 0})).is_err());
        assert!(with(serde_json::json!({"block_cache_size": 0})).is_err());
        assert!(with(serde_json::json!({"backfill_timeout_secs": 0})).is_err());
        assert!(with(serde_json::json!({"source_rpc_url": "  "})).is_err());
        assert!(with(serde_json::json!({"genesis_data_hex": "zz"})).is_err());
        assert!(with(serde_json::json!({"genesis_data_hex": "00".repeat(33)})).is_err());

        let ok = with(serde_json::json!({
            "genesis_data_hex": "0x7a6563",
            "source_rpc_user": "u",
            "source_rpc_pass": "p"
        }))
        .unwrap();
        assert_eq!(ok.genesis_data, b"zec");
        assert_eq!(ok.source_auth(), Some(("u".to_string(), "p".to_string())));
    }
}
