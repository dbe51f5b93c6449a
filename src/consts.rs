use std::time::Duration;

/// Namespace prefix of the mirrored chain inside the RocksDB instance.
pub const MIRROR_NAMESPACE: &[u8] = b"mirror/";

/// Persisted key holding the last accepted block ID.
pub const LAST_ACCEPTED_KEY: &[u8] = &[0x00];
/// Persisted key marking that genesis has been written.
pub const INITIALIZED_KEY: &[u8] = &[0x01];
/// Tag byte of the source-height -> block ID index keys.
pub const HEIGHT_INDEX_TAG: u8 = b'H';

/// === Tuning ==================================================================
pub const DEFAULT_BLOCK_CACHE_SIZE: usize = 8192;
pub const DEFAULT_CONFIRMATION_DEPTH: u64 = 24;
pub const MAX_MEMPOOL_SIZE: usize = 4096;
/// Genesis data is stored verbatim in the genesis payload.
pub const MAX_GENESIS_DATA_LEN: usize = 32;
pub const DEFAULT_TRACKER_STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_BACKFILL_TIMEOUT: Duration = Duration::from_secs(120);
/// ============================================================================

pub const RPC_NAMESPACE: &str = "oracle";
