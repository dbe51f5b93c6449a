use bitcoin::hashes::{Hash as _, sha256};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{OracleError, OracleResult};

/// Content-derived identifier of a mirrored block (SHA-256 of its body bytes).
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize,
)]
pub struct BlockId(pub [u8; 32]);

impl BlockId {
    /// Parent of genesis.
    pub const ZERO: BlockId = BlockId([0u8; 32]);

    pub fn digest(bytes: &[u8]) -> Self {
        BlockId(sha256::Hash::hash(bytes).to_byte_array())
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(BlockId(arr))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", hex::encode(self.0))
    }
}

impl FromStr for BlockId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(trimmed).map_err(|e| format!("invalid block id hex: {e}"))?;
        BlockId::from_slice(&bytes)
            .ok_or_else(|| format!("block id must be 32 bytes, got {}", bytes.len()))
    }
}

impl Serialize for BlockId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BlockId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Lifecycle tag set by consensus; persisted next to the body, not hashed into the ID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum BlockStatus {
    Processing,
    Accepted,
    Rejected,
}

/// Hashed part of a mirrored block.
#[derive(Debug, Clone, BorshSerialize, BorshDeserialize)]
struct BlockBody {
    parent_id: BlockId,
    height: u64,
    timestamp: i64,
    payload: Vec<u8>,
}

/// Borsh-encoded value stored in the DB for each block ID.
#[derive(Debug, Clone, BorshSerialize, BorshDeserialize)]
pub struct BlockEnvelope {
    pub body: Vec<u8>,
    pub status: BlockStatus,
}

impl BlockEnvelope {
    pub fn encode(&self) -> OracleResult<Vec<u8>> {
        borsh::to_vec(self).map_err(|e| OracleError::Codec(format!("encode envelope: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> OracleResult<Self> {
        BlockEnvelope::try_from_slice(bytes)
            .map_err(|e| OracleError::Codec(format!("decode envelope: {e}")))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirroredBlock {
    pub id: BlockId,
    pub parent_id: BlockId,
    pub height: u64,
    pub timestamp: i64,
    pub payload: Vec<u8>,
    pub status: BlockStatus,
}

impl MirroredBlock {
    pub fn new(
        parent_id: BlockId,
        height: u64,
        timestamp: i64,
        payload: Vec<u8>,
        status: BlockStatus,
    ) -> OracleResult<Self> {
        let body = BlockBody { parent_id, height, timestamp, payload };
        let bytes =
            borsh::to_vec(&body).map_err(|e| OracleError::Codec(format!("encode body: {e}")))?;
        Ok(Self {
            id: BlockId::digest(&bytes),
            parent_id: body.parent_id,
            height: body.height,
            timestamp: body.timestamp,
            payload: body.payload,
            status,
        })
    }

    /// Rebuild a block from persisted body bytes; the ID is recomputed from them.
    pub fn from_body(body: &[u8], status: BlockStatus) -> OracleResult<Self> {
        let decoded = BlockBody::try_from_slice(body)
            .map_err(|e| OracleError::Codec(format!("decode body: {e}")))?;
        Ok(Self {
            id: BlockId::digest(body),
            parent_id: decoded.parent_id,
            height: decoded.height,
            timestamp: decoded.timestamp,
            payload: decoded.payload,
            status,
        })
    }

    pub fn body_bytes(&self) -> OracleResult<Vec<u8>> {
        let body = BlockBody {
            parent_id: self.parent_id,
            height: self.height,
            timestamp: self.timestamp,
            payload: self.payload.clone(),
        };
        borsh::to_vec(&body).map_err(|e| OracleError::Codec(format!("encode body: {e}")))
    }

    pub fn envelope(&self) -> OracleResult<BlockEnvelope> {
        Ok(BlockEnvelope { body: self.body_bytes()?, status: self.status })
    }

    #[inline]
    pub fn is_genesis(&self) -> bool {
        self.height == 0
    }

    /// Decode the embedded source snapshot. `Ok(None)` for an empty payload.
    pub fn snapshot(&self) -> OracleResult<Option<SourceBlockSnapshot>> {
        if self.payload.is_empty() {
            return Ok(None);
        }
        SourceBlockSnapshot::from_payload(&self.payload).map(Some).map_err(|e| {
            OracleError::DataIntegrity {
                id: self.id,
                height: self.height,
                reason: format!("payload is not a source snapshot: {e}"),
            }
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainSupply {
    #[serde(default)]
    pub monitored: bool,
    #[serde(rename = "chainValue", default)]
    pub chain_value: f64,
    #[serde(rename = "chainValueZat", default)]
    pub chain_value_zat: i64,
    #[serde(rename = "valueDelta", default)]
    pub value_delta: f64,
    #[serde(rename = "valueDeltaZat", default)]
    pub value_delta_zat: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValuePool {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub monitored: bool,
    #[serde(rename = "chainValue", default)]
    pub chain_value: f64,
    #[serde(rename = "chainValueZat", default)]
    pub chain_value_zat: i64,
    #[serde(rename = "valueDelta", default)]
    pub value_delta: f64,
    #[serde(rename = "valueDeltaZat", default)]
    pub value_delta_zat: i64,
}

/// The source node's `getblock` (verbosity 1) view of a block.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceBlockSnapshot {
    pub hash: String,
    #[serde(default)]
    pub confirmations: i64,
    #[serde(default)]
    pub size: u64,
    pub height: u64,
    #[serde(default)]
    pub version: i32,
    #[serde(rename = "merkleroot", default)]
    pub merkle_root: String,
    #[serde(rename = "blockcommitments", default)]
    pub block_commitments: String,
    #[serde(rename = "authdataroot", default)]
    pub auth_data_root: String,
    #[serde(rename = "finalsaplingroot", default)]
    pub final_sapling_root: String,
    #[serde(rename = "chainhistoryroot", default)]
    pub chain_history_root: String,
    #[serde(default)]
    pub tx: Vec<String>,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub solution: String,
    #[serde(default)]
    pub bits: String,
    #[serde(default)]
    pub difficulty: f64,
    #[serde(rename = "chainwork", default)]
    pub chain_work: String,
    #[serde(default)]
    pub anchor: String,
    #[serde(rename = "chainSupply", default)]
    pub chain_supply: ChainSupply,
    #[serde(rename = "valuePools", default)]
    pub value_pools: Vec<ValuePool>,
    #[serde(rename = "previousblockhash", default, skip_serializing_if = "Option::is_none")]
    pub previous_block_hash: Option<String>,
    #[serde(rename = "nextblockhash", default, skip_serializing_if = "Option::is_none")]
    pub next_block_hash: Option<String>,
}

impl SourceBlockSnapshot {
    /// Minimal snapshot carrying only what reconciliation compares.
    pub fn summary(hash: impl Into<String>, height: u64) -> Self {
        Self { hash: hash.into(), height, ..Default::default() }
    }

    pub fn from_payload(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
