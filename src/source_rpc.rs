// JSON-RPC client for the source chain node (zcashd / zebrad style endpoints).
// Speaks the bitcoind 1.0 dialect over HTTP POST with optional basic auth.

use async_trait::async_trait;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

use crate::core::source::SourceChainRpc;
use crate::error::{OracleError, OracleResult};
use crate::schemas::SourceBlockSnapshot;

/// Node-side "Block height out of range" on `getblockhash`.
const RPC_INVALID_PARAMETER: i64 = -8;

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Vec<Value>,
}

#[derive(Deserialize, Debug)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcErrorDetail>,
}

#[derive(Deserialize, Debug)]
struct JsonRpcErrorDetail {
    code: i64,
    message: String,
}

enum CallError {
    /// The node answered with a JSON-RPC error object.
    Rpc { code: i64, message: String },
    Transport(String),
}

impl CallError {
    fn into_oracle(self, method: &'static str) -> OracleError {
        match self {
            CallError::Rpc { code, message } => {
                OracleError::fetch_failed(method, format!("rpc error {code}: {message}"))
            }
            CallError::Transport(reason) => OracleError::fetch_failed(method, reason),
        }
    }
}

pub struct JsonRpcSourceClient {
    url: String,
    auth: Option<String>,
    client: reqwest::Client,
    request_id: AtomicU64,
}

impl JsonRpcSourceClient {
    pub fn new(url: &str, auth: Option<(String, String)>, timeout: Duration) -> OracleResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::fetch_failed("connect", format!("http client: {e}")))?;

        let auth_header = auth.map(|(user, pass)| {
            let credentials = format!("{user}:{pass}");
            format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(credentials))
        });

        Ok(Self { url: url.to_string(), auth: auth_header, client, request_id: AtomicU64::new(1) })
    }

    async fn rpc_call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, CallError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest { jsonrpc: "1.0", id, method, params };
        trace!(id, method, "source rpc call");

        let mut req = self.client.post(&self.url).json(&request);
        if let Some(ref auth) = self.auth {
            req = req.header(reqwest::header::AUTHORIZATION, auth);
        }

        let response = req
            .send()
            .await
            .map_err(|e| CallError::Transport(format!("HTTP request failed: {e}")))?;

        // bitcoind-style nodes answer RPC errors with HTTP 500 and a JSON body,
        // so the body is parsed before the status is judged.
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CallError::Transport(format!("reading response body: {e}")))?;

        let parsed: JsonRpcResponse<T> = match serde_json::from_str(&body) {
            Ok(p) => p,
            Err(e) if status.is_success() => {
                return Err(CallError::Transport(format!("invalid JSON-RPC response: {e}")));
            }
            Err(_) => {
                return Err(CallError::Transport(format!("HTTP {status}: {}", body.trim())));
            }
        };

        if let Some(error) = parsed.error {
            return Err(CallError::Rpc { code: error.code, message: error.message });
        }
        parsed.result.ok_or_else(|| CallError::Transport("missing result field".to_string()))
    }
}

#[async_trait]
impl SourceChainRpc for JsonRpcSourceClient {
    async fn get_block_hash(&self, height: u64) -> OracleResult<String> {
        match self.rpc_call("getblockhash", vec![json!(height)]).await {
            Ok(hash) => Ok(hash),
            Err(CallError::Rpc { code: RPC_INVALID_PARAMETER, .. }) => {
                Err(OracleError::HeightNotFound(height))
            }
            Err(e) => Err(e.into_oracle("getblockhash")),
        }
    }

    async fn get_block(&self, hash: &str) -> OracleResult<SourceBlockSnapshot> {
        self.rpc_call("getblock", vec![json!(hash), json!(1)])
            .await
            .map_err(|e| e.into_oracle("getblock"))
    }

    async fn get_block_count(&self) -> OracleResult<u64> {
        self.rpc_call("getblockcount", vec![]).await.map_err(|e| e.into_oracle("getblockcount"))
    }
}
