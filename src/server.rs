use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::consts::RPC_NAMESPACE;
use crate::core::oracle::OracleService;
use crate::error::OracleError;
use crate::schemas::BlockId;

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

#[derive(Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcErrorBody>,
}

impl RpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcErrorBody { code, message: message.into() }),
        }
    }
}

#[derive(Deserialize, Default)]
struct GetBlockArgs {
    #[serde(default)]
    id: Option<BlockId>,
}

#[derive(Deserialize)]
struct HeightArgs {
    id: u64,
}

#[derive(Serialize)]
struct ReconcileReply {
    height: Vec<u64>,
}

/// Params come either as a single object or as a one-element array wrapping it.
fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, String> {
    let inner = match params {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        Value::Array(items) if items.is_empty() => Value::Object(Default::default()),
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(inner).map_err(|e| format!("invalid params: {e}"))
}

fn to_value<T: Serialize>(v: &T) -> Result<Value, (i64, String)> {
    serde_json::to_value(v).map_err(|e| (-32603, e.to_string()))
}

fn oracle_err(e: OracleError) -> (i64, String) {
    (e.rpc_code(), e.to_string())
}

async fn dispatch(svc: &OracleService, method: &str, params: Value) -> Result<Value, (i64, String)> {
    let Some(name) = method.strip_prefix(RPC_NAMESPACE).and_then(|m| m.strip_prefix('.')) else {
        return Err((METHOD_NOT_FOUND, format!("method not found: {method}")));
    };

    match name {
        "getBlock" => {
            let args: GetBlockArgs = parse_params(params).map_err(|e| (INVALID_PARAMS, e))?;
            to_value(&svc.get_block(args.id).map_err(oracle_err)?)
        }
        "getBlockByHeight" => {
            let args: HeightArgs = parse_params(params).map_err(|e| (INVALID_PARAMS, e))?;
            to_value(&svc.get_block_by_height(args.id).await.map_err(oracle_err)?)
        }
        "reconcileBlocks" => {
            let height = svc.reconcile_blocks().await.map_err(oracle_err)?;
            to_value(&ReconcileReply { height })
        }
        _ => Err((METHOD_NOT_FOUND, format!("method not found: {method}"))),
    }
}

async fn rpc_handler(State(svc): State<Arc<OracleService>>, body: Bytes) -> Json<RpcResponse> {
    let req: RpcRequest = match serde_json::from_slice::<Value>(&body) {
        Err(e) => return Json(RpcResponse::err(Value::Null, PARSE_ERROR, e.to_string())),
        Ok(v) => match serde_json::from_value(v) {
            Ok(r) => r,
            Err(e) => {
                return Json(RpcResponse::err(Value::Null, INVALID_REQUEST, e.to_string()));
            }
        },
    };

    debug!(method = %req.method, "rpc request");
    let resp = match dispatch(&svc, &req.method, req.params).await {
        Ok(result) => RpcResponse::ok(req.id, result),
        Err((code, message)) => {
            warn!(method = %req.method, code, %message, "rpc request failed");
            RpcResponse::err(req.id, code, message)
        }
    };
    Json(resp)
}

async fn health_handler(State(svc): State<Arc<OracleService>>) -> (StatusCode, Json<Value>) {
    match svc.health() {
        Ok(h) => (StatusCode::OK, Json(json!({ "healthy": true, "status": h }))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "healthy": false, "error": e.to_string() })),
        ),
    }
}

pub fn router(svc: Arc<OracleService>) -> Router {
    Router::new()
        .route("/", post(rpc_handler))
        .route("/health", get(health_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(vec![Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any),
        )
        .with_state(svc)
}

pub async fn run(
    addr: SocketAddr,
    svc: Arc<OracleService>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "oracle rpc listening");
    axum::serve(listener, router(svc).into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
