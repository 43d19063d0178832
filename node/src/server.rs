// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! HTTP surface of a node.
//!
//! | route               | body                        | reply                        |
//! |---------------------|-----------------------------|------------------------------|
//! | `GET /info`         |                             | engine info                  |
//! | `POST /abci_query`  | `{path, data: base64}`      | `{code, value: base64, log}` |
//! | `POST /broadcast_tx`| `{tx: base64}`              | `{code, log, linkHash}`      |
//! | `GET /metrics`      |                             | Prometheus text              |

use std::sync::Arc;

use axum::extract::{Request as AxumRequest, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::{from_fn_with_state, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::abci::{EngineInfo, QueryRequest, SharedEngine, TxResponse};
use crate::context::Context;
use crate::errors::StoreError;
use crate::producer::Mempool;

#[derive(Clone)]
pub struct AppState {
    pub engine: SharedEngine,
    pub mempool: Arc<Mempool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryBody {
    pub path: String,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryReply {
    pub code: u32,
    pub value: String,
    #[serde(default)]
    pub log: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BroadcastBody {
    pub tx: String,
}

async fn auth_guard(
    State(token): State<Arc<String>>,
    req: AxumRequest,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|val| val.to_str().ok())
        .and_then(|val| val.strip_prefix("Bearer "));
    match provided {
        Some(p) if p == token.as_str() => Ok(next.run(req).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

pub fn build_router(state: AppState, auth_token: Option<String>) -> Router {
    let mut app = Router::new()
        .route("/info", get(info))
        .route("/abci_query", post(abci_query))
        .route("/broadcast_tx", post(broadcast_tx))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if let Some(token) = auth_token {
        tracing::info!("auth enabled: bearer token required");
        app = app.layer(from_fn_with_state(Arc::new(token), auth_guard));
    } else {
        tracing::warn!("auth disabled: no token configured");
    }
    app
}

fn decode(field: &str, value: &str) -> Result<Vec<u8>, StoreError> {
    STANDARD
        .decode(value)
        .map_err(|e| StoreError::InvalidArgument(format!("{field} is not valid base64: {e}")))
}

async fn info(State(state): State<AppState>) -> Json<EngineInfo> {
    Json(state.engine.lock().await.info())
}

async fn abci_query(
    State(state): State<AppState>,
    Json(body): Json<QueryBody>,
) -> Result<Json<QueryReply>, StoreError> {
    let req = QueryRequest {
        path: body.path,
        data: decode("data", &body.data)?,
    };
    let ctx = Context::background();
    let res = state.engine.lock().await.query(&ctx, &req).await;
    Ok(Json(QueryReply {
        code: res.code,
        value: STANDARD.encode(&res.value),
        log: res.log,
    }))
}

/// Runs `check_tx`, then queues accepted transactions for the next block.
async fn broadcast_tx(
    State(state): State<AppState>,
    Json(body): Json<BroadcastBody>,
) -> Result<Json<TxResponse>, StoreError> {
    let tx = decode("tx", &body.tx)?;
    let ctx = Context::background();
    let res = state.engine.lock().await.check_tx(&ctx, &tx).await;
    if res.is_ok() {
        state.mempool.push(tx)?;
    }
    Ok(Json(res))
}

async fn metrics_handler() -> String {
    crate::telemetry::get_metrics()
}
