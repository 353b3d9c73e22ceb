//! Thin inbound HTTP surface.
//!
//! The full Ethereum JSON-RPC framing lives in a separate front-end
//! service; this router covers what the gateway itself must answer: raw
//! transaction submission, mempool introspection and the read paths backed
//! by the indexer's store.

use std::sync::Arc;

use alloy_primitives::Address;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::json;

use crate::db::NeonDb;
use crate::evm::{ExecConfig, NeonTx, NeonTxHash};
use crate::indexer::OverlayRx;
use crate::mempool::{MempoolHandle, MpAddError};
use crate::strategy::EmulatorClient;

#[derive(Clone)]
pub struct AppState {
    pub mempool: MempoolHandle,
    pub db: Arc<dyn NeonDb>,
    pub emulator: EmulatorClient,
    pub overlay_rx: OverlayRx,
    pub chain_id: u64,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/api/tx", post(send_raw_tx))
        .route("/api/tx/{tx_hash}", get(get_tx))
        .route("/api/nonce/{sender}", get(get_nonce))
        .route("/api/mempool", get(mempool_content))
        .route("/api/block-number", get(block_number))
}

async fn health() -> impl IntoResponse {
    axum::Json(json!({ "status": "ok" }))
}

fn error_response(code: StatusCode, message: String) -> Response {
    (code, axum::Json(json!({ "error": message }))).into_response()
}

/// `eth_sendRawTransaction` equivalent: hex-encoded RLP in, tx hash out.
/// The transaction is accepted into the mempool; execution is asynchronous.
async fn send_raw_tx(State(state): State<Arc<AppState>>, body: String) -> Response {
    let trimmed = body.trim().trim_start_matches("0x");
    let raw = match hex::decode(trimmed) {
        Ok(raw) => raw,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("invalid hex: {e}")),
    };
    let tx = match NeonTx::from_rlp(&raw) {
        Ok(tx) => tx,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    if let Some(chain_id) = tx.chain_id() {
        if chain_id != state.chain_id {
            return error_response(StatusCode::BAD_REQUEST, "wrong chain-id".to_string());
        }
    }

    let state_tx_cnt = state
        .emulator
        .get_state_tx_cnt(&tx.sender(), state.chain_id)
        .await
        .unwrap_or(0);
    let tx_hash = tx.tx_hash();
    match state.mempool.add_tx(tx, ExecConfig::new(state_tx_cnt)).await {
        Ok(()) => axum::Json(json!({ "tx_hash": format!("{tx_hash:#x}") })).into_response(),
        Err(MpAddError::AlreadyKnown) => {
            error_response(StatusCode::CONFLICT, "already known".to_string())
        }
        Err(e @ MpAddError::Underprice) | Err(e @ MpAddError::NonceTooHigh) => {
            error_response(StatusCode::PAYMENT_REQUIRED, e.to_string())
        }
        Err(e @ MpAddError::NonceTooLow { .. }) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

/// Transaction lookup: mempool first, then the confirmed overlay, then the
/// finalized store.
async fn get_tx(State(state): State<Arc<AppState>>, Path(tx_hash): Path<String>) -> Response {
    let tx_hash: NeonTxHash = match tx_hash.parse() {
        Ok(tx_hash) => tx_hash,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid hash".to_string()),
    };

    if let Some(entry) = state.mempool.get_tx_by_hash(tx_hash).await {
        return axum::Json(json!({
            "status": "pending",
            "tx_hash": format!("{tx_hash:#x}"),
            "sender": format!("{:#x}", entry.tx.sender()),
            "nonce": entry.tx.nonce(),
        }))
        .into_response();
    }

    let overlay = state.overlay_rx.borrow().clone();
    for block in overlay.iter() {
        if let Some(tx) = block.tx_list.iter().find(|tx| tx.neon_tx_sig == tx_hash) {
            return axum::Json(json!({ "status": "confirmed", "tx": tx })).into_response();
        }
    }

    match state.db.get_tx_by_sig(&tx_hash).await {
        Ok(Some(tx)) => axum::Json(json!({ "status": "finalized", "tx": tx })).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "unknown transaction".to_string()),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Pending transaction count for a sender, mempool-aware.
async fn get_nonce(State(state): State<Arc<AppState>>, Path(sender): Path<String>) -> Response {
    let sender: Address = match sender.parse() {
        Ok(sender) => sender,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid address".to_string()),
    };
    let pending = state.mempool.pending_nonce(sender).await;
    let state_tx_cnt = state
        .emulator
        .get_state_tx_cnt(&sender, state.chain_id)
        .await
        .unwrap_or(0);
    axum::Json(json!({
        "latest": state_tx_cnt,
        "pending": pending.unwrap_or(state_tx_cnt),
    }))
    .into_response()
}

/// `txpool_content` equivalent.
async fn mempool_content(State(state): State<Arc<AppState>>) -> Response {
    let content = state.mempool.content().await;
    let fmt = |list: Vec<(Address, Vec<Arc<crate::mempool::MpTxEntry>>)>| {
        list.into_iter()
            .map(|(sender, tx_list)| {
                json!({
                    "sender": format!("{sender:#x}"),
                    "tx_list": tx_list
                        .iter()
                        .map(|entry| json!({
                            "tx_hash": format!("{:#x}", entry.tx.tx_hash()),
                            "nonce": entry.tx.nonce(),
                            "gas_price": entry.tx.gas_price().to_string(),
                        }))
                        .collect::<Vec<_>>(),
                })
            })
            .collect::<Vec<_>>()
    };
    axum::Json(json!({
        "pending": fmt(content.pending_list),
        "queued": fmt(content.queued_list),
    }))
    .into_response()
}

/// Highest slot visible to `latest` readers.
async fn block_number(State(state): State<Arc<AppState>>) -> Response {
    let overlay = state.overlay_rx.borrow().clone();
    if let Some(block) = overlay.last() {
        return axum::Json(json!({ "block_number": block.block_slot })).into_response();
    }
    match state.db.get_finalized_cursor().await {
        Ok(cursor) => axum::Json(json!({ "block_number": cursor.unwrap_or(0) })).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
