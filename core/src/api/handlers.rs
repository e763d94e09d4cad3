//! API Handlers
//!
//! Request handlers for the HTTP API. Every wallet-scoped handler resolves
//! the wallet's session first; a missing or expired session is a 401.

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use log::{error, info, warn};

use super::types::*;
use crate::client::{VaultClient, VaultClientFactory};
use crate::error::{ErrorKind, SessionError, ValidationError, VaultError};
use crate::pool::{PoolClient, PoolSnapshot};
use crate::session::{SessionInfo, SessionManager};

// ============================================================================
// Shared State
// ============================================================================

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub sessions: Arc<SessionManager<VaultClientFactory>>,
    pub pool: Arc<PoolClient>,
    pub start_time: std::time::Instant,
}

/// A [`VaultError`] on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub VaultError);

impl From<VaultError> for ApiError {
    fn from(e: VaultError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = ErrorResponse::from_error(&self.0);
        match self.0.kind() {
            ErrorKind::Internal => error!("request failed: {}", self.0),
            ErrorKind::Transient | ErrorKind::Integration => warn!("request failed: {}", self.0),
            _ => {}
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn client_for(state: &ApiState, wallet_address: &str) -> Result<Arc<VaultClient>, ApiError> {
    Ok(state.sessions.require_client(wallet_address)?)
}

// ============================================================================
// Health
// ============================================================================

/// Health check endpoint
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_sessions: state.sessions.len(),
    })
}

// ============================================================================
// Session
// ============================================================================

pub async fn init_session(
    State(state): State<ApiState>,
    Json(req): Json<InitSessionRequest>,
) -> ApiResult<SessionInfo> {
    let signature = bs58::decode(&req.signature)
        .into_vec()
        .map_err(|e| VaultError::from(ValidationError::Malformed(format!("signature: {e}"))))?;
    let info = state
        .sessions
        .initialize_session(&req.wallet_address, &signature)?;
    // Re-issues grants lost with a restart.
    if let Some(client) = state.sessions.get_client(&req.wallet_address) {
        if let Err(e) = client.authorize_transfers().await {
            warn!("could not re-authorize transfers for {}: {e}", req.wallet_address);
        }
    }
    Ok(Json(info))
}

pub async fn get_session(
    State(state): State<ApiState>,
    Path(wallet): Path<String>,
) -> Response {
    match state.sessions.session_info(&wallet) {
        Some(info) => Json(info).into_response(),
        None => ApiError(SessionError::Missing { wallet }.into()).into_response(),
    }
}

pub async fn destroy_session(
    State(state): State<ApiState>,
    Path(wallet): Path<String>,
) -> impl IntoResponse {
    let destroyed = state.sessions.destroy_session(&wallet);
    Json(DestroySessionResponse {
        wallet_address: wallet,
        destroyed,
    })
}

// ============================================================================
// Pool
// ============================================================================

pub async fn get_pool(State(state): State<ApiState>) -> ApiResult<PoolSnapshot> {
    Ok(Json(state.pool.fetch_pool().await?))
}

pub async fn get_balance(
    State(state): State<ApiState>,
    Path(wallet): Path<String>,
) -> ApiResult<BalanceResponse> {
    let balance = client_for(&state, &wallet)?.balance().await?;
    Ok(Json(BalanceResponse {
        wallet_address: wallet,
        shares: balance.shares,
        value: balance.value,
        stale: balance.stale,
        as_of: balance.as_of,
    }))
}

pub async fn deposit(
    State(state): State<ApiState>,
    Json(req): Json<AmountRequest>,
) -> ApiResult<DepositResponse> {
    let receipt = client_for(&state, &req.wallet_address)?
        .deposit(req.amount)
        .await?;
    Ok(Json(DepositResponse {
        shares_minted: receipt.shares_minted,
        total_shares: receipt.total_shares,
        deposit_index: receipt.deposit_index,
        submission: (&receipt.submission).into(),
    }))
}

pub async fn withdraw(
    State(state): State<ApiState>,
    Json(req): Json<AmountRequest>,
) -> ApiResult<WithdrawResponse> {
    let receipt = client_for(&state, &req.wallet_address)?
        .withdraw(req.amount)
        .await?;
    Ok(Json(WithdrawResponse {
        shares_burned: receipt.shares_burned,
        remaining_shares: receipt.remaining_shares,
        submission: (&receipt.submission).into(),
    }))
}

// ============================================================================
// Transfers
// ============================================================================

pub async fn list_transfers(
    State(state): State<ApiState>,
    Path(wallet): Path<String>,
) -> ApiResult<TransfersResponse> {
    let transfers = client_for(&state, &wallet)?.list_transfers().await?;
    Ok(Json(TransfersResponse {
        wallet_address: wallet,
        transfers,
    }))
}

pub async fn due_transfers(
    State(state): State<ApiState>,
    Path(wallet): Path<String>,
) -> ApiResult<TransfersResponse> {
    let transfers = client_for(&state, &wallet)?.due_transfers().await?;
    Ok(Json(TransfersResponse {
        wallet_address: wallet,
        transfers,
    }))
}

/// Cached listing for when the ledger is unreachable
pub async fn cached_transfers(
    State(state): State<ApiState>,
    Path(wallet): Path<String>,
) -> ApiResult<CachedTransfersResponse> {
    let transfers = client_for(&state, &wallet)?.cached_transfers()?;
    Ok(Json(CachedTransfersResponse {
        wallet_address: wallet,
        transfers,
    }))
}

pub async fn setup_transfer(
    State(state): State<ApiState>,
    Json(req): Json<SetupTransferRequest>,
) -> ApiResult<SetupTransferResponse> {
    let setup = client_for(&state, &req.wallet_address)?
        .setup_transfer(&req.recipient, &req.memo, req.amount, req.interval_seconds)
        .await?;
    info!("transfer {} scheduled via API", setup.transfer_id);
    Ok(Json(SetupTransferResponse {
        transfer_id: setup.transfer_id.to_string(),
        transfer_nonce: setup.transfer_nonce,
        next_execution: setup.next_execution,
        submission: (&setup.submission).into(),
    }))
}

/// Manual execution of the transfer's current slot
pub async fn execute_transfer(
    State(state): State<ApiState>,
    Json(req): Json<TransferActionRequest>,
) -> ApiResult<ExecuteTransferResponse> {
    let receipt = client_for(&state, &req.wallet_address)?
        .execute_transfer(&req.transfer_id)
        .await?;
    Ok(Json(ExecuteTransferResponse {
        transfer_id: receipt.transfer_id.to_string(),
        execution_index: receipt.execution_index,
        shares_burned: receipt.shares_burned,
        remaining_shares: receipt.remaining_shares,
        submission: (&receipt.submission).into(),
    }))
}

pub async fn cancel_transfer(
    State(state): State<ApiState>,
    Json(req): Json<TransferActionRequest>,
) -> ApiResult<CancelTransferResponse> {
    let submission = client_for(&state, &req.wallet_address)?
        .cancel_transfer(&req.transfer_id)
        .await?;
    Ok(Json(CancelTransferResponse {
        transfer_id: req.transfer_id,
        submission: (&submission).into(),
    }))
}

/// Fallback for unknown routes
pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new("no such route", "NOT_FOUND")),
    )
}
