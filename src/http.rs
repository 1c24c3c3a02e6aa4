//! Thin HTTP boundary over the core services.
//!
//! Handlers validate the request, dispatch to one core operation and
//! translate its result; no business rule lives here. Monetary amounts cross
//! this boundary as base-10 strings only.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::amount::Amount;
use crate::asset::AssetRegistry;
use crate::engine::{TransferEngine, TransferRequest};
use crate::error::LedgerError;
use crate::history::{Cursor, HistoryReader};
use crate::transaction::TransactionKind;
use crate::wallet::{Wallet, WalletStore};
use crate::LedgerStore;

#[derive(Clone)]
pub struct AppState {
    engine: Arc<TransferEngine>,
    wallets: Arc<WalletStore>,
    history: Arc<HistoryReader>,
    assets: Arc<AssetRegistry>,
}

impl AppState {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            engine: Arc::new(TransferEngine::new(Arc::clone(&store))),
            wallets: Arc::new(WalletStore::new(Arc::clone(&store))),
            history: Arc::new(HistoryReader::new(Arc::clone(&store))),
            assets: Arc::new(AssetRegistry::new(store)),
        }
    }

    pub fn wallets(&self) -> &WalletStore {
        &self.wallets
    }

    pub fn assets(&self) -> &AssetRegistry {
        &self.assets
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/assets", get(list_assets))
        .route("/users", get(list_users))
        .route("/users/{user_id}/wallets", get(list_user_wallets))
        .route("/wallets/{user_id}/{asset_slug}/balance", get(get_balance))
        .route("/wallets/{wallet_id}/history", get(get_history))
        .route("/transactions/{kind}", post(create_transaction))
        .with_state(state)
}

/// Boundary error: a status code and a message passed through unmodified.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        let status = match &err {
            LedgerError::AssetNotFound(_) | LedgerError::WalletNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            LedgerError::Storage(_) | LedgerError::DuplicateIdempotencyKey => {
                error!(error = %err, "internal error at http boundary");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionBody {
    user_id: Uuid,
    asset_slug: String,
    amount: String,
    metadata: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionResponse {
    id: Uuid,
    #[serde(rename = "type")]
    kind: TransactionKind,
    amount: String,
    created_at: DateTime<Utc>,
}

async fn create_transaction(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    Json(body): Json<TransactionBody>,
) -> Result<(StatusCode, Json<TransactionResponse>), ApiError> {
    let kind = TransactionKind::parse_str(&kind.to_uppercase())
        .ok_or_else(|| ApiError::not_found(format!("Unknown transaction type: {kind}")))?;

    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or(LedgerError::MissingField("Idempotency-Key"))?
        .to_string();

    let amount = Amount::parse(&body.amount)?;

    let system_wallet = state
        .wallets
        .find_system_wallet(&body.asset_slug)
        .await?
        .ok_or_else(|| {
            ApiError::not_found(format!("System wallet for {} not found", body.asset_slug))
        })?;
    let user_wallet = state
        .wallets
        .find_wallet(body.user_id, &body.asset_slug)
        .await?
        .ok_or_else(|| {
            ApiError::not_found(format!(
                "Wallet for user {} and asset {} not found",
                body.user_id, body.asset_slug
            ))
        })?;

    // Topups and bonuses flow out of the system wallet, spends into it.
    let (source, dest) = match kind {
        TransactionKind::Topup | TransactionKind::Bonus => (system_wallet.id, user_wallet.id),
        TransactionKind::Spend => (user_wallet.id, system_wallet.id),
    };

    let transaction = state
        .engine
        .transfer(TransferRequest {
            source_wallet_id: source,
            dest_wallet_id: dest,
            amount,
            kind,
            idempotency_key,
            metadata: body.metadata,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(TransactionResponse {
            id: transaction.id,
            kind: transaction.kind,
            amount: transaction.amount.to_string(),
            created_at: transaction.created_at,
        }),
    ))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BalanceResponse {
    balance: String,
    asset: String,
    user_id: Uuid,
}

async fn get_balance(
    State(state): State<AppState>,
    Path((user_id, asset_slug)): Path<(Uuid, String)>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let wallet = state
        .wallets
        .find_wallet(user_id, &asset_slug)
        .await?
        .ok_or_else(|| ApiError::not_found("Wallet not found for this user and asset"))?;

    Ok(Json(BalanceResponse {
        balance: wallet.balance.to_string(),
        asset: asset_slug,
        user_id,
    }))
}

#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
    cursor: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryItem {
    id: Uuid,
    amount: String,
    direction: crate::transaction::Direction,
    created_at: DateTime<Utc>,
    transaction_id: Uuid,
    #[serde(rename = "type")]
    kind: TransactionKind,
    metadata: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryResponse {
    data: Vec<HistoryItem>,
    pagination: Pagination,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    next_cursor: Option<String>,
}

async fn get_history(
    State(state): State<AppState>,
    Path(wallet_id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let cursor = params
        .cursor
        .as_deref()
        .map(str::parse::<Cursor>)
        .transpose()?;

    let page = state
        .history
        .get_history(wallet_id, params.limit.unwrap_or(0), cursor)
        .await?;

    Ok(Json(HistoryResponse {
        data: page
            .entries
            .into_iter()
            .map(|e| HistoryItem {
                id: e.id,
                amount: e.amount.to_string(),
                direction: e.direction,
                created_at: e.created_at,
                transaction_id: e.transaction_id,
                kind: e.kind,
                metadata: e.metadata,
            })
            .collect(),
        pagination: Pagination {
            next_cursor: page.next_cursor.map(|c| c.to_string()),
        },
    }))
}

async fn list_assets(
    State(state): State<AppState>,
) -> Result<Json<Vec<crate::asset::Asset>>, ApiError> {
    Ok(Json(state.assets.list_assets().await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserSummary {
    id: Uuid,
}

/// Owners are known only through their wallets; each distinct owner id with
/// at least one wallet counts as a user.
async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<UserSummary>>, ApiError> {
    let owners = state.wallets.list_owners().await?;
    Ok(Json(owners.into_iter().map(|id| UserSummary { id }).collect()))
}

async fn list_user_wallets(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<Wallet>>, ApiError> {
    Ok(Json(state.wallets.list_wallets(user_id).await?))
}
