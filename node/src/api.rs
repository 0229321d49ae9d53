//! # REST API
//!
//! Builds the axum router that exposes the ledger over HTTP. All endpoints
//! share application state through axum's `State` extractor.
//!
//! Caller identity is taken from the request body. This is a devnet
//! surface: nothing authenticates the caller.
//!
//! ## Endpoints
//!
//! | Method | Path                     | Description                          |
//! |--------|--------------------------|--------------------------------------|
//! | GET    | `/health`                | Liveness probe                       |
//! | GET    | `/status`                | Ledger status summary                |
//! | GET    | `/balances/:token/:user` | Tracked balance of one pair          |
//! | GET    | `/holdings/:user`        | Non-zero holdings of a user          |
//! | GET    | `/events?since=N`        | Committed notifications after `N`    |
//! | POST   | `/deposit`               | Pull funds into custody              |
//! | POST   | `/withdraw`              | Pay out a tracked balance            |
//! | POST   | `/recover`               | Owner sweep of a token's custody     |
//! | POST   | `/faucet`                | Mint external funds (devnet)         |

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use custody_contracts::{VaultError, VaultLedger};
use custody_protocol::{
    AccountId, Address, Amount, AuthorizationPolicy, InMemoryGateway, LedgerEvent,
    TokenBehavior, TokenId, TransferGateway,
};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone: everything sits behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    pub ledger: Arc<VaultLedger>,
    /// The gateway backing `ledger`, reachable directly for the faucet.
    pub gateway: Arc<InMemoryGateway>,
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/balances/:token/:user", get(balance_handler))
        .route("/holdings/:user", get(holdings_handler))
        .route("/events", get(events_handler))
        .route("/deposit", post(deposit_handler))
        .route("/withdraw", post(withdraw_handler))
        .route("/recover", post(recover_handler))
        .route("/faucet", post(faucet_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Body of `POST /deposit` and `POST /withdraw`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransferRequest {
    pub caller: AccountId,
    pub token: TokenId,
    pub amount: Amount,
}

/// Body of `POST /recover`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RecoverRequest {
    pub caller: AccountId,
    pub token: TokenId,
}

/// Body of `POST /faucet`.
#[derive(Debug, Serialize, Deserialize)]
pub struct FaucetRequest {
    pub token: TokenId,
    pub to: AccountId,
    pub amount: Amount,
    /// Authorization to grant the ledger over `to`'s funds. Defaults to
    /// `amount`; pass `0` to grant nothing.
    #[serde(default)]
    pub authorize: Option<Amount>,
    /// Switch the token into a non-standard behavior before minting.
    #[serde(default)]
    pub behavior: Option<TokenBehavior>,
}

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub owner: Address,
    pub custody_account: Address,
    pub authorization: AuthorizationPolicy,
    /// Whether a mutating operation is in flight right now.
    pub locked: bool,
    /// Sequence number of the latest committed event, 0 if none.
    pub last_event_seq: u64,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

/// Response payload for `GET /balances/:token/:user`.
#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub token: TokenId,
    pub user: AccountId,
    pub balance: Amount,
}

/// One entry of a holdings listing.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HoldingEntry {
    pub token: TokenId,
    pub balance: Amount,
}

/// Response payload for `GET /holdings/:user`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HoldingsResponse {
    pub user: AccountId,
    /// Sorted by token address.
    pub holdings: Vec<HoldingEntry>,
}

/// Response payload for `POST /deposit` and `POST /withdraw`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransferResponse {
    pub user: AccountId,
    pub token: TokenId,
    /// Balance after the operation.
    pub balance: Amount,
}

/// Response payload for `POST /recover`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RecoverResponse {
    pub token: TokenId,
    pub to: AccountId,
    pub amount: Amount,
}

/// Response payload for `POST /faucet`.
#[derive(Debug, Serialize, Deserialize)]
pub struct FaucetResponse {
    pub external_balance: Amount,
    pub authorized: Amount,
}

/// Query string of `GET /events`.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub since: u64,
}

/// Error body returned by every endpoint on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Handler failure, rendered as an [`ErrorResponse`].
#[derive(Debug)]
pub enum ApiError {
    /// The ledger rejected the operation.
    Vault(VaultError),
    /// A path parameter is not a valid address.
    InvalidAddress(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidAddress(_) => StatusCode::BAD_REQUEST,
            ApiError::Vault(err) => match err {
                VaultError::InvalidToken
                | VaultError::InvalidAmount
                | VaultError::BalanceOverflow { .. } => StatusCode::BAD_REQUEST,
                VaultError::NotOwner { .. } => StatusCode::FORBIDDEN,
                VaultError::Reentrant
                | VaultError::InsufficientBalance { .. }
                | VaultError::InsufficientAuthorization { .. }
                | VaultError::NothingToRecover { .. } => StatusCode::CONFLICT,
                VaultError::TransferFailed { .. } => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::Vault(err) => ErrorResponse {
                error: err.to_string(),
                kind: err.kind().to_string(),
            },
            ApiError::InvalidAddress(error) => ErrorResponse {
                error,
                kind: "invalid_address".into(),
            },
        };
        (status, Json(body)).into_response()
    }
}

fn parse_address(raw: &str) -> Result<Address, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::InvalidAddress(format!("{raw}: {e}")))
}

impl AppState {
    /// Runs one mutating ledger call and records its metrics.
    fn observe<T>(
        &self,
        call: impl FnOnce(&VaultLedger) -> Result<T, VaultError>,
    ) -> Result<T, ApiError> {
        let started = Instant::now();
        let result = call(self.ledger.as_ref());
        self.metrics
            .operation_latency_seconds
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(value) => {
                self.metrics
                    .last_event_seq
                    .set(self.ledger.last_event_seq() as i64);
                Ok(value)
            }
            Err(err) => {
                self.metrics.record_rejection(err.kind());
                Err(ApiError::Vault(err))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status` — returns a ledger status summary.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.ledger.config();
    Json(StatusResponse {
        version: state.version.clone(),
        owner: config.owner,
        custody_account: config.custody_account,
        authorization: config.authorization,
        locked: state.ledger.is_locked(),
        last_event_seq: state.ledger.last_event_seq(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `GET /balances/:token/:user` — tracked balance, zero if never deposited.
async fn balance_handler(
    Path((token, user)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let token = parse_address(&token)?;
    let user = parse_address(&user)?;
    Ok(Json(BalanceResponse {
        token,
        user,
        balance: state.ledger.balance(token, user),
    }))
}

/// `GET /holdings/:user` — every token the user holds a non-zero balance of.
async fn holdings_handler(
    Path(user): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<HoldingsResponse>, ApiError> {
    let user = parse_address(&user)?;
    let mut holdings: Vec<HoldingEntry> = state
        .ledger
        .holdings(user)
        .into_iter()
        .map(|(token, balance)| HoldingEntry { token, balance })
        .collect();
    holdings.sort_by_key(|h| h.token);
    Ok(Json(HoldingsResponse { user, holdings }))
}

/// `GET /events?since=N` — committed notifications with `seq > N`.
async fn events_handler(
    Query(query): Query<EventsQuery>,
    State(state): State<AppState>,
) -> Json<Vec<LedgerEvent>> {
    Json(state.ledger.events_since(query.since))
}

/// `POST /deposit`
async fn deposit_handler(
    State(state): State<AppState>,
    Json(req): Json<TransferRequest>,
) -> Result<Json<TransferResponse>, ApiError> {
    let balance = state.observe(|ledger| ledger.deposit(req.caller, req.token, req.amount))?;
    state.metrics.deposits_total.inc();
    Ok(Json(TransferResponse {
        user: req.caller,
        token: req.token,
        balance,
    }))
}

/// `POST /withdraw`
async fn withdraw_handler(
    State(state): State<AppState>,
    Json(req): Json<TransferRequest>,
) -> Result<Json<TransferResponse>, ApiError> {
    let balance = state.observe(|ledger| ledger.withdraw(req.caller, req.token, req.amount))?;
    state.metrics.withdrawals_total.inc();
    Ok(Json(TransferResponse {
        user: req.caller,
        token: req.token,
        balance,
    }))
}

/// `POST /recover` — owner only.
async fn recover_handler(
    State(state): State<AppState>,
    Json(req): Json<RecoverRequest>,
) -> Result<Json<RecoverResponse>, ApiError> {
    let amount = state.observe(|ledger| ledger.recover(req.caller, req.token))?;
    state.metrics.recoveries_total.inc();
    Ok(Json(RecoverResponse {
        token: req.token,
        to: state.ledger.owner(),
        amount,
    }))
}

/// `POST /faucet` — mints external funds and grants the ledger an
/// authorization over them. Bypasses the ledger entirely.
async fn faucet_handler(
    State(state): State<AppState>,
    Json(req): Json<FaucetRequest>,
) -> Result<Json<FaucetResponse>, ApiError> {
    if req.token.is_zero() {
        return Err(ApiError::Vault(VaultError::InvalidToken));
    }
    if req.amount == 0 {
        return Err(ApiError::Vault(VaultError::InvalidAmount));
    }

    let gateway = &state.gateway;
    if let Some(behavior) = req.behavior {
        gateway.set_behavior(req.token, behavior);
    }
    gateway.mint(req.token, req.to, req.amount);

    let grant = req.authorize.unwrap_or(req.amount);
    if !gateway.set_authorization(req.token, req.to, grant) {
        tracing::warn!(token = %req.token, to = %req.to, grant, "faucet authorization refused");
    }
    tracing::info!(token = %req.token, to = %req.to, amount = req.amount, "faucet mint");

    Ok(Json(FaucetResponse {
        external_balance: gateway.external_balance(req.token, req.to),
        authorized: gateway.authorized_amount(req.token, req.to),
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
