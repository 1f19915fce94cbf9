//! HTTP command API
//!
//! Thin JSON layer over [`Ledger`]: every handler runs its ledger call on the
//! blocking pool (lock waits are synchronous), counts the outcome and maps
//! business errors through [`ApiError`].

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use monaddit_ledger::types::{amount_serde, delta_serde, option_amount_serde};
use monaddit_ledger::{
    Address, Amount, Bond, BondId, ChallengeId, ChallengeOutcome, ContentId, ContentRecord, Ledger, LedgerError,
    NewContent, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiJson, ApiPath, ApiQuery};
use crate::metrics::LedgerMetrics;
use crate::rate_limit::{rate_limit, RateLimiter};

const DEFAULT_PAGE_SIZE: usize = 20;

/// Shared handler state
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub metrics: Arc<LedgerMetrics>,
    pub node_name: String,
    pub started_at: Timestamp,
    /// Serve `/metrics`
    pub expose_metrics: bool,
}

impl AppState {
    pub fn new(ledger: Arc<Ledger>, metrics: Arc<LedgerMetrics>, node_name: impl Into<String>) -> Self {
        let started_at = ledger.now();
        Self {
            ledger,
            metrics,
            node_name: node_name.into(),
            started_at,
            expose_metrics: true,
        }
    }

    /// Run a ledger call off the async workers and count its outcome
    async fn call<T, F>(&self, op: &'static str, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&Ledger) -> monaddit_ledger::Result<T> + Send + 'static,
    {
        let ledger = self.ledger.clone();
        let result = tokio::task::spawn_blocking(move || f(&ledger))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        self.metrics.record(op, &result);
        result.map_err(ApiError::from)
    }
}

/// Build the API router
pub fn router(state: Arc<AppState>, config: &ApiConfig) -> Router {
    let mut routes = Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats));
    if state.expose_metrics {
        routes = routes.route("/metrics", get(metrics));
    }
    let routes = routes
        // Accounts
        .route("/transfers", post(transfer_confirmed))
        .route("/stake", post(stake))
        .route("/withdraw", post(withdraw))
        .route("/account/:address", get(get_account))
        .route("/account/:address/claim", post(claim))
        .route("/account/:address/bonds", get(account_bonds))
        // Content and bonds
        .route("/content", post(create_content))
        .route("/contents", get(list_contents))
        .route("/content/hash/:hash", get(get_content_by_hash))
        .route("/content/:id", get(get_content))
        .route("/content/:id/bond", post(lock_bond))
        .route("/content/:id/challenge", post(challenge_content))
        .route("/bond/:id", get(get_bond))
        .route("/bond/:id/check-unlock", post(check_unlock))
        .route("/bond/:id/withdraw", post(withdraw_bond))
        // Disputes and rewards
        .route("/challenge/:id", get(get_challenge))
        .route("/challenge/:id/resolve", post(resolve_challenge))
        .route("/epoch/accrue", post(accrue_epoch))
        .with_state(state);

    let routes = if config.rate_limit.enabled {
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        routes.layer(middleware::from_fn_with_state(limiter, rate_limit))
    } else {
        routes
    };
    let routes = if config.cors_enabled {
        routes.layer(cors_layer(&config.cors_origins))
    } else {
        routes
    };
    routes.layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::from(Any)
    } else {
        let list: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(%origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(list)
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

// ============================================================================
// Request / response bodies
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub tx_hash: String,
    pub address: Address,
    #[serde(with = "delta_serde")]
    pub delta: i128,
}

#[derive(Debug, Deserialize)]
pub struct StakeRequest {
    pub address: Address,
    #[serde(with = "amount_serde")]
    pub amount: Amount,
}

#[derive(Debug, Deserialize)]
pub struct LockBondRequest {
    pub owner: Address,
    #[serde(default, with = "option_amount_serde")]
    pub amount: Option<Amount>,
}

#[derive(Debug, Deserialize)]
pub struct ChallengeRequest {
    pub challenger: Address,
    #[serde(default)]
    pub reason: String,
    #[serde(default, with = "option_amount_serde")]
    pub stake: Option<Amount>,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawBondRequest {
    pub caller: Address,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub outcome: ChallengeOutcome,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub node: String,
    pub now: Timestamp,
    pub uptime_secs: i64,
}

/// Content record with its most recent bond
#[derive(Debug, Serialize)]
pub struct ContentView {
    #[serde(flatten)]
    pub content: ContentRecord,
    pub bond: Option<Bond>,
}

fn parse_address(raw: &str) -> Result<Address, ApiError> {
    Ok(Address::parse(raw)?)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let now = state.ledger.now();
    Json(HealthResponse {
        status: "ok",
        node: state.node_name.clone(),
        now,
        uptime_secs: now - state.started_at,
    })
}

async fn stats(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let stats = state.call("stats", |ledger| ledger.stats()).await?;
    Ok(Json(stats))
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let stats = state.call("stats", |ledger| ledger.stats()).await?;
    state.metrics.observe(&stats);
    let body = state
        .metrics
        .render()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

async fn transfer_confirmed(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<TransferRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .call("transfer", move |ledger| {
            ledger.on_transfer_confirmed(&req.tx_hash, &req.address, req.delta)
        })
        .await?;
    Ok(Json(outcome))
}

async fn stake(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<StakeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let account = state
        .call("deposit", move |ledger| ledger.deposit(&req.address, req.amount))
        .await?;
    Ok(Json(account))
}

async fn withdraw(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<StakeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let account = state
        .call("withdraw", move |ledger| ledger.withdraw(&req.address, req.amount))
        .await?;
    Ok(Json(account))
}

async fn get_account(
    State(state): State<Arc<AppState>>,
    ApiPath(address): ApiPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let address = parse_address(&address)?;
    let view = state.call("account", move |ledger| ledger.account(&address)).await?;
    Ok(Json(view))
}

async fn claim(
    State(state): State<Arc<AppState>>,
    ApiPath(address): ApiPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let address = parse_address(&address)?;
    let claim = state.call("claim", move |ledger| ledger.claim(&address)).await?;
    Ok(Json(claim))
}

async fn account_bonds(
    State(state): State<Arc<AppState>>,
    ApiPath(address): ApiPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let address = parse_address(&address)?;
    let bonds = state.call("bonds_of", move |ledger| ledger.bonds_of(&address)).await?;
    Ok(Json(bonds))
}

async fn create_content(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<NewContent>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .call("create_content", move |ledger| ledger.create_content(req))
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_contents(
    State(state): State<Arc<AppState>>,
    ApiQuery(page): ApiQuery<Pagination>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = page.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let offset = page.offset.unwrap_or(0);
    let records = state
        .call("list_contents", move |ledger| ledger.list_contents(limit, offset))
        .await?;
    Ok(Json(records))
}

async fn get_content(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = ContentId::new(id);
    let view = state
        .call("content", move |ledger| {
            let content = ledger.content(&id)?;
            let bond = match ledger.bond_for_content(&id) {
                Ok(bond) => Some(bond),
                Err(LedgerError::NotFound { .. }) => None,
                Err(err) => return Err(err),
            };
            Ok(ContentView { content, bond })
        })
        .await?;
    Ok(Json(view))
}

async fn get_content_by_hash(
    State(state): State<Arc<AppState>>,
    ApiPath(hash): ApiPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .call("content_by_hash", move |ledger| ledger.content_by_hash(&hash))
        .await?;
    Ok(Json(record))
}

async fn lock_bond(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<LockBondRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = ContentId::new(id);
    let bond = state
        .call("lock_bond", move |ledger| ledger.lock_bond(&req.owner, &id, req.amount))
        .await?;
    Ok((StatusCode::CREATED, Json(bond)))
}

async fn challenge_content(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<ChallengeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = ContentId::new(id);
    let challenge = state
        .call("open_challenge", move |ledger| {
            ledger.challenge_content(&req.challenger, &id, req.stake, &req.reason)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(challenge)))
}

async fn get_bond(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<BondId>,
) -> Result<impl IntoResponse, ApiError> {
    let bond = state.call("bond", move |ledger| ledger.bond(id)).await?;
    Ok(Json(bond))
}

async fn check_unlock(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<BondId>,
) -> Result<impl IntoResponse, ApiError> {
    let bond = state.call("check_unlock", move |ledger| ledger.check_unlock(id)).await?;
    Ok(Json(bond))
}

async fn withdraw_bond(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<BondId>,
    ApiJson(req): ApiJson<WithdrawBondRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let bond = state
        .call("withdraw_bond", move |ledger| ledger.withdraw_bond(id, &req.caller))
        .await?;
    Ok(Json(bond))
}

async fn get_challenge(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<ChallengeId>,
) -> Result<impl IntoResponse, ApiError> {
    let challenge = state.call("challenge", move |ledger| ledger.challenge(id)).await?;
    Ok(Json(challenge))
}

async fn resolve_challenge(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<ChallengeId>,
    ApiJson(req): ApiJson<ResolveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let resolution = state
        .call("resolve", move |ledger| ledger.resolve(id, req.outcome))
        .await?;
    Ok(Json(resolution))
}

async fn accrue_epoch(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let accrual = state.call("accrue_epoch", |ledger| ledger.accrue_epoch()).await?;
    Ok(Json(accrual))
}
