//! API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<ApiState>`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::{CycleReport, DecisionEngine, ExecutionEngine, Orchestrator, ScanOptions, Scanner};
use crate::safety::{CriticalAction, RejectedTransition, SafetyError, SafetyGate, SafetyUpdate};
use crate::storage::{RecordStore, StoreError};
use crate::strategy;
use crate::types::{
    ChainFamily, CycleLog, Network, PipelineError, Rejection, Run, RunId, SafetyAuditEntry,
    SafetyState, Strategy, StrategyId,
};

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Pipeline components reachable from the handlers.
pub struct ApiState {
    pub store: Arc<dyn RecordStore>,
    pub gate: Arc<SafetyGate>,
    pub scanners: HashMap<ChainFamily, Arc<Scanner>>,
    pub decision: Arc<DecisionEngine>,
    pub execution: Arc<ExecutionEngine>,
    pub orchestrator: Arc<Orchestrator>,
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Rejected(RejectedTransition),

    #[error(transparent)]
    Store(StoreError),

    #[error("{0}")]
    Pipeline(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl From<SafetyError> for ApiError {
    fn from(e: SafetyError) -> Self {
        match e {
            SafetyError::Rejected(r) => ApiError::Rejected(r),
            SafetyError::Store(s) => ApiError::Store(s),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Store(s) => ApiError::Store(s),
            other => ApiError::Pipeline(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Rejected(r) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "safety transition rejected", "reason": r.reason, "detail": r.detail }),
            ),
            ApiError::Store(StoreError::Unavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": self.to_string() }))
            }
            ApiError::Store(_) | ApiError::Pipeline(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": self.to_string() }))
            }
        };
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self, "API request failed");
        }
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
    pub simulations: Vec<Run>,
    pub profitable_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecideResponse {
    pub approved_count: usize,
    pub approved_run_ids: Vec<RunId>,
    pub rejection_reasons: BTreeMap<RunId, Rejection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub executed_count: usize,
    pub failed_count: usize,
    pub safe_mode_triggered: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyRequest {
    #[serde(default)]
    pub updates: Map<String, Value>,
    pub action: Option<String>,
    pub confirmation_phrase: Option<String>,
    pub actor: Option<String>,
}

/// Body of `PUT /api/strategies`. Omitting `id` creates a new strategy.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyRequest {
    #[serde(default)]
    pub id: Option<StrategyId>,
    pub name: String,
    pub family: ChainFamily,
    pub network: Network,
    #[serde(default)]
    pub chain_id: Option<u64>,
    pub venue_a: String,
    pub venue_b: String,
    pub base_token: String,
    pub quote_token: String,
    #[serde(default = "enabled")]
    pub is_enabled: bool,
    #[serde(default)]
    pub is_auto_enabled: bool,
    #[serde(default)]
    pub min_expected_profit: Decimal,
    #[serde(default)]
    pub min_profit_to_gas_ratio: Decimal,
    #[serde(default)]
    pub max_daily_loss: Decimal,
    pub max_trades_per_day: u32,
    #[serde(default)]
    pub is_for_fee_payer_refill: bool,
    #[serde(default)]
    pub is_for_ops_refill: bool,
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

impl ListQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
    }
}

// ---------------------------------------------------------------------------
// Pipeline handlers
// ---------------------------------------------------------------------------

/// POST /api/scan/:family
pub async fn scan(
    State(state): State<AppState>,
    Path(family): Path<String>,
    body: Option<Json<ScanOptions>>,
) -> Result<Json<ScanResponse>, ApiError> {
    let family: ChainFamily = family
        .parse()
        .map_err(|e: anyhow::Error| ApiError::BadRequest(e.to_string()))?;
    let scanner = state
        .scanners
        .get(&family)
        .ok_or_else(|| ApiError::BadRequest(format!("no scanner configured for {family}")))?;
    let options = body.map(|Json(o)| o).unwrap_or_default();

    let report = scanner.scan_stored(options).await?;
    Ok(Json(ScanResponse {
        simulations: report.simulations,
        profitable_count: report.profitable_count,
    }))
}

/// POST /api/decide
pub async fn decide(State(state): State<AppState>) -> Result<Json<DecideResponse>, ApiError> {
    let report = state.decision.evaluate().await?;
    Ok(Json(DecideResponse {
        approved_count: report.approved_count(),
        message: report.halted.map(|h| h.detail),
        approved_run_ids: report.approved_ids,
        rejection_reasons: report.rejections,
    }))
}

/// POST /api/execute
pub async fn execute(State(state): State<AppState>) -> Result<Json<ExecuteResponse>, ApiError> {
    let report = state.execution.execute_approved().await?;
    Ok(Json(ExecuteResponse {
        executed_count: report.executed_count,
        failed_count: report.failed_count,
        safe_mode_triggered: report.safe_mode_triggered,
    }))
}

/// POST /api/orchestrate
pub async fn orchestrate(State(state): State<AppState>) -> Json<CycleReport> {
    Json(state.orchestrator.run_cycle().await)
}

// ---------------------------------------------------------------------------
// Safety handlers
// ---------------------------------------------------------------------------

/// GET /api/safety
pub async fn get_safety(State(state): State<AppState>) -> Result<Json<SafetyState>, ApiError> {
    Ok(Json(state.gate.read_state().await?))
}

/// POST /api/safety
pub async fn post_safety(
    State(state): State<AppState>,
    Json(request): Json<SafetyRequest>,
) -> Result<Json<SafetyState>, ApiError> {
    let update = SafetyUpdate::from_json_map(&request.updates).map_err(ApiError::Rejected)?;
    let action = request
        .action
        .as_deref()
        .map(str::parse::<CriticalAction>)
        .transpose()
        .map_err(ApiError::Rejected)?;
    let actor = request.actor.as_deref().unwrap_or("api");

    let next = state
        .gate
        .propose_transition(&update, actor, action, request.confirmation_phrase.as_deref())
        .await?;
    info!(actor, version = next.version, "Safety state updated via API");
    Ok(Json(next))
}

/// GET /api/safety/audit
pub async fn get_safety_audit(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<SafetyAuditEntry>>, ApiError> {
    Ok(Json(state.gate.audit_log(query.limit()).await?))
}

// ---------------------------------------------------------------------------
// Strategy handlers
// ---------------------------------------------------------------------------

/// GET /api/strategies
pub async fn get_strategies(State(state): State<AppState>) -> Result<Json<Vec<Strategy>>, ApiError> {
    Ok(Json(state.store.list_strategies().await?))
}

/// PUT /api/strategies
///
/// Validated against the family scanner's supported networks before it is
/// stored, so a bad definition never reaches a scan.
pub async fn put_strategy(
    State(state): State<AppState>,
    Json(request): Json<StrategyRequest>,
) -> Result<Json<Strategy>, ApiError> {
    let scanner = state
        .scanners
        .get(&request.family)
        .ok_or_else(|| ApiError::BadRequest(format!("no scanner configured for {}", request.family)))?;

    let now = Utc::now();
    let created_at = match request.id {
        Some(id) => state.store.get_strategy(id).await?.map(|s| s.created_at),
        None => None,
    };
    let strategy = Strategy {
        id: request.id.unwrap_or_else(Uuid::new_v4),
        name: request.name,
        family: request.family,
        network: request.network,
        chain_id: request.chain_id,
        venue_a: request.venue_a,
        venue_b: request.venue_b,
        base_token: request.base_token,
        quote_token: request.quote_token,
        is_enabled: request.is_enabled,
        is_auto_enabled: request.is_auto_enabled,
        min_expected_profit: request.min_expected_profit,
        min_profit_to_gas_ratio: request.min_profit_to_gas_ratio,
        max_daily_loss: request.max_daily_loss,
        max_trades_per_day: request.max_trades_per_day,
        is_for_fee_payer_refill: request.is_for_fee_payer_refill,
        is_for_ops_refill: request.is_for_ops_refill,
        created_at: created_at.unwrap_or(now),
        updated_at: now,
    };
    strategy::validate(&strategy, scanner.support()).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    state.store.upsert_strategy(&strategy).await?;
    info!(strategy_id = %strategy.id, name = %strategy.name, family = %strategy.family, "Strategy saved");
    Ok(Json(strategy))
}

// ---------------------------------------------------------------------------
// Read handlers
// ---------------------------------------------------------------------------

/// GET /api/runs
pub async fn get_runs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Run>>, ApiError> {
    Ok(Json(state.store.recent_runs(query.limit()).await?))
}

/// GET /api/cycles
pub async fn get_cycles(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<CycleLog>>, ApiError> {
    Ok(Json(state.store.recent_cycle_logs(query.limit()).await?))
}

/// Health check endpoint.
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
