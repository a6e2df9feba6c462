//! Shared types for the ARBWARDEN pipeline.
//!
//! These types form the data model used across all modules: strategies,
//! runs and their state machine, risk windows, the safety control-plane
//! record and the per-cycle audit log. They are kept free of behaviour that
//! needs I/O so that storage, engine and API modules can all depend on them.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::storage::StoreError;

pub type StrategyId = Uuid;
pub type RunId = Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Market family a strategy trades in. Each family has its own scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Native,
    Evm,
}

impl ChainFamily {
    pub const ALL: &'static [ChainFamily] = &[ChainFamily::Native, ChainFamily::Evm];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainFamily::Native => "native",
            ChainFamily::Evm => "evm",
        }
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChainFamily {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "native" | "solana" => Ok(ChainFamily::Native),
            "evm" => Ok(ChainFamily::Evm),
            _ => Err(anyhow::anyhow!("Unknown chain family: {s}")),
        }
    }
}

/// Network a strategy is configured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Network {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" | "devnet" => Ok(Network::Testnet),
            _ => Err(anyhow::anyhow!("Unknown network: {s}")),
        }
    }
}

/// Operational wallet roles that can request a refill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletRole {
    FeePayer,
    Ops,
}

impl WalletRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletRole::FeePayer => "fee_payer",
            WalletRole::Ops => "ops",
        }
    }
}

impl fmt::Display for WalletRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WalletRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fee_payer" => Ok(WalletRole::FeePayer),
            "ops" => Ok(WalletRole::Ops),
            _ => Err(anyhow::anyhow!("Unknown wallet role: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// A configured two-leg opportunity template with its policy thresholds.
///
/// Strategies are never deleted while runs reference them; operators
/// soft-disable through `is_enabled` / `is_auto_enabled`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    pub id: StrategyId,
    pub name: String,
    pub family: ChainFamily,
    pub network: Network,
    /// EVM chain id. Ignored for the native family.
    pub chain_id: Option<u64>,
    /// Venue for the outbound leg (base → quote).
    pub venue_a: String,
    /// Venue for the return leg (quote → base).
    pub venue_b: String,
    pub base_token: String,
    pub quote_token: String,
    pub is_enabled: bool,
    pub is_auto_enabled: bool,
    pub min_expected_profit: Decimal,
    pub min_profit_to_gas_ratio: Decimal,
    /// Zero disables the loss cap.
    pub max_daily_loss: Decimal,
    pub max_trades_per_day: u32,
    pub is_for_fee_payer_refill: bool,
    pub is_for_ops_refill: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Strategy {
    /// Wallet role this strategy refills, if it is a special-purpose refill strategy.
    pub fn refill_role(&self) -> Option<WalletRole> {
        if self.is_for_fee_payer_refill {
            Some(WalletRole::FeePayer)
        } else if self.is_for_ops_refill {
            Some(WalletRole::Ops)
        } else {
            None
        }
    }

    /// Helper to build a test strategy with sensible defaults.
    #[cfg(test)]
    pub fn sample(family: ChainFamily) -> Self {
        let (base, quote) = match family {
            ChainFamily::Native => (
                "So11111111111111111111111111111111111111112".to_string(),
                "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".to_string(),
            ),
            ChainFamily::Evm => (
                "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2".to_string(),
                "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".to_string(),
            ),
        };
        let now = Utc::now();
        Strategy {
            id: Uuid::new_v4(),
            name: format!("{family}-sample"),
            family,
            network: Network::Testnet,
            chain_id: match family {
                ChainFamily::Evm => Some(11155111),
                ChainFamily::Native => None,
            },
            venue_a: "venue-a".to_string(),
            venue_b: "venue-b".to_string(),
            base_token: base,
            quote_token: quote,
            is_enabled: true,
            is_auto_enabled: true,
            min_expected_profit: Decimal::ZERO,
            min_profit_to_gas_ratio: Decimal::ZERO,
            max_daily_loss: Decimal::ZERO,
            max_trades_per_day: 10,
            is_for_fee_payer_refill: false,
            is_for_ops_refill: false,
            created_at: now,
            updated_at: now,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{}] {} ({} → {})",
            self.family, self.network, self.name, self.venue_a, self.venue_b
        )
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Run lifecycle. Approval is a flag on a `Simulated` run, not a state.
///
/// `Simulated → Executing → Executed | Failed`. `Executing` is the claim
/// taken by one execution pass so overlapping cycles never execute the same
/// run twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Simulated,
    Executing,
    Executed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Simulated => "SIMULATED",
            RunStatus::Executing => "EXECUTING",
            RunStatus::Executed => "EXECUTED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Executed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SIMULATED" => Ok(RunStatus::Simulated),
            "EXECUTING" => Ok(RunStatus::Executing),
            "EXECUTED" => Ok(RunStatus::Executed),
            "FAILED" => Ok(RunStatus::Failed),
            _ => Err(anyhow::anyhow!("Unknown run status: {s}")),
        }
    }
}

/// Where a run's quotes came from. Synthetic runs must stay distinguishable
/// from live ones in every downstream view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteSource {
    Live,
    Synthetic,
}

impl QuoteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteSource::Live => "live",
            QuoteSource::Synthetic => "synthetic",
        }
    }
}

impl std::str::FromStr for QuoteSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(QuoteSource::Live),
            "synthetic" => Ok(QuoteSource::Synthetic),
            _ => Err(anyhow::anyhow!("Unknown quote source: {s}")),
        }
    }
}

/// One evaluation attempt of a strategy at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: RunId,
    pub strategy_id: StrategyId,
    pub family: ChainFamily,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub estimated_profit: Decimal,
    pub estimated_gas_cost: Decimal,
    pub realized_profit: Option<Decimal>,
    pub approved_for_auto_execution: bool,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub quote_source: QuoteSource,
    /// Most recent decision rejection, kept for operator visibility.
    pub last_rejection: Option<Rejection>,
    pub tx_reference: Option<String>,
}

impl Run {
    /// A freshly simulated, unapproved run.
    pub fn simulated(
        strategy: &Strategy,
        estimated_profit: Decimal,
        estimated_gas_cost: Decimal,
        quote_source: QuoteSource,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy_id: strategy.id,
            family: strategy.family,
            started_at: Utc::now(),
            finished_at: None,
            estimated_profit,
            estimated_gas_cost,
            realized_profit: None,
            approved_for_auto_execution: false,
            status: RunStatus::Simulated,
            error_message: None,
            quote_source,
            last_rejection: None,
            tx_reference: None,
        }
    }

    /// A terminal run recording why a strategy could not be simulated.
    /// Never a decision candidate.
    pub fn errored(strategy: &Strategy, quote_source: QuoteSource, message: impl Into<String>) -> Self {
        let mut run = Self::simulated(strategy, Decimal::ZERO, Decimal::ZERO, quote_source);
        run.error_message = Some(message.into());
        run.finished_at = Some(run.started_at);
        run
    }

    pub fn is_profitable(&self) -> bool {
        self.error_message.is_none() && self.estimated_profit > Decimal::ZERO
    }

    /// Whether the decision engine should still look at this run.
    pub fn awaits_decision(&self) -> bool {
        self.status == RunStatus::Simulated
            && !self.approved_for_auto_execution
            && self.error_message.is_none()
    }

    pub fn awaits_execution(&self) -> bool {
        self.status == RunStatus::Simulated && self.approved_for_auto_execution
    }
}

impl fmt::Display for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Run {} [{}] {} est={} gas={} ({})",
            self.id,
            self.family,
            self.status,
            self.estimated_profit,
            self.estimated_gas_cost,
            self.quote_source.as_str(),
        )
    }
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

/// Closed set of reasons a run (or a whole decision pass) is not approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    AutomationDisabled,
    SafeModeActive,
    StrategyMissing,
    StrategyAutoDisabled,
    ProfitBelowThreshold,
    ProfitToGasBelowThreshold,
    SyntheticQuoteOnMainnet,
    NoPendingRefillRequest,
    StrategyTradeLimit,
    StrategyLossLimit,
    GlobalTradeLimit,
    GlobalLossLimit,
}

impl RejectionKind {
    /// Risk-window rejections, as opposed to policy rejections.
    pub fn is_risk_limit(&self) -> bool {
        matches!(
            self,
            RejectionKind::StrategyTradeLimit
                | RejectionKind::StrategyLossLimit
                | RejectionKind::GlobalTradeLimit
                | RejectionKind::GlobalLossLimit
        )
    }
}

/// A rejection kind plus the human-readable detail shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub detail: String,
}

impl Rejection {
    pub fn new(kind: RejectionKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.detail)
    }
}

// ---------------------------------------------------------------------------
// Risk windows
// ---------------------------------------------------------------------------

/// Accounting scope of a risk window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "strategyId")]
pub enum RiskScope {
    Global,
    Strategy(StrategyId),
}

impl RiskScope {
    /// Stable storage key for this scope.
    pub fn key(&self) -> String {
        match self {
            RiskScope::Global => "global".to_string(),
            RiskScope::Strategy(id) => format!("strategy:{id}"),
        }
    }
}

impl fmt::Display for RiskScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Per-day trade count and loss accumulator for one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskWindow {
    pub scope: RiskScope,
    pub day: NaiveDate,
    pub total_trades: u32,
    pub total_loss: Decimal,
}

impl RiskWindow {
    /// The window as it looks before the first trade of the day.
    pub fn empty(scope: RiskScope, day: NaiveDate) -> Self {
        Self {
            scope,
            day,
            total_trades: 0,
            total_loss: Decimal::ZERO,
        }
    }
}

/// Calendar day (UTC) used for risk accounting.
pub fn risk_day(at: DateTime<Utc>) -> NaiveDate {
    at.date_naive()
}

// ---------------------------------------------------------------------------
// Refill requests
// ---------------------------------------------------------------------------

/// A pending request to top up an operational wallet, opened by the wallet
/// check and consumed by refill strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefillRequest {
    pub id: Uuid,
    pub role: WalletRole,
    pub family: ChainFamily,
    pub wallet: String,
    pub balance: Decimal,
    pub min_balance: Decimal,
    pub requested_at: DateTime<Utc>,
    pub fulfilled_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Safety state
// ---------------------------------------------------------------------------

/// Deployment maturity, ordered from least to most exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LaunchStage {
    Development,
    Staging,
    PreLaunch,
    Live,
}

/// Singleton control-plane record gating automated execution.
///
/// Only the `SafetyGate` mutates it; every commit bumps `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyState {
    pub auto_arbitrage_enabled: bool,
    pub safe_mode_enabled: bool,
    pub safe_mode_reason: Option<String>,
    pub safe_mode_triggered_at: Option<DateTime<Utc>>,
    pub execution_locked: bool,
    pub execution_lock_reason: Option<String>,
    pub execution_locked_at: Option<DateTime<Utc>>,
    pub is_mainnet_mode: bool,
    pub launch_stage: LaunchStage,
    pub native_automation_enabled: bool,
    pub evm_automation_enabled: bool,
    pub wallet_check_enabled: bool,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

impl SafetyState {
    /// State of a fresh install: automation off, execution locked, testnet.
    pub fn initial() -> Self {
        let now = Utc::now();
        Self {
            auto_arbitrage_enabled: false,
            safe_mode_enabled: false,
            safe_mode_reason: None,
            safe_mode_triggered_at: None,
            execution_locked: true,
            execution_lock_reason: Some("initial lock".to_string()),
            execution_locked_at: Some(now),
            is_mainnet_mode: false,
            launch_stage: LaunchStage::Development,
            native_automation_enabled: true,
            evm_automation_enabled: true,
            wallet_check_enabled: true,
            version: 0,
            updated_at: now,
            updated_by: "system".to_string(),
        }
    }

    pub fn family_enabled(&self, family: ChainFamily) -> bool {
        match family {
            ChainFamily::Native => self.native_automation_enabled,
            ChainFamily::Evm => self.evm_automation_enabled,
        }
    }

    /// Whether the execution stage may act right now.
    pub fn execution_blocked(&self) -> Option<&'static str> {
        if self.safe_mode_enabled {
            Some("safe mode")
        } else if self.execution_locked {
            Some("execution locked")
        } else {
            None
        }
    }
}

impl fmt::Display for SafetyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "v{} auto={} safe_mode={} locked={} mainnet={} stage={:?}",
            self.version,
            self.auto_arbitrage_enabled,
            self.safe_mode_enabled,
            self.execution_locked,
            self.is_mainnet_mode,
            self.launch_stage,
        )
    }
}

/// One field changed by a safety transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: serde_json::Value,
    pub new: serde_json::Value,
}

/// Audit record written alongside every committed safety transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyAuditEntry {
    pub id: Uuid,
    /// Version the transition produced.
    pub version: u64,
    pub actor: String,
    pub action: String,
    pub changes: Vec<FieldChange>,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Cycle log
// ---------------------------------------------------------------------------

/// Overall status of one orchestrator cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleStatus {
    Running,
    Success,
    Partial,
    Skipped,
    Failed,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Running => "RUNNING",
            CycleStatus::Success => "SUCCESS",
            CycleStatus::Partial => "PARTIAL",
            CycleStatus::Skipped => "SKIPPED",
            CycleStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CycleStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(CycleStatus::Running),
            "SUCCESS" => Ok(CycleStatus::Success),
            "PARTIAL" => Ok(CycleStatus::Partial),
            "SKIPPED" => Ok(CycleStatus::Skipped),
            "FAILED" => Ok(CycleStatus::Failed),
            _ => Err(anyhow::anyhow!("Unknown cycle status: {s}")),
        }
    }
}

/// Tagged result of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum StageOutcome {
    Success { payload: serde_json::Value },
    Failure { error: String },
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    pub stage: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: StageOutcome,
}

/// One record per orchestrator invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleLog {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub overall_status: CycleStatus,
    pub stages: Vec<StageRecord>,
}

impl CycleLog {
    pub fn start() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            overall_status: CycleStatus::Running,
            stages: Vec::new(),
        }
    }

    /// Status implied by the recorded stages: all succeeded, none did, or a mix.
    pub fn resolve_status(&self) -> CycleStatus {
        let succeeded = self.stages.iter().filter(|s| s.outcome.is_success()).count();
        if self.stages.is_empty() || succeeded == 0 {
            CycleStatus::Failed
        } else if succeeded == self.stages.len() {
            CycleStatus::Success
        } else {
            CycleStatus::Partial
        }
    }

    pub fn finish(&mut self, status: CycleStatus) {
        self.overall_status = status;
        self.finished_at = Some(Utc::now());
    }

    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.stage == name)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that escape a pipeline stage. Business-rule rejections are never
/// represented here; they are data.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Strategy not found: {0}")]
    StrategyNotFound(StrategyId),

    #[error("Safety gate error: {0}")]
    Safety(String),

    #[error("Wallet check error: {0}")]
    Wallet(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
