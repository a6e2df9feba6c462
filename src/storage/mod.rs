//! Persistence layer.
//!
//! Defines the `RecordStore` trait every pipeline stage reads and writes
//! through, and provides two implementations:
//! - `MemoryStore`: in-process, used by tests and dry runs
//! - `SqliteStore`: SQLite via `sqlx`, used by the binary
//!
//! Every run transition and every risk-window increment is a conditional
//! update inside the store so that overlapping cycles can neither
//! double-approve, double-execute nor double-count a run.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::types::{
    ChainFamily, CycleLog, RefillRequest, Rejection, RiskScope, RiskWindow, Run, RunId,
    RunStatus, SafetyAuditEntry, SafetyState, Strategy, StrategyId, WalletRole,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Infrastructure failures of the record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Safety state version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },

    #[error("Corrupt {table} record: {message}")]
    Corrupt { table: &'static str, message: String },
}

// ---------------------------------------------------------------------------
// Run completion
// ---------------------------------------------------------------------------

/// Terminal outcome of an executed run, applied together with the
/// strategy and global risk-window increments in one atomic step.
#[derive(Debug, Clone, PartialEq)]
pub struct RunCompletion {
    pub run_id: RunId,
    pub strategy_id: StrategyId,
    /// `Executed` or `Failed`.
    pub status: RunStatus,
    pub realized_profit: Option<Decimal>,
    pub error_message: Option<String>,
    pub tx_reference: Option<String>,
    /// Loss charged to the risk windows. Zero for non-losing trades.
    pub loss: Decimal,
    pub day: NaiveDate,
    pub finished_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Transactional record store behind the pipeline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    // -- Strategies -------------------------------------------------------

    async fn upsert_strategy(&self, strategy: &Strategy) -> Result<(), StoreError>;

    async fn get_strategy(&self, id: StrategyId) -> Result<Option<Strategy>, StoreError>;

    async fn list_strategies(&self) -> Result<Vec<Strategy>, StoreError>;

    // -- Runs -------------------------------------------------------------

    async fn insert_run(&self, run: &Run) -> Result<(), StoreError>;

    async fn get_run(&self, id: RunId) -> Result<Option<Run>, StoreError>;

    /// Most recent runs first.
    async fn recent_runs(&self, limit: usize) -> Result<Vec<Run>, StoreError>;

    /// SIMULATED, unapproved, error-free runs started at or after `since`,
    /// oldest first.
    async fn runs_awaiting_decision(&self, since: DateTime<Utc>) -> Result<Vec<Run>, StoreError>;

    /// SIMULATED runs with the approval flag set, oldest first.
    async fn runs_awaiting_execution(&self) -> Result<Vec<Run>, StoreError>;

    /// EXECUTING runs, oldest first. Their trades are not in any risk
    /// window until `complete_run`.
    async fn runs_in_flight(&self) -> Result<Vec<Run>, StoreError>;

    /// Attach the latest rejection to each run. Runs stay SIMULATED.
    async fn record_rejections(&self, rejections: &[(RunId, Rejection)]) -> Result<(), StoreError>;

    /// Set the approval flag on every listed run that is still SIMULATED and
    /// unapproved. Returns the ids actually flipped.
    async fn approve_runs(&self, ids: &[RunId]) -> Result<Vec<RunId>, StoreError>;

    /// Move an approved SIMULATED run to EXECUTING. `false` if another pass
    /// already claimed it.
    async fn claim_run(&self, id: RunId) -> Result<bool, StoreError>;

    /// Move an EXECUTING run to its terminal status and add the trade to the
    /// strategy and global risk windows. `false` (and no accounting) if the
    /// run was not EXECUTING.
    async fn complete_run(&self, completion: &RunCompletion) -> Result<bool, StoreError>;

    // -- Risk windows -----------------------------------------------------

    /// The window for `scope` on `day`; empty if no trade was recorded yet.
    async fn risk_window(&self, scope: RiskScope, day: NaiveDate) -> Result<RiskWindow, StoreError>;

    // -- Safety state -----------------------------------------------------

    async fn load_safety_state(&self) -> Result<Option<SafetyState>, StoreError>;

    /// Persist `state` and its audit entry iff the stored version equals
    /// `expected_version` (0 when nothing is stored yet).
    async fn commit_safety_state(
        &self,
        expected_version: u64,
        state: &SafetyState,
        audit: &SafetyAuditEntry,
    ) -> Result<(), StoreError>;

    /// Most recent audit entries first.
    async fn safety_audit(&self, limit: usize) -> Result<Vec<SafetyAuditEntry>, StoreError>;

    // -- Refill requests --------------------------------------------------

    async fn has_pending_refill(&self, role: WalletRole, family: ChainFamily) -> Result<bool, StoreError>;

    /// Open `request` unless one is already pending for its role and family.
    async fn open_refill_request(&self, request: &RefillRequest) -> Result<bool, StoreError>;

    /// Mark every pending request for role and family fulfilled.
    async fn fulfil_refill_requests(
        &self,
        role: WalletRole,
        family: ChainFamily,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Refill requests, newest first.
    async fn refill_requests(&self, pending_only: bool) -> Result<Vec<RefillRequest>, StoreError>;

    // -- Cycle logs -------------------------------------------------------

    /// Insert or overwrite the log with the same id.
    async fn save_cycle_log(&self, log: &CycleLog) -> Result<(), StoreError>;

    /// Most recent cycles first.
    async fn recent_cycle_logs(&self, limit: usize) -> Result<Vec<CycleLog>, StoreError>;
}
