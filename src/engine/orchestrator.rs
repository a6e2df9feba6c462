//! Cycle orchestrator.
//!
//! One cycle is an ordered list of stages driven by a single loop:
//!
//! ```text
//! scan_native ┐
//!             ├─► decide ─► execute ─► wallet_check
//! scan_evm    ┘
//! ```
//!
//! Scanners run concurrently and join before `decide`. Every stage is
//! isolated: an error or a panic is caught here, recorded as that stage's
//! failure, and the next stage still runs. Nothing is retried within a
//! cycle. The cycle log is persisted after every stage on a best-effort
//! basis.

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::decision::{DecisionEngine, DecisionReport};
use super::executor::{ExecutionEngine, ExecutionReport};
use super::scanner::{ScanOptions, ScanReport, Scanner};
use super::wallet::{WalletCheck, WalletReport};
use crate::safety::SafetyGate;
use crate::storage::RecordStore;
use crate::types::{CycleLog, CycleStatus, StageOutcome, StageRecord};

pub const STAGE_DECIDE: &str = "decide";
pub const STAGE_EXECUTE: &str = "execute";
pub const STAGE_WALLET_CHECK: &str = "wallet_check";
pub const STAGE_SAFETY_CHECK: &str = "safety_check";

pub const SKIPPED_SAFE_MODE: &str = "skipped: safe mode";
pub const SKIPPED_FAMILY_DISABLED: &str = "skipped: family automation disabled";

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Totals across the stages of one cycle.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub simulations: usize,
    pub profitable: usize,
    pub approved: usize,
    pub rejected: usize,
    pub executed: usize,
    pub failed: usize,
    pub skipped_executions: usize,
    pub safe_mode_triggered: bool,
    pub refill_requests_opened: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub status: CycleStatus,
    pub step_results: Vec<StageRecord>,
    pub summary: CycleSummary,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    store: Arc<dyn RecordStore>,
    gate: Arc<SafetyGate>,
    scanners: Vec<Arc<Scanner>>,
    decision: Arc<DecisionEngine>,
    execution: Arc<ExecutionEngine>,
    wallets: Arc<WalletCheck>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        gate: Arc<SafetyGate>,
        scanners: Vec<Arc<Scanner>>,
        decision: Arc<DecisionEngine>,
        execution: Arc<ExecutionEngine>,
        wallets: Arc<WalletCheck>,
    ) -> Self {
        Self {
            store,
            gate,
            scanners,
            decision,
            execution,
            wallets,
        }
    }

    /// Run one full cycle. Never fails; the outcome is in the report.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut log = CycleLog::start();
        let mut summary = CycleSummary::default();
        info!(cycle_id = %log.id, "Cycle started");
        self.persist(&log).await;

        // Fail closed if the gate cannot be read.
        match self.gate.read_state().await {
            Ok(state) if !state.auto_arbitrage_enabled => {
                info!(cycle_id = %log.id, "Auto-arbitrage disabled, cycle skipped");
                return self.finish(log, CycleStatus::Skipped, summary).await;
            }
            Ok(_) => {}
            Err(e) => {
                let now = Utc::now();
                log.stages.push(StageRecord {
                    stage: STAGE_SAFETY_CHECK.to_string(),
                    started_at: now,
                    finished_at: now,
                    outcome: StageOutcome::Failure { error: e.to_string() },
                });
                return self.finish(log, CycleStatus::Failed, summary).await;
            }
        }

        // -- scan ---------------------------------------------------------
        let scans = join_all(self.scanners.iter().map(|scanner| self.scan_stage(scanner))).await;
        for (record, report) in scans {
            if let Some(report) = report {
                summary.simulations += report.simulations.len();
                summary.profitable += report.profitable_count;
            }
            log.stages.push(record);
        }
        self.persist(&log).await;

        // -- decide -------------------------------------------------------
        let (record, decision) = run_stage(STAGE_DECIDE, self.decision.evaluate(), decision_payload).await;
        if let Some(report) = decision {
            summary.approved = report.approved_count();
            summary.rejected = report.rejections.len();
        }
        log.stages.push(record);
        self.persist(&log).await;

        // -- execute ------------------------------------------------------
        let record = match self.gate.read_state().await {
            Ok(state) if state.safe_mode_enabled => {
                info!(cycle_id = %log.id, "Safe mode active, execution skipped");
                skipped_stage(STAGE_EXECUTE, SKIPPED_SAFE_MODE)
            }
            Ok(_) => {
                let (record, execution) =
                    run_stage(STAGE_EXECUTE, self.execution.execute_approved(), to_payload::<ExecutionReport>)
                        .await;
                if let Some(report) = execution {
                    summary.executed = report.executed_count;
                    summary.failed = report.failed_count;
                    summary.skipped_executions = report.skipped_count + report.stale_count;
                    summary.safe_mode_triggered = report.safe_mode_triggered;
                }
                record
            }
            Err(e) => failed_stage(STAGE_EXECUTE, e),
        };
        log.stages.push(record);
        self.persist(&log).await;

        // -- wallet check -------------------------------------------------
        let (record, wallets) =
            run_stage(STAGE_WALLET_CHECK, self.wallets.reconcile(), to_payload::<WalletReport>).await;
        if let Some(report) = wallets {
            summary.refill_requests_opened = report.refill_requests_opened;
        }
        log.stages.push(record);

        let status = log.resolve_status();
        self.finish(log, status, summary).await
    }

    async fn scan_stage(&self, scanner: &Scanner) -> (StageRecord, Option<ScanReport>) {
        let stage = format!("scan_{}", scanner.family());
        match self.gate.read_state().await {
            Ok(state) if !state.family_enabled(scanner.family()) => {
                info!(family = %scanner.family(), "Family automation disabled, scan skipped");
                (skipped_stage(&stage, SKIPPED_FAMILY_DISABLED), None)
            }
            Ok(_) => run_stage(&stage, scanner.scan_stored(ScanOptions::default()), scan_payload).await,
            Err(e) => (failed_stage(&stage, e), None),
        }
    }

    async fn finish(&self, mut log: CycleLog, status: CycleStatus, summary: CycleSummary) -> CycleReport {
        log.finish(status);
        self.persist(&log).await;
        info!(
            cycle_id = %log.id,
            status = %status,
            stages = log.stages.len(),
            approved = summary.approved,
            executed = summary.executed,
            failed = summary.failed,
            "Cycle finished"
        );
        CycleReport {
            cycle_id: log.id,
            status,
            step_results: log.stages,
            summary,
        }
    }

    async fn persist(&self, log: &CycleLog) {
        if let Err(e) = self.store.save_cycle_log(log).await {
            warn!(cycle_id = %log.id, error = %e, "Failed to persist cycle log");
        }
    }
}

// ---------------------------------------------------------------------------
// Stage helpers
// ---------------------------------------------------------------------------

/// Run one stage, converting errors and panics into a failure record.
async fn run_stage<T, E, F>(name: &str, stage: F, payload: fn(&T) -> Value) -> (StageRecord, Option<T>)
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    let started_at = Utc::now();
    let (outcome, value) = match AssertUnwindSafe(stage).catch_unwind().await {
        Ok(Ok(value)) => (StageOutcome::Success { payload: payload(&value) }, Some(value)),
        Ok(Err(e)) => {
            error!(stage = name, error = %e, "Stage failed");
            (StageOutcome::Failure { error: e.to_string() }, None)
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(stage = name, panic = %message, "Stage panicked");
            (
                StageOutcome::Failure {
                    error: format!("stage panicked: {message}"),
                },
                None,
            )
        }
    };
    let record = StageRecord {
        stage: name.to_string(),
        started_at,
        finished_at: Utc::now(),
        outcome,
    };
    (record, value)
}

fn skipped_stage(name: &str, reason: &str) -> StageRecord {
    let now = Utc::now();
    StageRecord {
        stage: name.to_string(),
        started_at: now,
        finished_at: now,
        outcome: StageOutcome::Success {
            payload: Value::String(reason.to_string()),
        },
    }
}

fn failed_stage(name: &str, error: impl Display) -> StageRecord {
    let now = Utc::now();
    StageRecord {
        stage: name.to_string(),
        started_at: now,
        finished_at: now,
        outcome: StageOutcome::Failure {
            error: error.to_string(),
        },
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn to_payload<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| json!({ "serializationError": e.to_string() }))
}

/// Scan payloads carry counts and run ids rather than full runs.
fn scan_payload(report: &ScanReport) -> Value {
    json!({
        "family": report.family,
        "simulations": report.simulations.len(),
        "profitableCount": report.profitable_count,
        "runIds": report.simulations.iter().map(|r| r.id).collect::<Vec<_>>(),
    })
}

fn decision_payload(report: &DecisionReport) -> Value {
    json!({
        "approvedCount": report.approved_count(),
        "approvedRunIds": report.approved_ids,
        "rejectionReasons": report.rejections,
        "message": report.halted.as_ref().map(|h| h.detail.clone()),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::executor::{
        ExecutionContext, ExecutionReceipt, ExecutorFailure, MockTradeExecutor, TradeExecutor,
    };
    use crate::engine::scanner::ScannerSettings;
    use crate::engine::wallet::StaticBalances;
    use crate::quotes::{FixedRateGasOracle, SyntheticQuotes};
    use crate::safety::{CriticalAction, SafetyUpdate, PHRASE_UNLOCK_EXECUTION};
    use crate::storage::MemoryStore;
    use crate::strategy::{ChainSupport, RiskLedger, RiskLimits};
    use crate::types::{ChainFamily, Run, Strategy};
    use chrono::Duration;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    // ---- helpers -----------------------------------------------------------

    struct Fixture {
        store: Arc<MemoryStore>,
        gate: Arc<SafetyGate>,
        orchestrator: Orchestrator,
    }

    fn build(store: Arc<MemoryStore>, executor: impl TradeExecutor + 'static) -> Fixture {
        let gate = Arc::new(SafetyGate::new(store.clone()));
        let ledger = Arc::new(RiskLedger::new(
            store.clone(),
            RiskLimits {
                global_max_trades_per_day: 100,
                global_max_daily_loss: Decimal::ZERO,
            },
        ));
        let gas = Arc::new(FixedRateGasOracle {
            native_fee_per_leg: Decimal::ZERO,
            evm_fee_per_leg: Decimal::ZERO,
            gas_token_price: Decimal::ONE,
        });
        let scanners = ChainFamily::ALL
            .iter()
            .map(|family| {
                Arc::new(Scanner::new(
                    *family,
                    ScannerSettings {
                        notional: dec!(100),
                        support: ChainSupport::any_network(),
                    },
                    store.clone(),
                    Arc::new(SyntheticQuotes::new(0)),
                    gas.clone(),
                ))
            })
            .collect();
        let decision = Arc::new(DecisionEngine::new(
            store.clone(),
            gate.clone(),
            ledger.clone(),
            Duration::minutes(10),
        ));
        let execution = Arc::new(ExecutionEngine::new(
            store.clone(),
            gate.clone(),
            ledger,
            Arc::new(executor),
            3,
            Duration::minutes(10),
        ));
        let wallets = Arc::new(WalletCheck::new(
            store.clone(),
            gate.clone(),
            Arc::new(StaticBalances::new(HashMap::new())),
            Vec::new(),
        ));
        let orchestrator = Orchestrator::new(store.clone(), gate.clone(), scanners, decision, execution, wallets);
        Fixture {
            store,
            gate,
            orchestrator,
        }
    }

    struct PanickingExecutor;

    #[async_trait::async_trait]
    impl TradeExecutor for PanickingExecutor {
        async fn execute(
            &self,
            _run: &Run,
            _strategy: &Strategy,
            _context: ExecutionContext,
        ) -> Result<ExecutionReceipt, ExecutorFailure> {
            panic!("executor exploded")
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    fn ok_executor() -> MockTradeExecutor {
        let mut executor = MockTradeExecutor::new();
        executor.expect_name().return_const("mock".to_string());
        executor.expect_execute().returning(|run, _, _| {
            Ok(ExecutionReceipt {
                realized_profit: run.estimated_profit,
                tx_reference: None,
            })
        });
        executor
    }

    async fn enable(gate: &SafetyGate) {
        gate.propose_transition(
            &SafetyUpdate {
                auto_arbitrage_enabled: Some(true),
                ..Default::default()
            },
            "test",
            None,
            None,
        )
        .await
        .unwrap();
        gate.propose_transition(
            &SafetyUpdate {
                execution_locked: Some(false),
                ..Default::default()
            },
            "test",
            Some(CriticalAction::UnlockExecution),
            Some(PHRASE_UNLOCK_EXECUTION),
        )
        .await
        .unwrap();
    }

    // ---- tests -------------------------------------------------------------

    #[tokio::test]
    async fn test_disabled_automation_skips_cycle() {
        let fx = build(Arc::new(MemoryStore::new()), MockTradeExecutor::new());
        let report = fx.orchestrator.run_cycle().await;
        assert_eq!(report.status, CycleStatus::Skipped);
        assert!(report.step_results.is_empty());

        let logs = fx.store.recent_cycle_logs(5).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].overall_status, CycleStatus::Skipped);
        assert!(logs[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn test_full_cycle_success() {
        let fx = build(Arc::new(MemoryStore::new()), ok_executor());
        enable(&fx.gate).await;
        fx.store.upsert_strategy(&Strategy::sample(ChainFamily::Evm)).await.unwrap();

        let report = fx.orchestrator.run_cycle().await;
        assert_eq!(report.status, CycleStatus::Success);
        let names: Vec<&str> = report.step_results.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(names, vec!["scan_native", "scan_evm", "decide", "execute", "wallet_check"]);
        // Zero spread and zero gas: profit 0 meets the zero thresholds.
        assert_eq!(report.summary.simulations, 1);
        assert_eq!(report.summary.approved, 1);
        assert_eq!(report.summary.executed, 1);
    }

    #[tokio::test]
    async fn test_safe_mode_skips_execute_but_still_scans() {
        let mut executor = MockTradeExecutor::new();
        executor.expect_name().return_const("mock".to_string());
        executor.expect_execute().never();
        let fx = build(Arc::new(MemoryStore::new()), executor);
        enable(&fx.gate).await;
        fx.gate.trip_safe_mode("test", "test").await.unwrap();
        fx.store.upsert_strategy(&Strategy::sample(ChainFamily::Native)).await.unwrap();

        let report = fx.orchestrator.run_cycle().await;
        assert_eq!(report.status, CycleStatus::Success);
        assert_eq!(report.summary.simulations, 1);
        assert_eq!(report.summary.executed, 0);
        let execute = report.step_results.iter().find(|s| s.stage == STAGE_EXECUTE).unwrap();
        assert_eq!(
            execute.outcome,
            StageOutcome::Success {
                payload: Value::String(SKIPPED_SAFE_MODE.into())
            }
        );
    }

    #[tokio::test]
    async fn test_family_toggle_skips_scanner() {
        let fx = build(Arc::new(MemoryStore::new()), ok_executor());
        enable(&fx.gate).await;
        fx.gate
            .propose_transition(
                &SafetyUpdate {
                    evm_automation_enabled: Some(false),
                    ..Default::default()
                },
                "test",
                None,
                None,
            )
            .await
            .unwrap();
        fx.store.upsert_strategy(&Strategy::sample(ChainFamily::Evm)).await.unwrap();

        let report = fx.orchestrator.run_cycle().await;
        let scan = report.step_results.iter().find(|s| s.stage == "scan_evm").unwrap();
        assert_eq!(
            scan.outcome,
            StageOutcome::Success {
                payload: Value::String(SKIPPED_FAMILY_DISABLED.into())
            }
        );
        assert_eq!(report.summary.simulations, 0);
    }

    #[tokio::test]
    async fn test_panicking_executor_yields_partial() {
        let fx = build(Arc::new(MemoryStore::new()), PanickingExecutor);
        enable(&fx.gate).await;
        fx.store.upsert_strategy(&Strategy::sample(ChainFamily::Evm)).await.unwrap();

        let report = fx.orchestrator.run_cycle().await;
        assert_eq!(report.status, CycleStatus::Partial);
        let execute = report.step_results.iter().find(|s| s.stage == STAGE_EXECUTE).unwrap();
        match &execute.outcome {
            StageOutcome::Failure { error } => assert!(error.contains("executor exploded")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(report.step_results.iter().any(|s| s.stage == STAGE_WALLET_CHECK));
    }

    #[tokio::test]
    async fn test_store_outage_fails_cycle_closed() {
        let store = Arc::new(MemoryStore::new());
        let fx = build(store.clone(), MockTradeExecutor::new());
        enable(&fx.gate).await;
        store.set_unavailable(true);

        let report = fx.orchestrator.run_cycle().await;
        assert_eq!(report.status, CycleStatus::Failed);
        assert_eq!(report.step_results[0].stage, STAGE_SAFETY_CHECK);
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(boxed.as_ref()), "static message");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(boxed.as_ref()), "owned message");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
