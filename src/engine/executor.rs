//! Trade execution.
//!
//! `ExecutionEngine` walks approved runs oldest first. Before each run it
//! re-reads the safety gate, then claims the run (SIMULATED → EXECUTING)
//! so no concurrent cycle can execute it too, calls the `TradeExecutor`,
//! and settles the outcome together with the risk-window increments.
//!
//! Approved runs whose quote is older than the decision window are left
//! alone and reported as stale.
//!
//! A strategy that fails `failure_limit` times in a row within one call
//! trips safe mode. That is the only unattended escalation in the pipeline.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::safety::SafetyGate;
use crate::storage::{RecordStore, RunCompletion};
use crate::strategy::risk::trade_loss;
use crate::strategy::RiskLedger;
use crate::types::{risk_day, Network, PipelineError, Run, RunStatus, Strategy, StrategyId};

const SAFETY_ACTOR: &str = "execution-engine";

// ---------------------------------------------------------------------------
// Executor collaborator
// ---------------------------------------------------------------------------

/// What the executor needs to know beyond the run itself.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext {
    pub mainnet: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReceipt {
    pub realized_profit: Decimal,
    pub tx_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ExecutorFailure {
    pub message: String,
    /// Loss the failed attempt actually incurred, when the executor knows it.
    pub realized_loss: Option<Decimal>,
}

impl ExecutorFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            realized_loss: None,
        }
    }
}

/// Places the two legs of an approved run.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn execute(
        &self,
        run: &Run,
        strategy: &Strategy,
        context: ExecutionContext,
    ) -> Result<ExecutionReceipt, ExecutorFailure>;

    fn name(&self) -> &str;
}

/// Logs the trade and reports the estimate as realized. Nothing is sent.
pub struct DryRunExecutor;

#[async_trait]
impl TradeExecutor for DryRunExecutor {
    async fn execute(
        &self,
        run: &Run,
        strategy: &Strategy,
        context: ExecutionContext,
    ) -> Result<ExecutionReceipt, ExecutorFailure> {
        info!(
            run_id = %run.id,
            strategy = %strategy.name,
            venue_a = %strategy.venue_a,
            venue_b = %strategy.venue_b,
            profit = %run.estimated_profit,
            mainnet = context.mainnet,
            "[DRY RUN] Would execute round trip"
        );
        Ok(ExecutionReceipt {
            realized_profit: run.estimated_profit - run.estimated_gas_cost,
            tx_reference: Some(format!("dry-run-{}", Uuid::new_v4())),
        })
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub executed_count: usize,
    pub failed_count: usize,
    /// Approved runs left for later: claim lost, strategy missing or
    /// mainnet mode off.
    pub skipped_count: usize,
    /// Approved runs quoted before the decision window. Never executed.
    pub stale_count: usize,
    pub safe_mode_triggered: bool,
    /// Why the pass stopped early, if it did.
    pub halted: Option<String>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ExecutionEngine {
    store: Arc<dyn RecordStore>,
    gate: Arc<SafetyGate>,
    ledger: Arc<RiskLedger>,
    executor: Arc<dyn TradeExecutor>,
    failure_limit: u32,
    decision_window: Duration,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        gate: Arc<SafetyGate>,
        ledger: Arc<RiskLedger>,
        executor: Arc<dyn TradeExecutor>,
        failure_limit: u32,
        decision_window: Duration,
    ) -> Self {
        Self {
            store,
            gate,
            ledger,
            executor,
            failure_limit: failure_limit.max(1),
            decision_window,
        }
    }

    pub async fn execute_approved(&self) -> Result<ExecutionReport, PipelineError> {
        let runs = self.store.runs_awaiting_execution().await?;
        let fresh_since = Utc::now() - self.decision_window;
        let mut report = ExecutionReport::default();
        let mut consecutive_failures: HashMap<StrategyId, u32> = HashMap::new();

        if !runs.is_empty() {
            info!(approved = runs.len(), executor = self.executor.name(), "Executing approved runs");
        }

        for run in runs {
            // The gate can change between approval and now.
            let state = self.gate.read_state().await?;
            if let Some(blocked) = state.execution_blocked() {
                info!(reason = blocked, "Execution halted by safety gate");
                report.halted = Some(blocked.to_string());
                break;
            }

            if run.started_at < fresh_since {
                debug!(run_id = %run.id, started_at = %run.started_at, "Approved run is stale, not executing");
                report.stale_count += 1;
                continue;
            }

            let Some(strategy) = self.store.get_strategy(run.strategy_id).await? else {
                warn!(run_id = %run.id, strategy_id = %run.strategy_id, "Approved run has no strategy, skipping");
                report.skipped_count += 1;
                continue;
            };

            let mainnet = strategy.network == Network::Mainnet;
            if mainnet && !state.is_mainnet_mode {
                info!(run_id = %run.id, strategy = %strategy.name, "Mainnet mode off, leaving run approved");
                report.skipped_count += 1;
                continue;
            }

            if !self.store.claim_run(run.id).await? {
                info!(run_id = %run.id, "Run claimed by another cycle");
                report.skipped_count += 1;
                continue;
            }

            let outcome = self.executor.execute(&run, &strategy, ExecutionContext { mainnet }).await;
            let completion = Self::completion(&run, &outcome);
            self.ledger.record_trade(&completion).await?;

            match outcome {
                Ok(receipt) => {
                    report.executed_count += 1;
                    consecutive_failures.remove(&strategy.id);
                    info!(
                        run_id = %run.id,
                        strategy = %strategy.name,
                        realized = %receipt.realized_profit,
                        tx = receipt.tx_reference.as_deref().unwrap_or("-"),
                        "Run executed"
                    );
                    if let Some(role) = strategy.refill_role() {
                        let fulfilled = self
                            .store
                            .fulfil_refill_requests(role, strategy.family, completion.finished_at)
                            .await?;
                        info!(role = %role, family = %strategy.family, fulfilled, "Refill requests fulfilled");
                    }
                }
                Err(failure) => {
                    report.failed_count += 1;
                    let streak = consecutive_failures.entry(strategy.id).or_default();
                    *streak += 1;
                    warn!(
                        run_id = %run.id,
                        strategy = %strategy.name,
                        error = %failure,
                        consecutive = *streak,
                        "Run execution failed"
                    );

                    if *streak >= self.failure_limit {
                        let reason = format!(
                            "{} consecutive execution failures for strategy {}",
                            streak, strategy.name
                        );
                        error!(strategy = %strategy.name, "Tripping safe mode: {reason}");
                        self.gate.trip_safe_mode(&reason, SAFETY_ACTOR).await?;
                        report.safe_mode_triggered = true;
                        report.halted = Some("safe mode".to_string());
                        break;
                    }
                }
            }
        }

        info!(
            executed = report.executed_count,
            failed = report.failed_count,
            skipped = report.skipped_count,
            stale = report.stale_count,
            safe_mode_triggered = report.safe_mode_triggered,
            "Execution pass complete"
        );
        Ok(report)
    }

    fn completion(run: &Run, outcome: &Result<ExecutionReceipt, ExecutorFailure>) -> RunCompletion {
        let finished_at = Utc::now();
        let (status, realized_profit, error_message, tx_reference, loss) = match outcome {
            Ok(receipt) => (
                RunStatus::Executed,
                Some(receipt.realized_profit),
                None,
                receipt.tx_reference.clone(),
                trade_loss(true, Some(receipt.realized_profit), run.estimated_gas_cost),
            ),
            Err(failure) => (
                RunStatus::Failed,
                failure.realized_loss.map(|l| -l.abs()),
                Some(failure.message.clone()),
                None,
                trade_loss(false, failure.realized_loss, run.estimated_gas_cost),
            ),
        };
        RunCompletion {
            run_id: run.id,
            strategy_id: run.strategy_id,
            status,
            realized_profit,
            error_message,
            tx_reference,
            loss,
            day: risk_day(finished_at),
            finished_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
