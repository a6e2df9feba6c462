//! Decision engine.
//!
//! Turns fresh SIMULATED runs into approvals. A pass first consults the
//! safety gate and stops without looking at a single run when automation
//! is off or safe mode is on. Otherwise every candidate (oldest first)
//! goes through the checks below, stopping at the first failure:
//!
//! 1. strategy exists, is enabled and auto-enabled
//! 2. estimated profit ≥ `min_expected_profit`
//! 3. profit / max(gas, 1) ≥ `min_profit_to_gas_ratio`
//! 4. synthetic quotes never approved for a mainnet strategy
//! 5. refill strategies need a pending refill request for their role/family
//! 6. strategy risk window for today
//! 7. global risk window for today
//!
//! Cheap local checks come first; risk windows are only read for runs that
//! survive them. Survivors are approved in one conditional batch.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::safety::SafetyGate;
use crate::storage::RecordStore;
use crate::strategy::{BudgetPass, RiskLedger};
use crate::types::{
    risk_day, Network, PipelineError, QuoteSource, Rejection, RejectionKind, Run, RunId, Strategy,
    StrategyId,
};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionReport {
    pub approved_ids: Vec<RunId>,
    pub rejections: BTreeMap<RunId, Rejection>,
    /// Pipeline-level reason the pass stopped before inspecting runs.
    pub halted: Option<Rejection>,
}

impl DecisionReport {
    pub fn approved_count(&self) -> usize {
        self.approved_ids.len()
    }

    fn halted(kind: RejectionKind, detail: impl Into<String>) -> Self {
        Self {
            halted: Some(Rejection::new(kind, detail)),
            ..Default::default()
        }
    }
}

pub struct DecisionEngine {
    store: Arc<dyn RecordStore>,
    gate: Arc<SafetyGate>,
    ledger: Arc<RiskLedger>,
    decision_window: Duration,
}

impl DecisionEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        gate: Arc<SafetyGate>,
        ledger: Arc<RiskLedger>,
        decision_window: Duration,
    ) -> Self {
        Self {
            store,
            gate,
            ledger,
            decision_window,
        }
    }

    pub async fn evaluate(&self) -> Result<DecisionReport, PipelineError> {
        let state = self.gate.read_state().await?;
        if !state.auto_arbitrage_enabled {
            info!("Decision pass halted: auto-arbitrage disabled");
            return Ok(DecisionReport::halted(
                RejectionKind::AutomationDisabled,
                "auto-arbitrage is disabled",
            ));
        }
        if state.safe_mode_enabled {
            let reason = state.safe_mode_reason.as_deref().unwrap_or("unspecified");
            info!(reason, "Decision pass halted: safe mode");
            return Ok(DecisionReport::halted(
                RejectionKind::SafeModeActive,
                format!("safe mode is active: {reason}"),
            ));
        }

        let now = Utc::now();
        let candidates = self.store.runs_awaiting_decision(now - self.decision_window).await?;
        let mut pass = self.ledger.begin_pass(risk_day(now), now - self.decision_window).await?;
        let mut strategies: HashMap<StrategyId, Option<Strategy>> = HashMap::new();

        let mut approve = Vec::new();
        let mut rejected: Vec<(RunId, Rejection)> = Vec::new();

        for run in &candidates {
            if !strategies.contains_key(&run.strategy_id) {
                let strategy = self.store.get_strategy(run.strategy_id).await?;
                strategies.insert(run.strategy_id, strategy);
            }
            let strategy = strategies.get(&run.strategy_id).and_then(|s| s.as_ref());

            match self.check(run, strategy, &pass).await? {
                None => {
                    pass.reserve(run.strategy_id);
                    approve.push(run.id);
                }
                Some(rejection) => {
                    debug!(run_id = %run.id, kind = ?rejection.kind, detail = %rejection.detail, "Run rejected");
                    rejected.push((run.id, rejection));
                }
            }
        }

        if !rejected.is_empty() {
            self.store.record_rejections(&rejected).await?;
        }
        let approved_ids = if approve.is_empty() {
            Vec::new()
        } else {
            self.store.approve_runs(&approve).await?
        };
        if approved_ids.len() < approve.len() {
            warn!(
                requested = approve.len(),
                approved = approved_ids.len(),
                "Some runs were decided by a concurrent pass"
            );
        }

        info!(
            candidates = candidates.len(),
            approved = approved_ids.len(),
            rejected = rejected.len(),
            "Decision pass complete"
        );

        Ok(DecisionReport {
            approved_ids,
            rejections: rejected.into_iter().collect(),
            halted: None,
        })
    }

    /// First failing check for `run`, or `None` when it may be approved.
    async fn check(
        &self,
        run: &Run,
        strategy: Option<&Strategy>,
        pass: &BudgetPass<'_>,
    ) -> Result<Option<Rejection>, PipelineError> {
        let Some(strategy) = strategy else {
            return Ok(Some(Rejection::new(
                RejectionKind::StrategyMissing,
                format!("strategy {} not found", run.strategy_id),
            )));
        };

        if !strategy.is_enabled || !strategy.is_auto_enabled {
            return Ok(Some(Rejection::new(
                RejectionKind::StrategyAutoDisabled,
                format!("strategy {} is not enabled for auto-execution", strategy.name),
            )));
        }

        if run.estimated_profit < strategy.min_expected_profit {
            return Ok(Some(Rejection::new(
                RejectionKind::ProfitBelowThreshold,
                format!(
                    "estimated profit {} below threshold {}",
                    run.estimated_profit, strategy.min_expected_profit
                ),
            )));
        }

        let ratio = run.estimated_profit / run.estimated_gas_cost.max(Decimal::ONE);
        if ratio < strategy.min_profit_to_gas_ratio {
            return Ok(Some(Rejection::new(
                RejectionKind::ProfitToGasBelowThreshold,
                format!(
                    "profit-to-gas ratio {} below threshold {}",
                    ratio.round_dp(4),
                    strategy.min_profit_to_gas_ratio
                ),
            )));
        }

        if run.quote_source == QuoteSource::Synthetic && strategy.network == Network::Mainnet {
            return Ok(Some(Rejection::new(
                RejectionKind::SyntheticQuoteOnMainnet,
                "synthetic quotes are never executed on mainnet",
            )));
        }

        if let Some(role) = strategy.refill_role() {
            if !self.store.has_pending_refill(role, strategy.family).await? {
                return Ok(Some(Rejection::new(
                    RejectionKind::NoPendingRefillRequest,
                    format!("no pending {role} refill request for {}", strategy.family),
                )));
            }
        }

        if let Some(rejection) = pass.check_strategy(strategy).await? {
            return Ok(Some(rejection));
        }
        pass.check_global().await.map_err(PipelineError::from)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
