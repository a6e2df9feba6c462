//! Risk ledger.
//!
//! Daily trade-count and loss budgets, per strategy and globally. Windows
//! live in the record store and are only ever incremented there, as part
//! of `complete_run`; the ledger reads them to answer "is this within
//! budget" and hands completions back to the store.
//!
//! A `BudgetPass` covers one decision pass. It counts runs approved
//! earlier and still executable, runs claimed but not yet settled, and runs
//! approved during the pass against the trade limits, so neither a batch
//! nor an overlapping cycle can over-approve.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::storage::{RecordStore, RunCompletion, StoreError};
use crate::types::{Rejection, RejectionKind, RiskScope, RiskWindow, Strategy, StrategyId};

/// Global daily limits. Per-strategy limits live on the strategy.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskLimits {
    pub global_max_trades_per_day: u32,
    /// Zero disables the global loss cap.
    #[serde(default)]
    pub global_max_daily_loss: Decimal,
}

pub struct RiskLedger {
    store: Arc<dyn RecordStore>,
    limits: RiskLimits,
}

impl RiskLedger {
    pub fn new(store: Arc<dyn RecordStore>, limits: RiskLimits) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub async fn window(&self, scope: RiskScope, day: NaiveDate) -> Result<RiskWindow, StoreError> {
        self.store.risk_window(scope, day).await
    }

    /// Open a budgeting pass for `day`. Reserves a trade for every EXECUTING
    /// run and for every approved run started at or after `fresh_since`.
    /// Older approvals can no longer execute and hold no budget.
    pub async fn begin_pass(
        &self,
        day: NaiveDate,
        fresh_since: DateTime<Utc>,
    ) -> Result<BudgetPass<'_>, StoreError> {
        let mut pass = BudgetPass {
            ledger: self,
            day,
            reserved: HashMap::new(),
        };
        for run in self.store.runs_in_flight().await? {
            pass.reserve(run.strategy_id);
        }
        for run in self.store.runs_awaiting_execution().await? {
            if run.started_at >= fresh_since {
                pass.reserve(run.strategy_id);
            }
        }
        debug!(
            day = %day,
            reserved = pass.reserved_for(RiskScope::Global),
            "Risk budget pass opened"
        );
        Ok(pass)
    }

    /// Apply a terminal run outcome and its window increments atomically.
    /// `false` if the run was not in flight (already completed elsewhere).
    pub async fn record_trade(&self, completion: &RunCompletion) -> Result<bool, StoreError> {
        let applied = self.store.complete_run(completion).await?;
        if applied {
            info!(
                run_id = %completion.run_id,
                strategy_id = %completion.strategy_id,
                status = %completion.status,
                loss = %completion.loss,
                day = %completion.day,
                "Trade recorded in risk windows"
            );
        } else {
            debug!(run_id = %completion.run_id, "Run already completed, no accounting");
        }
        Ok(applied)
    }
}

/// Loss a completed trade charges to its windows.
///
/// Executed trades lose only when realized profit is negative. Failed trades
/// charge the executor-reported loss, falling back to the run's estimated
/// gas cost.
pub fn trade_loss(succeeded: bool, realized: Option<Decimal>, estimated_gas_cost: Decimal) -> Decimal {
    let loss = match (succeeded, realized) {
        (true, Some(profit)) => -profit,
        (true, None) => Decimal::ZERO,
        (false, Some(loss)) => loss.abs(),
        (false, None) => estimated_gas_cost,
    };
    loss.max(Decimal::ZERO)
}

// ---------------------------------------------------------------------------
// Budget pass
// ---------------------------------------------------------------------------

pub struct BudgetPass<'a> {
    ledger: &'a RiskLedger,
    day: NaiveDate,
    reserved: HashMap<RiskScope, u32>,
}

impl BudgetPass<'_> {
    pub fn day(&self) -> NaiveDate {
        self.day
    }

    /// Strategy window check (trade count, then loss when capped).
    pub async fn check_strategy(&self, strategy: &Strategy) -> Result<Option<Rejection>, StoreError> {
        let scope = RiskScope::Strategy(strategy.id);
        let window = self.ledger.window(scope, self.day).await?;
        Ok(check_window(
            &window,
            self.reserved_for(scope),
            strategy.max_trades_per_day,
            strategy.max_daily_loss,
            (RejectionKind::StrategyTradeLimit, RejectionKind::StrategyLossLimit),
            "strategy",
        ))
    }

    /// Global window check against the configured limits.
    pub async fn check_global(&self) -> Result<Option<Rejection>, StoreError> {
        let window = self.ledger.window(RiskScope::Global, self.day).await?;
        let limits = self.ledger.limits();
        Ok(check_window(
            &window,
            self.reserved_for(RiskScope::Global),
            limits.global_max_trades_per_day,
            limits.global_max_daily_loss,
            (RejectionKind::GlobalTradeLimit, RejectionKind::GlobalLossLimit),
            "global",
        ))
    }

    /// Count an approval against the strategy and global budgets.
    pub fn reserve(&mut self, strategy_id: StrategyId) {
        *self.reserved.entry(RiskScope::Strategy(strategy_id)).or_default() += 1;
        *self.reserved.entry(RiskScope::Global).or_default() += 1;
    }

    pub fn reserved_for(&self, scope: RiskScope) -> u32 {
        self.reserved.get(&scope).copied().unwrap_or(0)
    }
}

fn check_window(
    window: &RiskWindow,
    reserved: u32,
    max_trades: u32,
    max_loss: Decimal,
    (trade_kind, loss_kind): (RejectionKind, RejectionKind),
    label: &str,
) -> Option<Rejection> {
    let projected = window.total_trades.saturating_add(reserved);
    if projected >= max_trades {
        return Some(Rejection::new(
            trade_kind,
            format!(
                "{label} daily trade limit reached: {} executed + {reserved} pending of {max_trades}",
                window.total_trades
            ),
        ));
    }
    if max_loss > Decimal::ZERO && window.total_loss >= max_loss {
        return Some(Rejection::new(
            loss_kind,
            format!(
                "{label} daily loss limit reached: {} of {max_loss}",
                window.total_loss
            ),
        ));
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::{risk_day, ChainFamily, QuoteSource, Run, RunStatus};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    // ---- helpers -----------------------------------------------------------

    fn ledger(store: Arc<MemoryStore>, global_trades: u32, global_loss: Decimal) -> RiskLedger {
        RiskLedger::new(
            store,
            RiskLimits {
                global_max_trades_per_day: global_trades,
                global_max_daily_loss: global_loss,
            },
        )
    }

    fn fresh_since() -> DateTime<Utc> {
        Utc::now() - chrono::Duration::minutes(10)
    }

    /// Push a run through claim and completion so it lands in the windows.
    async fn settle(store: &MemoryStore, strategy: &Strategy, loss: Decimal) {
        let mut run = Run::simulated(strategy, dec!(1), dec!(0.1), QuoteSource::Synthetic);
        run.approved_for_auto_execution = true;
        store.insert_run(&run).await.unwrap();
        assert!(store.claim_run(run.id).await.unwrap());
        let now = Utc::now();
        store
            .complete_run(&RunCompletion {
                run_id: run.id,
                strategy_id: strategy.id,
                status: RunStatus::Executed,
                realized_profit: Some(-loss),
                error_message: None,
                tx_reference: None,
                loss,
                day: risk_day(now),
                finished_at: now,
            })
            .await
            .unwrap();
    }

    // ---- tests -------------------------------------------------------------

    #[test]
    fn test_trade_loss_rules() {
        assert_eq!(trade_loss(true, Some(dec!(2)), dec!(0.3)), dec!(0));
        assert_eq!(trade_loss(true, Some(dec!(-2)), dec!(0.3)), dec!(2));
        assert_eq!(trade_loss(true, None, dec!(0.3)), dec!(0));
        assert_eq!(trade_loss(false, Some(dec!(-1.5)), dec!(0.3)), dec!(1.5));
        assert_eq!(trade_loss(false, Some(dec!(1.5)), dec!(0.3)), dec!(1.5));
        assert_eq!(trade_loss(false, None, dec!(0.3)), dec!(0.3));
    }

    #[tokio::test]
    async fn test_strategy_trade_limit_at_cap() {
        let store = Arc::new(MemoryStore::new());
        let mut strategy = Strategy::sample(ChainFamily::Evm);
        strategy.max_trades_per_day = 5;
        for _ in 0..5 {
            settle(&store, &strategy, dec!(0)).await;
        }
        let ledger = ledger(store, 100, dec!(0));
        let pass = ledger.begin_pass(risk_day(Utc::now()), fresh_since()).await.unwrap();
        let rejection = pass.check_strategy(&strategy).await.unwrap().unwrap();
        assert_eq!(rejection.kind, RejectionKind::StrategyTradeLimit);
        assert!(pass.check_global().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_loss_cap_only_when_positive() {
        let store = Arc::new(MemoryStore::new());
        let mut strategy = Strategy::sample(ChainFamily::Native);
        settle(&store, &strategy, dec!(50)).await;

        let ledger = ledger(store, 100, dec!(0));
        let pass = ledger.begin_pass(risk_day(Utc::now()), fresh_since()).await.unwrap();
        // max_daily_loss = 0 means uncapped
        assert!(pass.check_strategy(&strategy).await.unwrap().is_none());

        strategy.max_daily_loss = dec!(50);
        let rejection = pass.check_strategy(&strategy).await.unwrap().unwrap();
        assert_eq!(rejection.kind, RejectionKind::StrategyLossLimit);
    }

    #[tokio::test]
    async fn test_global_limits() {
        let store = Arc::new(MemoryStore::new());
        let a = Strategy::sample(ChainFamily::Native);
        let b = Strategy::sample(ChainFamily::Evm);
        settle(&store, &a, dec!(3)).await;
        settle(&store, &b, dec!(4)).await;

        let trades = ledger(store.clone(), 2, dec!(0));
        let pass = trades.begin_pass(risk_day(Utc::now()), fresh_since()).await.unwrap();
        assert_eq!(
            pass.check_global().await.unwrap().map(|r| r.kind),
            Some(RejectionKind::GlobalTradeLimit)
        );

        let loss = ledger(store, 100, dec!(7));
        let pass = loss.begin_pass(risk_day(Utc::now()), fresh_since()).await.unwrap();
        assert_eq!(
            pass.check_global().await.unwrap().map(|r| r.kind),
            Some(RejectionKind::GlobalLossLimit)
        );
    }

    #[tokio::test]
    async fn test_reservations_count_toward_budget() {
        let store = Arc::new(MemoryStore::new());
        let mut strategy = Strategy::sample(ChainFamily::Evm);
        strategy.max_trades_per_day = 2;

        // One approved run still waiting for execution.
        let mut waiting = Run::simulated(&strategy, dec!(1), dec!(0.1), QuoteSource::Live);
        waiting.approved_for_auto_execution = true;
        store.insert_run(&waiting).await.unwrap();

        let ledger = ledger(store, 100, dec!(0));
        let mut pass = ledger.begin_pass(risk_day(Utc::now()), fresh_since()).await.unwrap();
        assert_eq!(pass.reserved_for(RiskScope::Strategy(strategy.id)), 1);
        assert!(pass.check_strategy(&strategy).await.unwrap().is_none());

        pass.reserve(strategy.id);
        let rejection = pass.check_strategy(&strategy).await.unwrap().unwrap();
        assert_eq!(rejection.kind, RejectionKind::StrategyTradeLimit);
        assert_eq!(pass.reserved_for(RiskScope::Global), 2);
    }

    #[tokio::test]
    async fn test_in_flight_runs_are_reserved() {
        let store = Arc::new(MemoryStore::new());
        let mut strategy = Strategy::sample(ChainFamily::Evm);
        strategy.max_trades_per_day = 1;

        // Claimed by another cycle, not yet settled.
        let mut claimed = Run::simulated(&strategy, dec!(1), dec!(0.1), QuoteSource::Live);
        claimed.approved_for_auto_execution = true;
        store.insert_run(&claimed).await.unwrap();
        assert!(store.claim_run(claimed.id).await.unwrap());

        let ledger = ledger(store, 100, dec!(0));
        let pass = ledger.begin_pass(risk_day(Utc::now()), fresh_since()).await.unwrap();
        assert_eq!(pass.reserved_for(RiskScope::Strategy(strategy.id)), 1);
        assert_eq!(pass.reserved_for(RiskScope::Global), 1);
        let rejection = pass.check_strategy(&strategy).await.unwrap().unwrap();
        assert_eq!(rejection.kind, RejectionKind::StrategyTradeLimit);
    }

    #[tokio::test]
    async fn test_stale_approvals_hold_no_budget() {
        let store = Arc::new(MemoryStore::new());
        let mut strategy = Strategy::sample(ChainFamily::Evm);
        strategy.max_trades_per_day = 1;

        let mut old = Run::simulated(&strategy, dec!(1), dec!(0.1), QuoteSource::Live);
        old.approved_for_auto_execution = true;
        old.started_at = Utc::now() - chrono::Duration::days(3);
        store.insert_run(&old).await.unwrap();

        let ledger = ledger(store, 100, dec!(0));
        let pass = ledger.begin_pass(risk_day(Utc::now()), fresh_since()).await.unwrap();
        assert_eq!(pass.reserved_for(RiskScope::Strategy(strategy.id)), 0);
        assert!(pass.check_strategy(&strategy).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_trade_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let strategy = Strategy::sample(ChainFamily::Evm);
        let mut run = Run::simulated(&strategy, dec!(1), dec!(0.1), QuoteSource::Live);
        run.approved_for_auto_execution = true;
        store.insert_run(&run).await.unwrap();
        store.claim_run(run.id).await.unwrap();

        let ledger = ledger(store.clone(), 100, dec!(0));
        let now = Utc::now();
        let completion = RunCompletion {
            run_id: run.id,
            strategy_id: strategy.id,
            status: RunStatus::Failed,
            realized_profit: None,
            error_message: Some("reverted".into()),
            tx_reference: None,
            loss: dec!(0.1),
            day: risk_day(now),
            finished_at: now,
        };
        assert!(ledger.record_trade(&completion).await.unwrap());
        assert!(!ledger.record_trade(&completion).await.unwrap());

        let window = ledger.window(RiskScope::Strategy(strategy.id), risk_day(now)).await.unwrap();
        assert_eq!(window.total_trades, 1);
        assert_eq!(window.total_loss, dec!(0.1));
    }
}
