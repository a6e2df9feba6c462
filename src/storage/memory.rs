//! In-memory record store.
//!
//! All state sits behind a single `tokio::sync::Mutex`, so every trait
//! method is atomic with respect to every other. Used by tests and by the
//! binary when no database URL is configured.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::{RecordStore, RunCompletion, StoreError};
use crate::types::{
    ChainFamily, CycleLog, RefillRequest, Rejection, RiskScope, RiskWindow, Run, RunId,
    RunStatus, SafetyAuditEntry, SafetyState, Strategy, StrategyId, WalletRole,
};

#[derive(Default)]
struct Inner {
    strategies: HashMap<StrategyId, Strategy>,
    /// Insertion order is creation order.
    runs: Vec<Run>,
    risk: HashMap<(RiskScope, NaiveDate), RiskWindow>,
    safety: Option<SafetyState>,
    audit: Vec<SafetyAuditEntry>,
    refills: Vec<RefillRequest>,
    cycles: Vec<CycleLog>,
}

impl Inner {
    fn run_mut(&mut self, id: RunId) -> Option<&mut Run> {
        self.runs.iter_mut().find(|r| r.id == id)
    }

    fn add_to_window(&mut self, scope: RiskScope, day: NaiveDate, loss: rust_decimal::Decimal) {
        let window = self
            .risk
            .entry((scope, day))
            .or_insert_with(|| RiskWindow::empty(scope, day));
        window.total_trades += 1;
        window.total_loss += loss;
    }
}

/// In-memory `RecordStore`.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every subsequent call fails with
    /// `StoreError::Unavailable` until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store marked unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert_strategy(&self, strategy: &Strategy) -> Result<(), StoreError> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        inner.strategies.insert(strategy.id, strategy.clone());
        Ok(())
    }

    async fn get_strategy(&self, id: StrategyId) -> Result<Option<Strategy>, StoreError> {
        self.check()?;
        Ok(self.inner.lock().await.strategies.get(&id).cloned())
    }

    async fn list_strategies(&self) -> Result<Vec<Strategy>, StoreError> {
        self.check()?;
        let inner = self.inner.lock().await;
        let mut strategies: Vec<Strategy> = inner.strategies.values().cloned().collect();
        strategies.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(strategies)
    }

    async fn insert_run(&self, run: &Run) -> Result<(), StoreError> {
        self.check()?;
        self.inner.lock().await.runs.push(run.clone());
        Ok(())
    }

    async fn get_run(&self, id: RunId) -> Result<Option<Run>, StoreError> {
        self.check()?;
        Ok(self.inner.lock().await.runs.iter().find(|r| r.id == id).cloned())
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<Run>, StoreError> {
        self.check()?;
        let inner = self.inner.lock().await;
        Ok(inner.runs.iter().rev().take(limit).cloned().collect())
    }

    async fn runs_awaiting_decision(&self, since: DateTime<Utc>) -> Result<Vec<Run>, StoreError> {
        self.check()?;
        let inner = self.inner.lock().await;
        let mut runs: Vec<Run> = inner
            .runs
            .iter()
            .filter(|r| r.awaits_decision() && r.started_at >= since)
            .cloned()
            .collect();
        // Stable: ties keep insertion order.
        runs.sort_by_key(|r| r.started_at);
        Ok(runs)
    }

    async fn runs_awaiting_execution(&self) -> Result<Vec<Run>, StoreError> {
        self.check()?;
        let inner = self.inner.lock().await;
        let mut runs: Vec<Run> = inner
            .runs
            .iter()
            .filter(|r| r.awaits_execution())
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.started_at);
        Ok(runs)
    }

    async fn runs_in_flight(&self) -> Result<Vec<Run>, StoreError> {
        self.check()?;
        let inner = self.inner.lock().await;
        let mut runs: Vec<Run> = inner
            .runs
            .iter()
            .filter(|r| r.status == RunStatus::Executing)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.started_at);
        Ok(runs)
    }

    async fn record_rejections(&self, rejections: &[(RunId, Rejection)]) -> Result<(), StoreError> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        for (id, rejection) in rejections {
            if let Some(run) = inner.run_mut(*id) {
                if run.awaits_decision() {
                    run.last_rejection = Some(rejection.clone());
                }
            }
        }
        Ok(())
    }

    async fn approve_runs(&self, ids: &[RunId]) -> Result<Vec<RunId>, StoreError> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        let mut approved = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(run) = inner.run_mut(*id) {
                if run.status == RunStatus::Simulated && !run.approved_for_auto_execution {
                    run.approved_for_auto_execution = true;
                    run.last_rejection = None;
                    approved.push(*id);
                }
            }
        }
        Ok(approved)
    }

    async fn claim_run(&self, id: RunId) -> Result<bool, StoreError> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        match inner.run_mut(id) {
            Some(run) if run.awaits_execution() => {
                run.status = RunStatus::Executing;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_run(&self, completion: &RunCompletion) -> Result<bool, StoreError> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        match inner.run_mut(completion.run_id) {
            Some(run) if run.status == RunStatus::Executing => {
                run.status = completion.status;
                run.realized_profit = completion.realized_profit;
                run.error_message = completion.error_message.clone();
                run.tx_reference = completion.tx_reference.clone();
                run.finished_at = Some(completion.finished_at);
            }
            _ => return Ok(false),
        }
        inner.add_to_window(RiskScope::Strategy(completion.strategy_id), completion.day, completion.loss);
        inner.add_to_window(RiskScope::Global, completion.day, completion.loss);
        Ok(true)
    }

    async fn risk_window(&self, scope: RiskScope, day: NaiveDate) -> Result<RiskWindow, StoreError> {
        self.check()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .risk
            .get(&(scope, day))
            .cloned()
            .unwrap_or_else(|| RiskWindow::empty(scope, day)))
    }

    async fn load_safety_state(&self) -> Result<Option<SafetyState>, StoreError> {
        self.check()?;
        Ok(self.inner.lock().await.safety.clone())
    }

    async fn commit_safety_state(
        &self,
        expected_version: u64,
        state: &SafetyState,
        audit: &SafetyAuditEntry,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        let found = inner.safety.as_ref().map(|s| s.version).unwrap_or(0);
        if found != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                found,
            });
        }
        inner.safety = Some(state.clone());
        inner.audit.push(audit.clone());
        Ok(())
    }

    async fn safety_audit(&self, limit: usize) -> Result<Vec<SafetyAuditEntry>, StoreError> {
        self.check()?;
        let inner = self.inner.lock().await;
        Ok(inner.audit.iter().rev().take(limit).cloned().collect())
    }

    async fn has_pending_refill(&self, role: WalletRole, family: ChainFamily) -> Result<bool, StoreError> {
        self.check()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .refills
            .iter()
            .any(|r| r.role == role && r.family == family && r.fulfilled_at.is_none()))
    }

    async fn open_refill_request(&self, request: &RefillRequest) -> Result<bool, StoreError> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        let pending = inner.refills.iter().any(|r| {
            r.role == request.role && r.family == request.family && r.fulfilled_at.is_none()
        });
        if pending {
            return Ok(false);
        }
        inner.refills.push(request.clone());
        Ok(true)
    }

    async fn fulfil_refill_requests(
        &self,
        role: WalletRole,
        family: ChainFamily,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        let mut count = 0;
        for request in inner
            .refills
            .iter_mut()
            .filter(|r| r.role == role && r.family == family && r.fulfilled_at.is_none())
        {
            request.fulfilled_at = Some(at);
            count += 1;
        }
        Ok(count)
    }

    async fn refill_requests(&self, pending_only: bool) -> Result<Vec<RefillRequest>, StoreError> {
        self.check()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .refills
            .iter()
            .rev()
            .filter(|r| !pending_only || r.fulfilled_at.is_none())
            .cloned()
            .collect())
    }

    async fn save_cycle_log(&self, log: &CycleLog) -> Result<(), StoreError> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        match inner.cycles.iter_mut().find(|c| c.id == log.id) {
            Some(existing) => *existing = log.clone(),
            None => inner.cycles.push(log.clone()),
        }
        Ok(())
    }

    async fn recent_cycle_logs(&self, limit: usize) -> Result<Vec<CycleLog>, StoreError> {
        self.check()?;
        let inner = self.inner.lock().await;
        Ok(inner.cycles.iter().rev().take(limit).cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
