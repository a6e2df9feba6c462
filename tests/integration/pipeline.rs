//! End-to-end pipeline tests.
//!
//! Drives scan → decide → execute → wallet check through the public API
//! with deterministic quotes and a scripted executor.

mod fakes;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use arbwarden::engine::orchestrator::{SKIPPED_SAFE_MODE, STAGE_EXECUTE, STAGE_WALLET_CHECK};
use arbwarden::engine::{ScanOptions, WalletThreshold};
use arbwarden::safety::{
    CriticalAction, SafetyError, SafetyUpdate, PHRASE_DISABLE_SAFE_MODE, PHRASE_ENABLE_MAINNET,
    PHRASE_UNLOCK_EXECUTION,
};
use arbwarden::storage::RecordStore;
use arbwarden::types::{
    risk_day, ChainFamily, CycleStatus, Network, RejectionKind, RiskScope, RunStatus, StageOutcome,
    WalletRole,
};
use chrono::Utc;

use fakes::{limits, strategy, Harness, Outcome};

// ---- helpers ---------------------------------------------------------------

async fn scan_all(h: &Harness) {
    for family in ChainFamily::ALL {
        h.scanner(*family).scan_stored(ScanOptions::default()).await.unwrap();
    }
}

fn stage<'a>(report: &'a arbwarden::engine::CycleReport, name: &str) -> &'a StageOutcome {
    &report
        .step_results
        .iter()
        .find(|s| s.stage == name)
        .unwrap_or_else(|| panic!("stage {name} missing"))
        .outcome
}

// ---- scenarios -------------------------------------------------------------

#[tokio::test]
async fn test_profit_below_strategy_threshold_is_rejected() {
    // 100 → 100 → 600: estimated profit 500.
    let h = Harness::new(dec!(6), Decimal::ZERO, limits(100));
    h.arm().await;
    let mut s = strategy(ChainFamily::Evm, "thin");
    s.min_expected_profit = dec!(1000);
    h.add_strategy(&s).await;

    scan_all(&h).await;
    let report = h.decision.evaluate().await.unwrap();

    assert_eq!(report.approved_count(), 0);
    let rejection = report.rejections.values().next().unwrap();
    assert_eq!(rejection.kind, RejectionKind::ProfitBelowThreshold);
    assert!(rejection.detail.contains("below threshold"));
}

#[tokio::test]
async fn test_automation_disabled_approves_nothing() {
    let h = Harness::new(dec!(1.05), Decimal::ZERO, limits(100));
    h.add_strategy(&strategy(ChainFamily::Evm, "evm")).await;
    scan_all(&h).await;

    let report = h.decision.evaluate().await.unwrap();
    assert_eq!(report.approved_count(), 0);
    assert!(report.rejections.is_empty());
    assert_eq!(report.halted.unwrap().kind, RejectionKind::AutomationDisabled);

    let runs = h.store.recent_runs(10).await.unwrap();
    assert!(runs.iter().all(|r| !r.approved_for_auto_execution && r.last_rejection.is_none()));
}

#[tokio::test]
async fn test_strategy_daily_trade_limit() {
    let h = Harness::new(dec!(1.05), Decimal::ZERO, limits(100));
    h.arm().await;
    let mut s = strategy(ChainFamily::Native, "capped");
    s.max_trades_per_day = 5;
    h.add_strategy(&s).await;

    for _ in 0..5 {
        scan_all(&h).await;
        assert_eq!(h.decision.evaluate().await.unwrap().approved_count(), 1);
        assert_eq!(h.execution.execute_approved().await.unwrap().executed_count, 1);
    }
    let window = h.ledger.window(RiskScope::Strategy(s.id), risk_day(Utc::now())).await.unwrap();
    assert_eq!(window.total_trades, 5);

    scan_all(&h).await;
    let report = h.decision.evaluate().await.unwrap();
    assert_eq!(report.approved_count(), 0);
    let rejection = report.rejections.values().next().unwrap();
    assert_eq!(rejection.kind, RejectionKind::StrategyTradeLimit);
}

#[tokio::test]
async fn test_executor_panic_gives_partial_cycle() {
    let wallets = vec![WalletThreshold {
        role: WalletRole::Ops,
        family: ChainFamily::Evm,
        address: "ops-wallet".to_string(),
        min_balance: dec!(1),
        assumed_balance: Some(dec!(5)),
    }];
    let h = Harness::with_wallets(dec!(1.05), Decimal::ZERO, limits(100), wallets);
    h.arm().await;
    h.add_strategy(&strategy(ChainFamily::Evm, "evm")).await;
    h.executor.set_outcome(Outcome::Panic);

    let report = h.orchestrator.run_cycle().await;

    assert_eq!(report.status, CycleStatus::Partial);
    assert!(stage(&report, "scan_evm").is_success());
    assert!(stage(&report, "decide").is_success());
    match stage(&report, STAGE_EXECUTE) {
        StageOutcome::Failure { error } => assert!(error.contains("executor crashed")),
        other => panic!("execute stage should have failed, got {other:?}"),
    }
    assert!(stage(&report, STAGE_WALLET_CHECK).is_success());

    // The persisted log matches the report.
    let logs = h.store.recent_cycle_logs(1).await.unwrap();
    assert_eq!(logs[0].overall_status, CycleStatus::Partial);
    assert_eq!(logs[0].stages.len(), report.step_results.len());
    assert!(logs[0].finished_at.is_some());

    // The claimed run is left for an operator.
    let runs = h.store.recent_runs(10).await.unwrap();
    assert_eq!(runs[0].status, RunStatus::Executing);
}

#[tokio::test]
async fn test_mainnet_phrase_gate() {
    let h = Harness::new(dec!(1), Decimal::ZERO, limits(100));
    let update = SafetyUpdate {
        is_mainnet_mode: Some(true),
        ..Default::default()
    };

    let before = h.gate.read_state().await.unwrap();
    for phrase in ["", "i confirm mainnet", "I CONFIRM MAINNET ", "yes"] {
        let err = h
            .gate
            .propose_transition(&update, "ops", Some(CriticalAction::EnableMainnet), Some(phrase))
            .await
            .unwrap_err();
        assert!(matches!(err, SafetyError::Rejected(_)));
    }
    assert_eq!(h.gate.read_state().await.unwrap(), before);

    let state = h
        .gate
        .propose_transition(&update, "ops", Some(CriticalAction::EnableMainnet), Some(PHRASE_ENABLE_MAINNET))
        .await
        .unwrap();
    assert!(state.is_mainnet_mode);
    assert_eq!(state.version, before.version + 1);
}

// ---- properties ------------------------------------------------------------

#[tokio::test]
async fn test_auto_disabled_strategy_never_approved() {
    // Very profitable, still never approved.
    let h = Harness::new(dec!(3), Decimal::ZERO, limits(100));
    h.arm().await;
    let mut manual = strategy(ChainFamily::Evm, "manual");
    manual.is_auto_enabled = false;
    let auto = strategy(ChainFamily::Native, "auto");
    h.add_strategy(&manual).await;
    h.add_strategy(&auto).await;

    for _ in 0..3 {
        h.orchestrator.run_cycle().await;
    }

    let runs = h.store.recent_runs(100).await.unwrap();
    let manual_runs: Vec<_> = runs.iter().filter(|r| r.strategy_id == manual.id).collect();
    assert_eq!(manual_runs.len(), 3);
    assert!(manual_runs.iter().all(|r| !r.approved_for_auto_execution));
    assert!(manual_runs.iter().all(|r| r.status == RunStatus::Simulated));
    assert!(runs
        .iter()
        .filter(|r| r.strategy_id == auto.id)
        .all(|r| r.status == RunStatus::Executed));
}

#[tokio::test]
async fn test_approved_runs_satisfy_every_check() {
    // Estimated profit 5, gas 2.
    let h = Harness::new(dec!(1.05), dec!(2), limits(100));
    h.arm().await;

    let ok = strategy(ChainFamily::Evm, "ok");
    let mut greedy = strategy(ChainFamily::Evm, "greedy");
    greedy.min_expected_profit = dec!(10);
    let mut gas_shy = strategy(ChainFamily::Native, "gas-shy");
    gas_shy.min_profit_to_gas_ratio = dec!(3);
    let mut mainnet = strategy(ChainFamily::Evm, "mainnet");
    mainnet.network = Network::Mainnet;
    mainnet.chain_id = Some(1);
    for s in [&ok, &greedy, &gas_shy, &mainnet] {
        h.add_strategy(s).await;
    }

    scan_all(&h).await;
    // Synthetic pricing for the mainnet strategy.
    h.scanner(ChainFamily::Evm)
        .scan(std::slice::from_ref(&mainnet), ScanOptions { force_synthetic_quotes: true })
        .await
        .unwrap();

    let report = h.decision.evaluate().await.unwrap();
    let strategies = h.store.list_strategies().await.unwrap();
    for id in &report.approved_ids {
        let run = h.store.get_run(*id).await.unwrap().unwrap();
        let s = strategies.iter().find(|s| s.id == run.strategy_id).unwrap();
        assert!(run.approved_for_auto_execution);
        assert!(s.is_enabled && s.is_auto_enabled);
        assert!(run.estimated_profit >= s.min_expected_profit);
        assert!(run.estimated_profit / run.estimated_gas_cost.max(Decimal::ONE) >= s.min_profit_to_gas_ratio);
    }

    let kinds: Vec<RejectionKind> = report.rejections.values().map(|r| r.kind).collect();
    assert!(kinds.contains(&RejectionKind::ProfitBelowThreshold));
    assert!(kinds.contains(&RejectionKind::ProfitToGasBelowThreshold));
    assert!(kinds.contains(&RejectionKind::SyntheticQuoteOnMainnet));
    // `ok` plus the live-priced mainnet run.
    assert_eq!(report.approved_count(), 2);
}

#[tokio::test]
async fn test_global_window_covers_strategy_windows() {
    let h = Harness::new(dec!(1.05), dec!(1), limits(100));
    h.arm().await;
    let a = strategy(ChainFamily::Evm, "a");
    let b = strategy(ChainFamily::Native, "b");
    h.add_strategy(&a).await;
    h.add_strategy(&b).await;

    h.orchestrator.run_cycle().await;
    h.executor.set_outcome(Outcome::Fail);
    h.orchestrator.run_cycle().await;
    h.executor.set_outcome(Outcome::Succeed);
    h.orchestrator.run_cycle().await;

    let day = risk_day(Utc::now());
    let global = h.ledger.window(RiskScope::Global, day).await.unwrap();
    let wa = h.ledger.window(RiskScope::Strategy(a.id), day).await.unwrap();
    let wb = h.ledger.window(RiskScope::Strategy(b.id), day).await.unwrap();

    assert_eq!(wa.total_trades + wb.total_trades, 6);
    assert!(global.total_trades >= wa.total_trades + wb.total_trades);
    assert!(global.total_loss >= wa.total_loss + wb.total_loss);
    // Two failures charged the estimated gas.
    assert_eq!(global.total_loss, dec!(2));
}

#[tokio::test]
async fn test_decide_twice_is_idempotent() {
    let h = Harness::new(dec!(1.05), Decimal::ZERO, limits(100));
    h.arm().await;
    h.add_strategy(&strategy(ChainFamily::Evm, "evm")).await;
    scan_all(&h).await;

    let first = h.decision.evaluate().await.unwrap();
    assert_eq!(first.approved_count(), 1);
    let run_before = h.store.get_run(first.approved_ids[0]).await.unwrap().unwrap();

    let second = h.decision.evaluate().await.unwrap();
    assert_eq!(second.approved_count(), 0);
    assert!(second.rejections.is_empty());
    let run_after = h.store.get_run(first.approved_ids[0]).await.unwrap().unwrap();
    assert_eq!(run_before, run_after);

    let report = h.execution.execute_approved().await.unwrap();
    assert_eq!(report.executed_count, 1);
    let global = h.ledger.window(RiskScope::Global, risk_day(Utc::now())).await.unwrap();
    assert_eq!(global.total_trades, 1);
}

#[tokio::test]
async fn test_safe_mode_at_execute_entry_executes_nothing() {
    let h = Harness::new(dec!(1.05), Decimal::ZERO, limits(100));
    h.arm().await;
    h.add_strategy(&strategy(ChainFamily::Evm, "evm")).await;
    scan_all(&h).await;
    assert_eq!(h.decision.evaluate().await.unwrap().approved_count(), 1);

    h.gate.trip_safe_mode("operator drill", "ops").await.unwrap();

    let report = h.execution.execute_approved().await.unwrap();
    assert_eq!(report.executed_count, 0);
    assert_eq!(h.executor.calls(), 0);
    assert_eq!(h.store.runs_awaiting_execution().await.unwrap().len(), 1);

    // Through the orchestrator, the stage is skipped outright.
    let cycle = h.orchestrator.run_cycle().await;
    assert_eq!(cycle.summary.executed, 0);
    match stage(&cycle, STAGE_EXECUTE) {
        StageOutcome::Success { payload } => assert_eq!(payload, SKIPPED_SAFE_MODE),
        other => panic!("execute stage should be skipped, got {other:?}"),
    }
}

#[tokio::test]
async fn test_wrong_phrase_never_mutates_state() {
    let h = Harness::new(dec!(1), Decimal::ZERO, limits(100));
    h.gate.trip_safe_mode("drill", "ops").await.unwrap();
    let before = h.gate.read_state().await.unwrap();
    let audit_before = h.gate.audit_log(100).await.unwrap().len();

    let attempts = [
        (
            SafetyUpdate {
                is_mainnet_mode: Some(true),
                ..Default::default()
            },
            CriticalAction::EnableMainnet,
            PHRASE_UNLOCK_EXECUTION,
        ),
        (
            SafetyUpdate {
                execution_locked: Some(false),
                ..Default::default()
            },
            CriticalAction::UnlockExecution,
            PHRASE_DISABLE_SAFE_MODE,
        ),
        (
            SafetyUpdate {
                safe_mode_enabled: Some(false),
                ..Default::default()
            },
            CriticalAction::DisableSafeMode,
            PHRASE_ENABLE_MAINNET,
        ),
    ];
    for (update, action, wrong_phrase) in &attempts {
        let err = h
            .gate
            .propose_transition(update, "ops", Some(*action), Some(*wrong_phrase))
            .await
            .unwrap_err();
        assert!(matches!(err, SafetyError::Rejected(_)));
        // No phrase at all is just as wrong.
        assert!(h.gate.propose_transition(update, "ops", None, None).await.is_err());
    }

    assert_eq!(h.gate.read_state().await.unwrap(), before);
    assert_eq!(h.gate.audit_log(100).await.unwrap().len(), audit_before);
}

// ---- supplemented behaviour ------------------------------------------------

#[tokio::test]
async fn test_consecutive_failures_trip_safe_mode() {
    let h = Harness::new(dec!(1.05), Decimal::ZERO, limits(100));
    h.arm().await;
    h.add_strategy(&strategy(ChainFamily::Evm, "flaky")).await;
    for _ in 0..3 {
        scan_all(&h).await;
    }
    assert_eq!(h.decision.evaluate().await.unwrap().approved_count(), 3);

    h.executor.set_outcome(Outcome::Fail);
    let report = h.execution.execute_approved().await.unwrap();
    assert_eq!(report.failed_count, 3);
    assert!(report.safe_mode_triggered);

    let state = h.gate.read_state().await.unwrap();
    assert!(state.safe_mode_enabled);
    assert_eq!(state.updated_by, "execution-engine");
}

#[tokio::test]
async fn test_mainnet_run_waits_for_mainnet_mode() {
    let h = Harness::new(dec!(1.05), Decimal::ZERO, limits(100));
    h.arm().await;
    let mut s = strategy(ChainFamily::Evm, "mainnet");
    s.network = Network::Mainnet;
    s.chain_id = Some(1);
    h.add_strategy(&s).await;

    scan_all(&h).await;
    assert_eq!(h.decision.evaluate().await.unwrap().approved_count(), 1);

    let report = h.execution.execute_approved().await.unwrap();
    assert_eq!(report.executed_count, 0);
    assert_eq!(report.skipped_count, 1);

    h.gate
        .propose_transition(
            &SafetyUpdate {
                is_mainnet_mode: Some(true),
                ..Default::default()
            },
            "ops",
            Some(CriticalAction::EnableMainnet),
            Some(PHRASE_ENABLE_MAINNET),
        )
        .await
        .unwrap();
    let report = h.execution.execute_approved().await.unwrap();
    assert_eq!(report.executed_count, 1);
}

#[tokio::test]
async fn test_refill_strategy_runs_only_against_pending_request() {
    let wallets = vec![WalletThreshold {
        role: WalletRole::FeePayer,
        family: ChainFamily::Native,
        address: "fee-payer".to_string(),
        min_balance: dec!(0.5),
        assumed_balance: Some(dec!(0.1)),
    }];
    let h = Harness::with_wallets(dec!(1.05), Decimal::ZERO, limits(100), wallets);
    h.arm().await;
    let mut refill = strategy(ChainFamily::Native, "refill");
    refill.is_for_fee_payer_refill = true;
    h.add_strategy(&refill).await;

    // No request yet: rejected. The wallet stage then opens one.
    let first = h.orchestrator.run_cycle().await;
    assert_eq!(first.status, CycleStatus::Success);
    assert_eq!(first.summary.approved, 0);
    assert_eq!(first.summary.refill_requests_opened, 1);
    assert!(h.store.has_pending_refill(WalletRole::FeePayer, ChainFamily::Native).await.unwrap());

    // Both runs are approved now; executing fulfils the request.
    let second = h.orchestrator.run_cycle().await;
    assert_eq!(second.summary.approved, 2);
    assert_eq!(second.summary.executed, 2);

    let requests = h.store.refill_requests(false).await.unwrap();
    assert!(requests.iter().any(|r| r.fulfilled_at.is_some()));
}

#[tokio::test]
async fn test_disabled_family_is_skipped_not_failed() {
    let h = Harness::new(dec!(1.05), Decimal::ZERO, limits(100));
    h.arm().await;
    h.gate
        .propose_transition(
            &SafetyUpdate {
                native_automation_enabled: Some(false),
                ..Default::default()
            },
            "ops",
            None,
            None,
        )
        .await
        .unwrap();
    h.add_strategy(&strategy(ChainFamily::Native, "native")).await;
    h.add_strategy(&strategy(ChainFamily::Evm, "evm")).await;

    let report = h.orchestrator.run_cycle().await;
    assert_eq!(report.status, CycleStatus::Success);
    assert_eq!(report.summary.simulations, 1);
    match stage(&report, "scan_native") {
        StageOutcome::Success { payload } => {
            assert_eq!(payload, "skipped: family automation disabled")
        }
        other => panic!("native scan should be skipped, got {other:?}"),
    }
}
