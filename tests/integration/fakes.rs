//! Deterministic collaborators for integration testing.
//!
//! Provides quote, gas and executor implementations with fully
//! controllable outcomes, plus a `Harness` that wires the whole pipeline
//! on an in-memory store.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use arbwarden::engine::executor::{ExecutionContext, ExecutionReceipt, ExecutorFailure};
use arbwarden::engine::{
    DecisionEngine, ExecutionEngine, Orchestrator, Scanner, ScannerSettings, StaticBalances,
    TradeExecutor, WalletCheck, WalletThreshold,
};
use arbwarden::quotes::{GasOracle, QuoteError, QuoteProvider, QuoteRequest};
use arbwarden::safety::{CriticalAction, SafetyGate, SafetyUpdate, PHRASE_UNLOCK_EXECUTION};
use arbwarden::storage::{MemoryStore, RecordStore};
use arbwarden::strategy::{ChainSupport, RiskLedger, RiskLimits};
use arbwarden::types::{ChainFamily, Network, Run, Strategy};

pub const NOTIONAL: Decimal = dec!(100);

// ---------------------------------------------------------------------------
// Quotes and gas
// ---------------------------------------------------------------------------

/// Prices every leg as `amount × rate[venue]`. Unknown venues have no route.
pub struct VenueRates {
    rates: HashMap<String, Decimal>,
}

impl VenueRates {
    pub fn new(rates: &[(&str, Decimal)]) -> Self {
        Self {
            rates: rates.iter().map(|(v, r)| (v.to_string(), *r)).collect(),
        }
    }
}

#[async_trait]
impl QuoteProvider for VenueRates {
    async fn quote(&self, request: &QuoteRequest) -> Result<Decimal, QuoteError> {
        self.rates
            .get(&request.venue)
            .map(|rate| request.amount * rate)
            .ok_or_else(|| QuoteError::NoRoute {
                venue: request.venue.clone(),
                input: request.input_token.clone(),
                output: request.output_token.clone(),
            })
    }

    fn supports(&self, _family: ChainFamily, _network: Network) -> bool {
        true
    }

    fn name(&self) -> &str {
        "venue-rates"
    }
}

pub struct FlatGas(pub Decimal);

#[async_trait]
impl GasOracle for FlatGas {
    async fn round_trip_cost(&self, _strategy: &Strategy) -> Result<Decimal, QuoteError> {
        Ok(self.0)
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Succeed,
    Fail,
    Panic,
}

/// Executor whose outcome is set by the test.
pub struct ScriptedExecutor {
    outcome: Mutex<Outcome>,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome: Mutex::new(outcome),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_outcome(&self, outcome: Outcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TradeExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        run: &Run,
        _strategy: &Strategy,
        _ctx: ExecutionContext,
    ) -> Result<ExecutionReceipt, ExecutorFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = *self.outcome.lock().unwrap();
        match outcome {
            Outcome::Succeed => Ok(ExecutionReceipt {
                realized_profit: run.estimated_profit - run.estimated_gas_cost,
                tx_reference: Some(format!("tx-{}", run.id)),
            }),
            Outcome::Fail => Err(ExecutorFailure::new("venue rejected the order")),
            Outcome::Panic => panic!("executor crashed"),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// The full pipeline on a `MemoryStore`.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub gate: Arc<SafetyGate>,
    pub ledger: Arc<RiskLedger>,
    pub scanners: Vec<Arc<Scanner>>,
    pub decision: Arc<DecisionEngine>,
    pub execution: Arc<ExecutionEngine>,
    pub orchestrator: Orchestrator,
    pub executor: Arc<ScriptedExecutor>,
}

impl Harness {
    /// Venue A quotes 1:1, venue B returns `return_rate`, so every run of a
    /// default strategy estimates `NOTIONAL × (return_rate − 1)` profit.
    pub fn new(return_rate: Decimal, gas: Decimal, limits: RiskLimits) -> Self {
        Self::with_wallets(return_rate, gas, limits, Vec::new())
    }

    pub fn with_wallets(
        return_rate: Decimal,
        gas: Decimal,
        limits: RiskLimits,
        wallets: Vec<WalletThreshold>,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn RecordStore> = store.clone();
        let gate = Arc::new(SafetyGate::new(dyn_store.clone()));
        let ledger = Arc::new(RiskLedger::new(dyn_store.clone(), limits));
        let quotes = Arc::new(VenueRates::new(&[("venue-a", dec!(1)), ("venue-b", return_rate)]));
        let gas = Arc::new(FlatGas(gas));

        let scanners: Vec<Arc<Scanner>> = ChainFamily::ALL
            .iter()
            .map(|family| {
                let settings = ScannerSettings {
                    notional: NOTIONAL,
                    support: ChainSupport {
                        networks: vec![Network::Testnet, Network::Mainnet],
                        chain_ids: Vec::new(),
                    },
                };
                Arc::new(
                    Scanner::new(*family, settings, dyn_store.clone(), quotes.clone(), gas.clone())
                        .with_live(quotes.clone()),
                )
            })
            .collect();

        let executor = Arc::new(ScriptedExecutor::new(Outcome::Succeed));
        let decision = Arc::new(DecisionEngine::new(
            dyn_store.clone(),
            gate.clone(),
            ledger.clone(),
            chrono::Duration::minutes(10),
        ));
        let execution = Arc::new(ExecutionEngine::new(
            dyn_store.clone(),
            gate.clone(),
            ledger.clone(),
            executor.clone(),
            3,
            chrono::Duration::minutes(10),
        ));
        let balances = StaticBalances::from_thresholds(&wallets);
        let wallet_check = Arc::new(WalletCheck::new(
            dyn_store.clone(),
            gate.clone(),
            Arc::new(balances),
            wallets,
        ));
        let orchestrator = Orchestrator::new(
            dyn_store,
            gate.clone(),
            scanners.clone(),
            decision.clone(),
            execution.clone(),
            wallet_check,
        );

        Self {
            store,
            gate,
            ledger,
            scanners,
            decision,
            execution,
            orchestrator,
            executor,
        }
    }

    /// Turn automation on and unlock execution.
    pub async fn arm(&self) {
        self.gate
            .propose_transition(
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
        self.gate
            .propose_transition(
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

    pub async fn add_strategy(&self, strategy: &Strategy) {
        self.store.upsert_strategy(strategy).await.unwrap();
    }

    pub fn scanner(&self, family: ChainFamily) -> &Scanner {
        self.scanners
            .iter()
            .find(|s| s.family() == family)
            .expect("scanner for every family")
    }
}

pub fn limits(trades: u32) -> RiskLimits {
    RiskLimits {
        global_max_trades_per_day: trades,
        global_max_daily_loss: Decimal::ZERO,
    }
}

/// An enabled, auto-enabled testnet strategy with permissive thresholds.
pub fn strategy(family: ChainFamily, name: &str) -> Strategy {
    let (base, quote, chain_id) = match family {
        ChainFamily::Native => (
            "So11111111111111111111111111111111111111112",
            "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
            None,
        ),
        ChainFamily::Evm => (
            "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
            "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
            Some(11155111),
        ),
    };
    let now = Utc::now();
    Strategy {
        id: Uuid::new_v4(),
        name: name.to_string(),
        family,
        network: Network::Testnet,
        chain_id,
        venue_a: "venue-a".to_string(),
        venue_b: "venue-b".to_string(),
        base_token: base.to_string(),
        quote_token: quote.to_string(),
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
