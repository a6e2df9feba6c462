//! ARBWARDEN: safety-gated arbitrage automation pipeline.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the record store, wires the pipeline, serves the API and runs
//! one orchestrator cycle per interval tick with graceful shutdown.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use arbwarden::api::{self, ApiState};
use arbwarden::config::AppConfig;
use arbwarden::engine::{
    CycleReport, DecisionEngine, DryRunExecutor, ExecutionEngine, Orchestrator, Scanner,
    StaticBalances, WalletCheck,
};
use arbwarden::quotes::{HttpQuoteProvider, QuoteProvider, SyntheticQuotes};
use arbwarden::safety::SafetyGate;
use arbwarden::storage::{MemoryStore, RecordStore, SqliteStore};
use arbwarden::strategy::RiskLedger;
use arbwarden::types::ChainFamily;

const BANNER: &str = r#"
    _    ____  ______        ___    ____  ____  _____ _   _
   / \  |  _ \| __ ) \      / / \  |  _ \|  _ \| ____| \ | |
  / _ \ | |_) |  _ \\ \ /\ / / _ \ | |_) | | | |  _| |  \| |
 / ___ \|  _ <| |_) |\ V  V / ___ \|  _ <| |_| | |___| |\  |
/_/   \_\_| \_\____/  \_/\_/_/   \_\_| \_\____/|_____|_| \_|

  Safety-gated arbitrage automation
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(
        cycle_interval_secs = cfg.pipeline.cycle_interval_secs,
        decision_window_secs = cfg.pipeline.decision_window_secs,
        global_max_trades_per_day = cfg.risk.global_max_trades_per_day,
        "ARBWARDEN starting up"
    );

    // -- Record store -----------------------------------------------------

    let store: Arc<dyn RecordStore> = match &cfg.storage.database_url {
        Some(url) => Arc::new(
            SqliteStore::connect(url)
                .await
                .with_context(|| format!("Failed to open record store at {url}"))?,
        ),
        None => {
            warn!("No database_url configured, records are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let gate = Arc::new(SafetyGate::new(store.clone()));
    let state = gate.read_state().await.context("Failed to read safety state")?;
    info!(
        auto_arbitrage = state.auto_arbitrage_enabled,
        safe_mode = state.safe_mode_enabled,
        execution_locked = state.execution_locked,
        mainnet = state.is_mainnet_mode,
        version = state.version,
        "Safety state loaded"
    );

    // -- Pipeline components ----------------------------------------------

    let gas = Arc::new(cfg.gas.clone());
    let synthetic = Arc::new(SyntheticQuotes::new(cfg.quotes.synthetic_spread_bps));
    let live: Option<Arc<dyn QuoteProvider>> = match &cfg.quotes.base_url {
        Some(url) => {
            let provider = HttpQuoteProvider::new(url.clone(), cfg.quotes.api_key()?, cfg.quotes.live_pairs())?;
            info!(base_url = %url, live = cfg.quotes.live.len(), "Live quote provider enabled");
            Some(Arc::new(provider) as Arc<dyn QuoteProvider>)
        }
        None => {
            info!("No live quote endpoint configured, all scans price synthetically");
            None
        }
    };

    let mut scanners = HashMap::new();
    for family in ChainFamily::ALL {
        let mut scanner = Scanner::new(
            *family,
            cfg.scanner.settings(*family).clone(),
            store.clone(),
            synthetic.clone(),
            gas.clone(),
        );
        if let Some(live) = &live {
            scanner = scanner.with_live(live.clone());
        }
        scanners.insert(*family, Arc::new(scanner));
    }

    let ledger = Arc::new(RiskLedger::new(store.clone(), cfg.risk.clone()));
    let decision = Arc::new(DecisionEngine::new(
        store.clone(),
        gate.clone(),
        ledger.clone(),
        cfg.pipeline.decision_window(),
    ));

    // Dry-run until a signing executor is wired in.
    let execution = Arc::new(ExecutionEngine::new(
        store.clone(),
        gate.clone(),
        ledger,
        Arc::new(DryRunExecutor),
        cfg.pipeline.consecutive_failure_limit,
        cfg.pipeline.decision_window(),
    ));

    let wallets = Arc::new(WalletCheck::new(
        store.clone(),
        gate.clone(),
        Arc::new(StaticBalances::from_thresholds(&cfg.wallets)),
        cfg.wallets.clone(),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        gate.clone(),
        ChainFamily::ALL.iter().filter_map(|f| scanners.get(f).cloned()).collect(),
        decision.clone(),
        execution.clone(),
        wallets,
    ));

    // -- API --------------------------------------------------------------

    if cfg.api.enabled {
        let api_state = Arc::new(ApiState {
            store: store.clone(),
            gate: gate.clone(),
            scanners,
            decision,
            execution,
            orchestrator: orchestrator.clone(),
        });
        api::spawn_api(api_state, cfg.api.port).await?;
    }

    // -- Main loop --------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.pipeline.cycle_interval_secs.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.pipeline.cycle_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    let mut cycles: u64 = 0;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = orchestrator.run_cycle().await;
                cycles += 1;
                log_cycle_report(&report);
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    info!(cycles, "ARBWARDEN shut down cleanly.");
    Ok(())
}

/// Log a one-line cycle summary.
fn log_cycle_report(report: &CycleReport) {
    let s = &report.summary;
    info!(
        cycle_id = %report.cycle_id,
        status = ?report.status,
        simulations = s.simulations,
        profitable = s.profitable,
        approved = s.approved,
        rejected = s.rejected,
        executed = s.executed,
        failed = s.failed,
        safe_mode_triggered = s.safe_mode_triggered,
        refills_opened = s.refill_requests_opened,
        "Cycle complete"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("arbwarden=info"));

    let json_logging = std::env::var("ARBWARDEN_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
