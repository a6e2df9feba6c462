//! Per-family opportunity scanner.
//!
//! For every enabled strategy of its family the scanner validates the
//! definition, prices the round trip (venue A base → quote, then venue B
//! quote → base) on a fixed notional and persists one SIMULATED run whose
//! estimated profit is the return-leg output minus the notional. Gas cost
//! is estimated separately and stored alongside for the decision engine's
//! profit/gas check.
//!
//! Networks the live quote provider cannot price (and scans forced
//! synthetic) go to the synthetic generator; those runs are tagged
//! `QuoteSource::Synthetic`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::quotes::{GasOracle, QuoteProvider, QuoteRequest};
use crate::storage::{RecordStore, StoreError};
use crate::strategy::{self, ChainSupport};
use crate::types::{ChainFamily, QuoteSource, Run, Strategy};

// ---------------------------------------------------------------------------
// Options / report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOptions {
    #[serde(default)]
    pub force_synthetic_quotes: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub family: ChainFamily,
    pub simulations: Vec<Run>,
    pub profitable_count: usize,
}

/// Scanner settings from `[scanner.<family>]`.
#[derive(Debug, Clone, Deserialize)]
pub struct ScannerSettings {
    /// Base-token amount priced on the outbound leg.
    pub notional: Decimal,
    #[serde(flatten)]
    pub support: ChainSupport,
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

pub struct Scanner {
    family: ChainFamily,
    settings: ScannerSettings,
    store: Arc<dyn RecordStore>,
    live: Option<Arc<dyn QuoteProvider>>,
    synthetic: Arc<dyn QuoteProvider>,
    gas: Arc<dyn GasOracle>,
}

impl Scanner {
    pub fn new(
        family: ChainFamily,
        settings: ScannerSettings,
        store: Arc<dyn RecordStore>,
        synthetic: Arc<dyn QuoteProvider>,
        gas: Arc<dyn GasOracle>,
    ) -> Self {
        Self {
            family,
            settings,
            store,
            live: None,
            synthetic,
            gas,
        }
    }

    /// Attach the live quote provider.
    pub fn with_live(mut self, live: Arc<dyn QuoteProvider>) -> Self {
        self.live = Some(live);
        self
    }

    pub fn family(&self) -> ChainFamily {
        self.family
    }

    pub fn support(&self) -> &ChainSupport {
        &self.settings.support
    }

    /// Scan every stored strategy of this family.
    pub async fn scan_stored(&self, options: ScanOptions) -> Result<ScanReport, StoreError> {
        let strategies = self.store.list_strategies().await?;
        self.scan(&strategies, options).await
    }

    /// Simulate and persist one run per enabled strategy of this family.
    /// Strategies of other families and disabled ones are ignored.
    pub async fn scan(&self, strategies: &[Strategy], options: ScanOptions) -> Result<ScanReport, StoreError> {
        let eligible: Vec<&Strategy> = strategies
            .iter()
            .filter(|s| s.family == self.family && s.is_enabled)
            .collect();

        info!(
            family = %self.family,
            strategies = eligible.len(),
            force_synthetic = options.force_synthetic_quotes,
            "Scanning"
        );

        let mut simulations = Vec::with_capacity(eligible.len());
        for strategy in eligible {
            let run = self.simulate(strategy, options).await;
            self.store.insert_run(&run).await?;
            simulations.push(run);
        }

        let profitable_count = simulations.iter().filter(|r| r.is_profitable()).count();
        info!(
            family = %self.family,
            simulations = simulations.len(),
            profitable = profitable_count,
            "Scan complete"
        );

        Ok(ScanReport {
            family: self.family,
            simulations,
            profitable_count,
        })
    }

    /// Provider for `strategy` and the source tag its runs carry.
    fn provider_for(&self, strategy: &Strategy, options: ScanOptions) -> (&dyn QuoteProvider, QuoteSource) {
        match &self.live {
            Some(live) if !options.force_synthetic_quotes && live.supports(strategy.family, strategy.network) => {
                (live.as_ref(), QuoteSource::Live)
            }
            _ => (self.synthetic.as_ref(), QuoteSource::Synthetic),
        }
    }

    async fn simulate(&self, strategy: &Strategy, options: ScanOptions) -> Run {
        let (provider, source) = self.provider_for(strategy, options);

        if let Err(e) = strategy::validate(strategy, &self.settings.support) {
            warn!(strategy = %strategy.name, error = %e, "Strategy failed validation");
            return Run::errored(strategy, source, format!("validation failed: {e}"));
        }

        let notional = self.settings.notional;
        let outbound = match provider.quote(&QuoteRequest::outbound(strategy, notional)).await {
            Ok(amount) => amount,
            Err(e) => {
                warn!(strategy = %strategy.name, provider = provider.name(), error = %e, "Outbound quote unavailable");
                return Run::errored(strategy, source, format!("quote unavailable: {e}"));
            }
        };
        let returned = match provider.quote(&QuoteRequest::inbound(strategy, outbound)).await {
            Ok(amount) => amount,
            Err(e) => {
                warn!(strategy = %strategy.name, provider = provider.name(), error = %e, "Return quote unavailable");
                return Run::errored(strategy, source, format!("quote unavailable: {e}"));
            }
        };
        let gas_cost = match self.gas.round_trip_cost(strategy).await {
            Ok(cost) => cost,
            Err(e) => {
                warn!(strategy = %strategy.name, error = %e, "Gas estimate unavailable");
                return Run::errored(strategy, source, format!("gas estimate unavailable: {e}"));
            }
        };

        let run = Run::simulated(strategy, returned - notional, gas_cost, source);
        debug!(
            strategy = %strategy.name,
            outbound = %outbound,
            returned = %returned,
            profit = %run.estimated_profit,
            gas = %gas_cost,
            source = source.as_str(),
            "Simulated round trip"
        );
        run
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
