//! Pricing collaborators.
//!
//! Defines the `QuoteProvider` trait (estimated output of one swap leg) and
//! the `GasOracle` trait (estimated round-trip gas cost in profit units),
//! and provides implementations for:
//! - a live HTTP quote endpoint
//! - a clearly labelled synthetic quote generator for networks the live
//!   endpoint does not price
//! - a fixed-rate gas oracle

pub mod gas;
pub mod http;
pub mod synthetic;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::types::{ChainFamily, Network, Strategy};

pub use gas::FixedRateGasOracle;
pub use http::HttpQuoteProvider;
pub use synthetic::SyntheticQuotes;

// ---------------------------------------------------------------------------
// Request / error types
// ---------------------------------------------------------------------------

/// One swap leg to be priced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub family: ChainFamily,
    pub network: Network,
    pub chain_id: Option<u64>,
    pub venue: String,
    pub input_token: String,
    pub output_token: String,
    pub amount: Decimal,
}

impl QuoteRequest {
    /// The outbound leg (venue A, base → quote) for `amount` of base.
    pub fn outbound(strategy: &Strategy, amount: Decimal) -> Self {
        Self {
            family: strategy.family,
            network: strategy.network,
            chain_id: strategy.chain_id,
            venue: strategy.venue_a.clone(),
            input_token: strategy.base_token.clone(),
            output_token: strategy.quote_token.clone(),
            amount,
        }
    }

    /// The return leg (venue B, quote → base) for `amount` of quote.
    pub fn inbound(strategy: &Strategy, amount: Decimal) -> Self {
        Self {
            family: strategy.family,
            network: strategy.network,
            chain_id: strategy.chain_id,
            venue: strategy.venue_b.clone(),
            input_token: strategy.quote_token.clone(),
            output_token: strategy.base_token.clone(),
            amount,
        }
    }
}

/// Pricing failures. All of them are recoverable at the run level.
#[derive(Debug, thiserror::Error)]
pub enum QuoteError {
    #[error("{provider} does not price {family}/{network}")]
    Unsupported {
        provider: String,
        family: ChainFamily,
        network: Network,
    },

    #[error("Quote request failed ({provider}): {message}")]
    Request { provider: String, message: String },

    #[error("No route on {venue} for {input} → {output}")]
    NoRoute {
        venue: String,
        input: String,
        output: String,
    },
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Abstraction over swap-quote sources.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Estimated output amount for one leg.
    async fn quote(&self, request: &QuoteRequest) -> Result<Decimal, QuoteError>;

    /// Whether this provider prices the given family and network at all.
    fn supports(&self, family: ChainFamily, network: Network) -> bool;

    /// Provider name for logging and run metadata.
    fn name(&self) -> &str;
}

/// Converts the gas a round trip burns into the strategy's profit units.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GasOracle: Send + Sync {
    async fn round_trip_cost(&self, strategy: &Strategy) -> Result<Decimal, QuoteError>;
}
