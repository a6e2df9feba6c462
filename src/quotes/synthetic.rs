//! Synthetic quote generator.
//!
//! Used when the live endpoint cannot price a network (most testnets) or
//! when a scan is forced synthetic. Output is deterministic per
//! (venue, input, output): a fixed spread between `-max_spread_bps` and
//! `+max_spread_bps` applied to the input amount. Runs priced here are
//! tagged `QuoteSource::Synthetic` by the scanner.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::{QuoteError, QuoteProvider, QuoteRequest};
use crate::types::{ChainFamily, Network};

const PROVIDER_NAME: &str = "synthetic";
const DEFAULT_MAX_SPREAD_BPS: u32 = 30;

pub struct SyntheticQuotes {
    max_spread_bps: u32,
}

impl Default for SyntheticQuotes {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SPREAD_BPS)
    }
}

impl SyntheticQuotes {
    pub fn new(max_spread_bps: u32) -> Self {
        Self { max_spread_bps }
    }

    /// Signed spread in basis points for a leg, stable across calls.
    fn spread_bps(&self, request: &QuoteRequest) -> i64 {
        if self.max_spread_bps == 0 {
            return 0;
        }
        let mut hasher = DefaultHasher::new();
        request.venue.hash(&mut hasher);
        request.input_token.hash(&mut hasher);
        request.output_token.hash(&mut hasher);
        let width = 2 * self.max_spread_bps as u64 + 1;
        (hasher.finish() % width) as i64 - self.max_spread_bps as i64
    }
}

#[async_trait]
impl QuoteProvider for SyntheticQuotes {
    async fn quote(&self, request: &QuoteRequest) -> Result<Decimal, QuoteError> {
        let spread = Decimal::new(self.spread_bps(request), 4);
        Ok(request.amount * (Decimal::ONE + spread))
    }

    fn supports(&self, _family: ChainFamily, _network: Network) -> bool {
        true
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
