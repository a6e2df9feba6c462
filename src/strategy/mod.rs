//! Strategy definitions: validation and risk budgeting.
//!
//! `validate` is the scanner's first step. A strategy that fails it is
//! never priced; the scanner records a terminal run carrying the
//! `ValidationError` text instead.

pub mod risk;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::types::{ChainFamily, Network, Strategy};

pub use risk::{BudgetPass, RiskLedger, RiskLimits};

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

// ---------------------------------------------------------------------------
// Chain support
// ---------------------------------------------------------------------------

/// Networks (and, for EVM, chain ids) a scanner is configured to price.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainSupport {
    pub networks: Vec<Network>,
    /// Empty accepts any chain id.
    #[serde(default)]
    pub chain_ids: Vec<u64>,
}

impl ChainSupport {
    pub fn any_network() -> Self {
        Self {
            networks: vec![Network::Mainnet, Network::Testnet],
            chain_ids: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} is not a valid {family} address: {value}")]
    BadAddress {
        field: &'static str,
        family: ChainFamily,
        value: String,
    },

    #[error("{0} must not be empty")]
    EmptyVenue(&'static str),

    #[error("venueA and venueB must differ (both {0})")]
    SameVenue(String),

    #[error("network {0} is not supported by this scanner")]
    UnsupportedNetwork(Network),

    #[error("EVM strategy needs a chainId")]
    MissingChainId,

    #[error("chain id {0} is not supported by this scanner")]
    UnsupportedChain(u64),

    #[error("{field} must be non-negative (got {value})")]
    NegativeThreshold { field: &'static str, value: Decimal },
}

/// Check a strategy is well formed for its family and priceable here.
pub fn validate(strategy: &Strategy, support: &ChainSupport) -> Result<(), ValidationError> {
    check_address("baseToken", strategy.family, &strategy.base_token)?;
    check_address("quoteToken", strategy.family, &strategy.quote_token)?;

    if strategy.venue_a.trim().is_empty() {
        return Err(ValidationError::EmptyVenue("venueA"));
    }
    if strategy.venue_b.trim().is_empty() {
        return Err(ValidationError::EmptyVenue("venueB"));
    }
    if strategy.venue_a.trim().eq_ignore_ascii_case(strategy.venue_b.trim()) {
        return Err(ValidationError::SameVenue(strategy.venue_a.clone()));
    }

    if !support.networks.contains(&strategy.network) {
        return Err(ValidationError::UnsupportedNetwork(strategy.network));
    }
    if strategy.family == ChainFamily::Evm {
        let chain_id = strategy.chain_id.ok_or(ValidationError::MissingChainId)?;
        if !support.chain_ids.is_empty() && !support.chain_ids.contains(&chain_id) {
            return Err(ValidationError::UnsupportedChain(chain_id));
        }
    }

    for (field, value) in [
        ("minExpectedProfit", strategy.min_expected_profit),
        ("minProfitToGasRatio", strategy.min_profit_to_gas_ratio),
        ("maxDailyLoss", strategy.max_daily_loss),
    ] {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(ValidationError::NegativeThreshold { field, value });
        }
    }

    Ok(())
}

fn check_address(field: &'static str, family: ChainFamily, value: &str) -> Result<(), ValidationError> {
    let ok = match family {
        ChainFamily::Evm => is_evm_address(value),
        ChainFamily::Native => is_base58_address(value),
    };
    if ok {
        Ok(())
    } else {
        Err(ValidationError::BadAddress {
            field,
            family,
            value: value.to_string(),
        })
    }
}

/// `0x` followed by exactly 40 hex digits. Checksum case is not verified.
pub fn is_evm_address(value: &str) -> bool {
    value
        .strip_prefix("0x")
        .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Base58 string of 32–44 characters.
pub fn is_base58_address(value: &str) -> bool {
    (32..=44).contains(&value.len()) && value.chars().all(|c| BASE58_ALPHABET.contains(c))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
