//! Fixed-rate gas oracle.
//!
//! Charges a configured per-leg fee (in the family's gas token) for both
//! legs and converts it into profit units at a fixed gas-token price.
//! The price is an approximation; swap in a live `GasOracle` where cost
//! accuracy matters.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{GasOracle, QuoteError};
use crate::types::{ChainFamily, Strategy};

/// Deserialized directly from `[gas]`.
#[derive(Debug, Clone, Deserialize)]
pub struct FixedRateGasOracle {
    /// Fee per leg in the native chain's gas token.
    pub native_fee_per_leg: Decimal,
    /// Fee per leg in the EVM chain's gas token.
    pub evm_fee_per_leg: Decimal,
    /// Gas token → profit unit conversion rate.
    pub gas_token_price: Decimal,
}

#[async_trait]
impl GasOracle for FixedRateGasOracle {
    async fn round_trip_cost(&self, strategy: &Strategy) -> Result<Decimal, QuoteError> {
        let per_leg = match strategy.family {
            ChainFamily::Native => self.native_fee_per_leg,
            ChainFamily::Evm => self.evm_fee_per_leg,
        };
        Ok(per_leg * Decimal::TWO * self.gas_token_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_round_trip_uses_family_fee() {
        let oracle = FixedRateGasOracle {
            native_fee_per_leg: dec!(0.000005),
            evm_fee_per_leg: dec!(0.002),
            gas_token_price: dec!(2000),
        };
        let evm = oracle.round_trip_cost(&Strategy::sample(ChainFamily::Evm)).await.unwrap();
        let native = oracle.round_trip_cost(&Strategy::sample(ChainFamily::Native)).await.unwrap();
        assert_eq!(evm, dec!(8));
        assert_eq!(native, dec!(0.02));
    }
}
