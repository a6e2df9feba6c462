//! Wallet reconciliation.
//!
//! Last stage of a cycle. Reads the balance of every configured
//! operational wallet and opens a refill request for each one under its
//! threshold, unless one is already pending for that role and family.
//! Refill strategies are only approved while such a request is open.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::safety::SafetyGate;
use crate::storage::RecordStore;
use crate::types::{ChainFamily, PipelineError, RefillRequest, WalletRole};

/// One `[[wallets]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct WalletThreshold {
    pub role: WalletRole,
    pub family: ChainFamily,
    pub address: String,
    pub min_balance: Decimal,
    /// Balance reported by `StaticBalances` when no live source is wired.
    #[serde(default)]
    pub assumed_balance: Option<Decimal>,
}

/// Source of on-chain balances.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn balance(&self, family: ChainFamily, address: &str) -> Result<Decimal>;
}

/// Fixed balances keyed by address.
pub struct StaticBalances {
    balances: HashMap<String, Decimal>,
}

impl StaticBalances {
    pub fn new(balances: HashMap<String, Decimal>) -> Self {
        Self { balances }
    }

    /// Balances from each threshold's `assumed_balance`.
    pub fn from_thresholds(wallets: &[WalletThreshold]) -> Self {
        Self::new(
            wallets
                .iter()
                .filter_map(|w| w.assumed_balance.map(|b| (w.address.clone(), b)))
                .collect(),
        )
    }
}

#[async_trait]
impl BalanceSource for StaticBalances {
    async fn balance(&self, _family: ChainFamily, address: &str) -> Result<Decimal> {
        self.balances
            .get(address)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no balance known for {address}"))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletReport {
    pub checked: usize,
    pub below_threshold: usize,
    pub refill_requests_opened: usize,
    pub errors: Vec<String>,
    pub skipped: Option<String>,
}

pub struct WalletCheck {
    store: Arc<dyn RecordStore>,
    gate: Arc<SafetyGate>,
    source: Arc<dyn BalanceSource>,
    wallets: Vec<WalletThreshold>,
}

impl WalletCheck {
    pub fn new(
        store: Arc<dyn RecordStore>,
        gate: Arc<SafetyGate>,
        source: Arc<dyn BalanceSource>,
        wallets: Vec<WalletThreshold>,
    ) -> Self {
        Self {
            store,
            gate,
            source,
            wallets,
        }
    }

    /// Compare balances against thresholds and open refill requests.
    ///
    /// Individual balance lookups may fail without failing the stage; the
    /// stage fails only when every lookup did.
    pub async fn reconcile(&self) -> Result<WalletReport, PipelineError> {
        let state = self.gate.read_state().await?;
        if !state.wallet_check_enabled {
            return Ok(WalletReport {
                skipped: Some("skipped: wallet check disabled".to_string()),
                ..Default::default()
            });
        }

        let mut report = WalletReport::default();
        for wallet in &self.wallets {
            let balance = match self.source.balance(wallet.family, &wallet.address).await {
                Ok(balance) => balance,
                Err(e) => {
                    warn!(role = %wallet.role, family = %wallet.family, error = %e, "Balance lookup failed");
                    report.errors.push(format!("{}/{}: {e:#}", wallet.family, wallet.role));
                    continue;
                }
            };
            report.checked += 1;

            if balance >= wallet.min_balance {
                continue;
            }
            report.below_threshold += 1;

            let request = RefillRequest {
                id: Uuid::new_v4(),
                role: wallet.role,
                family: wallet.family,
                wallet: wallet.address.clone(),
                balance,
                min_balance: wallet.min_balance,
                requested_at: Utc::now(),
                fulfilled_at: None,
            };
            if self.store.open_refill_request(&request).await? {
                report.refill_requests_opened += 1;
                info!(
                    role = %wallet.role,
                    family = %wallet.family,
                    balance = %balance,
                    min_balance = %wallet.min_balance,
                    "Refill request opened"
                );
            }
        }

        if report.checked == 0 && !report.errors.is_empty() {
            return Err(PipelineError::Wallet(report.errors.join("; ")));
        }

        info!(
            checked = report.checked,
            below_threshold = report.below_threshold,
            opened = report.refill_requests_opened,
            "Wallet reconciliation complete"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
