//! Pipeline stages: scan → decide → execute → reconcile wallets.

pub mod decision;
pub mod executor;
pub mod orchestrator;
pub mod scanner;
pub mod wallet;

pub use decision::{DecisionEngine, DecisionReport};
pub use executor::{DryRunExecutor, ExecutionEngine, ExecutionReport, TradeExecutor};
pub use orchestrator::{CycleReport, Orchestrator};
pub use scanner::{ScanOptions, ScanReport, Scanner, ScannerSettings};
pub use wallet::{BalanceSource, StaticBalances, WalletCheck, WalletReport, WalletThreshold};
