//! ARBWARDEN: safety-gated arbitrage automation pipeline.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod storage;
pub mod quotes;
pub mod safety;
pub mod strategy;
pub mod engine;
pub mod api;
