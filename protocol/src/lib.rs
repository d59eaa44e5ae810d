//! Trove CDP core
//!
//! Collateralized debt positions ("troves") backed by a single collateral
//! asset, with a stability pool that absorbs liquidated debt and a
//! redistribution ledger that spreads the rest over the remaining troves.
//!
//! ## Architecture
//!
//! - **FixedPointMath** (`math`): 18-decimal arithmetic with 512-bit intermediates
//! - **SortedTroves**: troves ordered by nominal collateral ratio, with hinted insertion
//! - **RedistributionLedger**: cumulative per-stake rewards with error carry
//! - **StabilityPool**: Product-Sum deposits with epoch and scale rollover
//! - **TroveManager**: trove records, stakes and pool balances
//! - **LiquidationEngine**: offset against the pool, redistribute the rest
//! - **RedemptionEngine**: stablecoin for collateral at face value
//! - **Fees**: decaying base rate behind borrowing and redemption fees
//!
//! When the total collateral ratio falls below the CCR the system is in
//! recovery mode: borrowing is restricted and troves below the TCR can be
//! liquidated against the stability pool.
//!
//! All state lives in [`CdpSystem`]. Tokens and prices stay outside it and
//! are passed into every state-changing call through [`Externals`].

// Re-export odra for downstream usage
pub use odra;

// Core module declarations
pub mod errors;
pub mod math;
pub mod types;
pub mod config;
pub mod interfaces;

// Data structures
pub mod sorted_troves;
pub mod redistribution;
pub mod stability_pool;
pub mod pools;
pub mod trove_manager;
pub mod hints;
pub mod fees;

// Operations
pub mod system;
pub mod borrower_operations;
pub mod liquidation_engine;
pub mod redemption_engine;

pub use config::ProtocolConfig;
pub use errors::{CdpError, CdpResult, ErrorKind};
pub use fees::BaseRate;
pub use interfaces::{BalanceLedger, Externals, FixedPriceFeed, PriceFeed, TokenLedger};
pub use liquidation_engine::{HaltReason, LiquidationStats, LiquidationSummary, LiquidationValues};
pub use redemption_engine::{RedemptionStats, RedemptionTotals};
pub use system::{AuditReport, CdpSystem};
pub use types::{AdjustTroveParams, InsertHints, SystemAccounts, Trove, TroveStatus};
