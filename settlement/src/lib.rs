//! Settlement Core
//!
//! Turns the net positions of a pooled-stake game session into a short,
//! verifiable list of payments.
//!
//! # Architecture
//!
//! A settlement request runs through four stages:
//!
//! 1. **Positions**: Read players and transactions, derive net positions
//! 2. **Optimization**: Build a payment plan with the requested algorithm
//! 3. **Validation**: Re-check the plan against live positions and the bank
//! 4. **Proof**: Record a signed, exportable proof of the plan
//!
//! Manual chip adjustments feed the [`WarningMonitor`], whose critical
//! warnings block settlement until resolved.
//!
//! # Optimization
//!
//! All algorithms work in integer cents:
//! - **Direct**: every debtor pays every creditor proportionally
//! - **Greedy**: largest debtor pays largest creditor
//! - **Hub-based**: everyone settles through the largest creditor
//! - **Balanced flow**: spreads payments evenly across players
//! - **Minimal transactions**: exhaustive zero-sum grouping for small tables
//!
//! # Example
//!
//! ```no_run
//! use settlement::{Config, SettlementEngine, SessionId};
//! use session_ledger::InMemorySessionSource;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> settlement::Result<()> {
//!     let source = Arc::new(InMemorySessionSource::new());
//!     let engine = SettlementEngine::new(source, Config::default())?;
//!
//!     let report = engine.settle_session(&SessionId::new("friday"), None).await?;
//!     println!("{} payments instead of {}",
//!              report.result.optimized_payments.len(),
//!              report.result.direct_payments.len());
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod precision;
pub mod optimizer;
pub mod validator;
pub mod cache;
pub mod crypto;
pub mod proof;
pub mod monitor;
pub mod metrics;
pub mod error;
pub mod config;
pub mod engine;

// Re-exports
pub use error::{Error, ErrorKind, ErrorSeverity, Result};
pub use types::*;
pub use config::Config;
pub use optimizer::{Algorithm, DebtOptimizer};
pub use validator::{SettlementValidation, SettlementValidator, ValidationCode};
pub use proof::{ExportFormat, MathematicalProof, ProofGenerator, ProofVerification};
pub use monitor::{AdjustmentKind, AdjustmentRequest, Resolution, Warning, WarningMonitor, WarningSeverity};
pub use metrics::Metrics;
pub use engine::{SettlementEngine, SettlementReport};
