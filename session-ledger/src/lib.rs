//! Session Ledger
//!
//! Read-side model of a pooled-stake game session: players, buy-in and
//! cash-out transactions, and the net positions derived from them.
//!
//! # Architecture
//!
//! - **Snapshot Reads**: All state comes from an external [`SessionSource`]
//! - **Derived Positions**: Net positions are recomputed on demand, never stored
//! - **Bounded Reads**: Every source call runs under a timeout
//!
//! # Invariants
//!
//! - Voided transactions never contribute to any total
//! - Σ(net positions) over active players == 0 within tolerance when chips are conserved
//! - Same snapshot → same positions (deterministic ordering by player id)

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod source;
pub mod positions;
pub mod balance;
pub mod error;
pub mod config;

// Re-exports
pub use error::{Error, Result};
pub use types::{
    BankBalance, Player, PlayerId, PlayerPosition, Session, SessionId, SessionSnapshot,
    SessionStatus, Transaction, TransactionKind,
};
pub use source::{InMemorySessionSource, SessionSource};
pub use positions::{compute_positions, net_sum, PositionCalculator};
pub use balance::{bank_balance, BalanceVerifier};
pub use config::Config;
