//! Core types for the session ledger
//!
//! All types are designed for:
//! - Deterministic ordering (ids are `Ord`, positions sorted by player)
//! - Exact arithmetic (Decimal for money)
//! - Snapshot semantics (plain data, cheap to clone)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Create new session ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Player identifier
///
/// Ordering is used as the deterministic tie-break everywhere a choice
/// between equal amounts has to be made.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(String);

impl PlayerId {
    /// Create new player ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Game in progress
    Active,
    /// Play finished, settlement pending
    Completed,
    /// Books closed
    Settled,
}

/// Session record as supplied by the persistence layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session ID
    pub session_id: SessionId,

    /// Display name
    pub name: String,

    /// Status
    pub status: SessionStatus,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// Player record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    /// Player ID
    pub player_id: PlayerId,

    /// Display name
    pub name: String,

    /// Chips currently in front of the player
    pub current_chips: Decimal,

    /// Removed players are excluded from every calculation
    pub is_active: bool,
}

impl Player {
    /// Create an active player
    pub fn new(player_id: impl Into<String>, name: impl Into<String>, current_chips: Decimal) -> Self {
        Self {
            player_id: PlayerId::new(player_id),
            name: name.into(),
            current_chips,
            is_active: true,
        }
    }
}

/// Transaction kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Money in, chips out of the bank
    BuyIn,
    /// Chips in, money out of the bank
    CashOut,
}

/// Transaction history entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction ID
    pub id: Uuid,

    /// Player the transaction belongs to
    pub player_id: PlayerId,

    /// Kind
    pub kind: TransactionKind,

    /// Amount (always positive)
    pub amount: Decimal,

    /// Recorded timestamp
    pub timestamp: DateTime<Utc>,

    /// Voided transactions are excluded from every calculation
    #[serde(default)]
    pub is_voided: bool,
}

impl Transaction {
    /// Create a buy-in
    pub fn buy_in(player_id: impl Into<String>, amount: Decimal) -> Self {
        Self::new(player_id, TransactionKind::BuyIn, amount)
    }

    /// Create a cash-out
    pub fn cash_out(player_id: impl Into<String>, amount: Decimal) -> Self {
        Self::new(player_id, TransactionKind::CashOut, amount)
    }

    fn new(player_id: impl Into<String>, kind: TransactionKind, amount: Decimal) -> Self {
        Self {
            id: Uuid::now_v7(),
            player_id: PlayerId::new(player_id),
            kind,
            amount,
            timestamp: Utc::now(),
            is_voided: false,
        }
    }
}

/// Player net position (derived, never persisted)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerPosition {
    /// Player ID
    pub player_id: PlayerId,

    /// Display name
    pub name: String,

    /// Total bought in
    pub buy_ins: Decimal,

    /// Total cashed out
    pub cash_outs: Decimal,

    /// Chips on the table
    pub current_chips: Decimal,

    /// (current_chips + cash_outs) - buy_ins
    /// Positive = owed money, negative = owes money
    pub net_position: Decimal,
}

impl PlayerPosition {
    /// Create position, deriving the net position
    pub fn new(
        player_id: PlayerId,
        name: impl Into<String>,
        buy_ins: Decimal,
        cash_outs: Decimal,
        current_chips: Decimal,
    ) -> Self {
        Self {
            player_id,
            name: name.into(),
            buy_ins,
            cash_outs,
            current_chips,
            net_position: (current_chips + cash_outs) - buy_ins,
        }
    }

    /// Build a position that carries only a net amount.
    ///
    /// Debtors are modelled as an unreturned buy-in, creditors as chips on
    /// the table, so the bank balance of such a set equals what is owed.
    pub fn from_net(player_id: impl Into<String>, name: impl Into<String>, net: Decimal) -> Self {
        let (buy_ins, chips) = if net < Decimal::ZERO {
            (-net, Decimal::ZERO)
        } else {
            (Decimal::ZERO, net)
        };
        Self::new(PlayerId::new(player_id), name, buy_ins, Decimal::ZERO, chips)
    }

    /// Recompute the net position from the components
    pub fn recomputed_net(&self) -> Decimal {
        (self.current_chips + self.cash_outs) - self.buy_ins
    }

    /// Owes money
    pub fn is_debtor(&self) -> bool {
        self.net_position < Decimal::ZERO
    }

    /// Is owed money
    pub fn is_creditor(&self) -> bool {
        self.net_position > Decimal::ZERO
    }
}

/// Everything the core reads about one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session record
    pub session: Session,

    /// All players (active and removed)
    pub players: Vec<Player>,

    /// Full transaction history (voided entries included)
    pub transactions: Vec<Transaction>,
}

/// Aggregate bank balance for a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankBalance {
    /// Session ID
    pub session_id: SessionId,

    /// Σ buy-ins (non-voided)
    pub total_buy_ins: Decimal,

    /// Σ cash-outs (non-voided)
    pub total_cash_outs: Decimal,

    /// Σ current chips of active players
    pub chips_in_play: Decimal,

    /// total_buy_ins - total_cash_outs
    pub bank_balance: Decimal,

    /// total_buy_ins - (chips_in_play + total_cash_outs)
    pub discrepancy: Decimal,

    /// |discrepancy| <= tolerance
    pub is_balanced: bool,

    /// Tolerance applied
    pub tolerance: Decimal,

    /// Calculation timestamp
    pub calculated_at: DateTime<Utc>,
}
