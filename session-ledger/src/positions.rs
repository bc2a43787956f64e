//! Net position calculation
//!
//! # Formula
//!
//! ```text
//! NetPosition = (CurrentChips + CashOuts) - BuyIns
//! ```
//!
//! Voided transactions are skipped, removed players are skipped, and the
//! output is ordered by player id so identical snapshots always yield the
//! same position list.

use crate::{
    config::Config,
    source::SessionSource,
    types::*,
    Error, Result,
};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Derives player positions from session history
pub struct PositionCalculator {
    /// Backing source
    source: Arc<dyn SessionSource>,

    /// Budget per source read
    read_timeout: Duration,
}

impl std::fmt::Debug for PositionCalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionCalculator")
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

impl PositionCalculator {
    /// Create new calculator
    pub fn new(source: Arc<dyn SessionSource>, config: &Config) -> Self {
        Self {
            source,
            read_timeout: config.read_timeout(),
        }
    }

    /// Read the whole session under the read budget
    pub async fn snapshot(&self, session_id: &SessionId) -> Result<SessionSnapshot> {
        if session_id.as_str().trim().is_empty() {
            return Err(Error::InvalidInput("Session id must not be empty".to_string()));
        }

        let session = self
            .bounded("get_session", self.source.get_session(session_id))
            .await?;
        let players = self
            .bounded("get_players", self.source.get_players(session_id))
            .await?;
        let transactions = self
            .bounded(
                "get_transaction_history",
                self.source.get_transaction_history(session_id),
            )
            .await?;

        Ok(SessionSnapshot {
            session,
            players,
            transactions,
        })
    }

    /// Positions of every active player, ordered by player id
    pub async fn calculate_positions(&self, session_id: &SessionId) -> Result<Vec<PlayerPosition>> {
        let snapshot = self.snapshot(session_id).await?;
        let positions = compute_positions(&snapshot.players, &snapshot.transactions)
            .map_err(|e| with_session(e, session_id))?;

        tracing::debug!(
            "Calculated {} positions for session {}",
            positions.len(),
            session_id
        );

        Ok(positions)
    }

    /// Position of a single active player
    pub async fn player_position(
        &self,
        session_id: &SessionId,
        player_id: &PlayerId,
    ) -> Result<PlayerPosition> {
        self.calculate_positions(session_id)
            .await?
            .into_iter()
            .find(|p| &p.player_id == player_id)
            .ok_or_else(|| Error::PlayerNotFound {
                session_id: session_id.clone(),
                player_id: player_id.clone(),
            })
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        read: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.read_timeout, read).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "Source read {} exceeded {}ms",
                    operation,
                    self.read_timeout.as_millis()
                );
                Err(Error::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: self.read_timeout.as_millis() as u64,
                })
            }
        }
    }
}

/// Compute positions from a player list and transaction history.
///
/// Only active players get a position. A non-voided transaction that
/// references a player not in the list fails with `PlayerNotFound`.
pub fn compute_positions(
    players: &[Player],
    transactions: &[Transaction],
) -> Result<Vec<PlayerPosition>> {
    // (buy_ins, cash_outs) per player
    let mut totals: BTreeMap<&PlayerId, (Decimal, Decimal)> = players
        .iter()
        .map(|p| (&p.player_id, (Decimal::ZERO, Decimal::ZERO)))
        .collect();

    for tx in transactions.iter().filter(|t| !t.is_voided) {
        if tx.amount <= Decimal::ZERO {
            return Err(Error::InvalidInput(format!(
                "Transaction {} has non-positive amount {}",
                tx.id, tx.amount
            )));
        }

        let entry = totals.get_mut(&tx.player_id).ok_or_else(|| Error::PlayerNotFound {
            session_id: SessionId::new(""),
            player_id: tx.player_id.clone(),
        })?;

        match tx.kind {
            TransactionKind::BuyIn => entry.0 += tx.amount,
            TransactionKind::CashOut => entry.1 += tx.amount,
        }
    }

    let mut positions: Vec<PlayerPosition> = players
        .iter()
        .filter(|p| p.is_active)
        .map(|p| {
            let (buy_ins, cash_outs) = totals
                .get(&p.player_id)
                .copied()
                .unwrap_or((Decimal::ZERO, Decimal::ZERO));
            PlayerPosition::new(
                p.player_id.clone(),
                p.name.clone(),
                buy_ins,
                cash_outs,
                p.current_chips,
            )
        })
        .collect();

    positions.sort_by(|a, b| a.player_id.cmp(&b.player_id));
    Ok(positions)
}

/// Σ net positions
pub fn net_sum(positions: &[PlayerPosition]) -> Decimal {
    positions.iter().map(|p| p.net_position).sum()
}

fn with_session(error: Error, session_id: &SessionId) -> Error {
    match error {
        Error::PlayerNotFound { player_id, .. } => Error::PlayerNotFound {
            session_id: session_id.clone(),
            player_id,
        },
        other => other,
    }
}
