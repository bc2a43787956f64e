//! Session data source
//!
//! The persistence layer lives outside this crate. Everything the core
//! reads goes through [`SessionSource`]; [`InMemorySessionSource`] backs
//! tests and the command line tool.

use crate::types::{Player, PlayerId, Session, SessionId, SessionSnapshot, Transaction};
use crate::{Error, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Read access to session data
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// Session record
    async fn get_session(&self, session_id: &SessionId) -> Result<Session>;

    /// Players of a session (active and removed)
    async fn get_players(&self, session_id: &SessionId) -> Result<Vec<Player>>;

    /// Full transaction history, voided entries included
    async fn get_transaction_history(&self, session_id: &SessionId) -> Result<Vec<Transaction>>;
}

/// In-memory session source
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionSource {
    sessions: Arc<RwLock<HashMap<SessionId, SessionSnapshot>>>,
    latency: Option<Duration>,
}

impl InMemorySessionSource {
    /// Create empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every read (simulates a slow backing store)
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Insert or replace a whole session
    pub async fn insert_snapshot(&self, snapshot: SessionSnapshot) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(snapshot.session.session_id.clone(), snapshot);
    }

    /// Append a transaction
    pub async fn record_transaction(
        &self,
        session_id: &SessionId,
        transaction: Transaction,
    ) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let snapshot = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.clone()))?;
        snapshot.transactions.push(transaction);
        Ok(())
    }

    /// Mark a transaction voided
    pub async fn void_transaction(&self, session_id: &SessionId, transaction_id: Uuid) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let snapshot = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.clone()))?;

        let transaction = snapshot
            .transactions
            .iter_mut()
            .find(|t| t.id == transaction_id)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown transaction {}", transaction_id)))?;
        transaction.is_voided = true;
        Ok(())
    }

    /// Overwrite a player's chip count
    pub async fn set_chips(
        &self,
        session_id: &SessionId,
        player_id: &PlayerId,
        chips: Decimal,
    ) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let snapshot = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.clone()))?;

        let player = snapshot
            .players
            .iter_mut()
            .find(|p| &p.player_id == player_id)
            .ok_or_else(|| Error::PlayerNotFound {
                session_id: session_id.clone(),
                player_id: player_id.clone(),
            })?;
        player.current_chips = chips;
        Ok(())
    }

    async fn snapshot(&self, session_id: &SessionId) -> Result<SessionSnapshot> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(session_id.clone()))
    }
}

#[async_trait]
impl SessionSource for InMemorySessionSource {
    async fn get_session(&self, session_id: &SessionId) -> Result<Session> {
        Ok(self.snapshot(session_id).await?.session)
    }

    async fn get_players(&self, session_id: &SessionId) -> Result<Vec<Player>> {
        Ok(self.snapshot(session_id).await?.players)
    }

    async fn get_transaction_history(&self, session_id: &SessionId) -> Result<Vec<Transaction>> {
        Ok(self.snapshot(session_id).await?.transactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionStatus;
    use chrono::Utc;

    fn snapshot(id: &str) -> SessionSnapshot {
        SessionSnapshot {
            session: Session {
                session_id: SessionId::new(id),
                name: "Friday game".to_string(),
                status: SessionStatus::Active,
                created_at: Utc::now(),
            },
            players: vec![Player::new("alice", "Alice", Decimal::from(100))],
            transactions: vec![Transaction::buy_in("alice", Decimal::from(100))],
        }
    }

    #[tokio::test]
    async fn test_missing_session() {
        let source = InMemorySessionSource::new();
        let result = source.get_session(&SessionId::new("nope")).await;
        assert!(matches!(result, Err(Error::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_void_transaction() {
        let source = InMemorySessionSource::new();
        let snap = snapshot("s1");
        let tx_id = snap.transactions[0].id;
        source.insert_snapshot(snap).await;

        let session_id = SessionId::new("s1");
        source.void_transaction(&session_id, tx_id).await.unwrap();

        let history = source.get_transaction_history(&session_id).await.unwrap();
        assert!(history[0].is_voided);
    }

    #[tokio::test]
    async fn test_set_chips_unknown_player() {
        let source = InMemorySessionSource::new();
        source.insert_snapshot(snapshot("s1")).await;

        let result = source
            .set_chips(&SessionId::new("s1"), &PlayerId::new("zed"), Decimal::ONE)
            .await;
        assert!(matches!(result, Err(Error::PlayerNotFound { .. })));
    }
}
