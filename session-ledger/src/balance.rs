//! Bank balance verification
//!
//! ```text
//! BankBalance = TotalBuyIns - TotalCashOuts          (chips that should be in play)
//! Discrepancy = TotalBuyIns - (ChipsInPlay + TotalCashOuts)
//! ```
//!
//! A discrepancy beyond tolerance is flagged on the result, never corrected.

use crate::{
    config::Config,
    positions::PositionCalculator,
    types::*,
    Result,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Verifies that chips on the table match the money in the bank
#[derive(Debug)]
pub struct BalanceVerifier {
    calculator: Arc<PositionCalculator>,
    tolerance: Decimal,
}

impl BalanceVerifier {
    /// Create new verifier
    pub fn new(calculator: Arc<PositionCalculator>, config: &Config) -> Self {
        Self {
            calculator,
            tolerance: config.tolerance,
        }
    }

    /// Verify the bank balance of a session
    pub async fn verify(&self, session_id: &SessionId) -> Result<BankBalance> {
        let positions = self.calculator.calculate_positions(session_id).await?;
        let balance = bank_balance(session_id, &positions, self.tolerance);

        if balance.is_balanced {
            tracing::debug!(
                "Session {} balanced: bank {} chips {}",
                session_id,
                balance.bank_balance,
                balance.chips_in_play
            );
        } else {
            tracing::warn!(
                "Session {} bank imbalance: discrepancy {} (buy-ins {}, chips {}, cash-outs {})",
                session_id,
                balance.discrepancy,
                balance.total_buy_ins,
                balance.chips_in_play,
                balance.total_cash_outs
            );
        }

        Ok(balance)
    }
}

/// Aggregate bank balance over a set of positions
pub fn bank_balance(
    session_id: &SessionId,
    positions: &[PlayerPosition],
    tolerance: Decimal,
) -> BankBalance {
    let total_buy_ins: Decimal = positions.iter().map(|p| p.buy_ins).sum();
    let total_cash_outs: Decimal = positions.iter().map(|p| p.cash_outs).sum();
    let chips_in_play: Decimal = positions.iter().map(|p| p.current_chips).sum();
    let discrepancy = total_buy_ins - (chips_in_play + total_cash_outs);

    BankBalance {
        session_id: session_id.clone(),
        total_buy_ins,
        total_cash_outs,
        chips_in_play,
        bank_balance: total_buy_ins - total_cash_outs,
        discrepancy,
        is_balanced: discrepancy.abs() <= tolerance,
        tolerance,
        calculated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemorySessionSource;

    fn position(id: &str, buy_ins: i64, cash_outs: i64, chips: i64) -> PlayerPosition {
        PlayerPosition::new(
            PlayerId::new(id),
            id,
            Decimal::from(buy_ins),
            Decimal::from(cash_outs),
            Decimal::from(chips),
        )
    }

    #[test]
    fn test_balanced_session() {
        let positions = vec![position("alice", 100, 40, 90), position("bob", 100, 0, 70)];
        let balance = bank_balance(&SessionId::new("s1"), &positions, Decimal::new(1, 2));

        assert_eq!(balance.total_buy_ins, Decimal::from(200));
        assert_eq!(balance.bank_balance, Decimal::from(160));
        assert_eq!(balance.chips_in_play, Decimal::from(160));
        assert!(balance.is_balanced);
    }

    #[test]
    fn test_imbalance_flagged() {
        // 5 chips appeared out of nowhere
        let positions = vec![position("alice", 100, 0, 105)];
        let balance = bank_balance(&SessionId::new("s1"), &positions, Decimal::new(1, 2));

        assert_eq!(balance.discrepancy, Decimal::from(-5));
        assert!(!balance.is_balanced);
    }

    #[tokio::test]
    async fn test_verify_missing_session() {
        let calculator = Arc::new(PositionCalculator::new(
            Arc::new(InMemorySessionSource::new()),
            &Config::default(),
        ));
        let verifier = BalanceVerifier::new(calculator, &Config::default());

        assert!(verifier.verify(&SessionId::new("none")).await.is_err());
    }
}
