//! Core types for the settlement core

use crate::optimizer::Algorithm;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use session_ledger::{PlayerId, PlayerPosition, SessionId};

/// One payer → payee transfer of a payment plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Player who pays
    pub from_player: PlayerId,

    /// Player who receives
    pub to_player: PlayerId,

    /// Amount (> 0, cent precision)
    pub amount: Decimal,

    /// 1 = settle first (largest amount)
    pub priority: u32,
}

/// Optimization metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationMetrics {
    /// Payments in the direct (baseline) plan
    pub original_count: usize,

    /// Payments in the optimized plan
    pub optimized_count: usize,

    /// (original - optimized) / original * 100
    pub reduction_percentage: f64,

    /// Net value moved from debtors to creditors
    pub total_settled: Decimal,

    /// Wall time spent optimizing
    pub processing_time_ms: u64,
}

/// Balance proof embedded in every optimization result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceProof {
    /// Σ owed by net debtors
    pub total_debits: Decimal,

    /// Σ due to net creditors
    pub total_credits: Decimal,

    /// total_credits - total_debits
    pub net_balance: Decimal,

    /// Net balance within precision and the plan leaves no residual
    pub is_balanced: bool,

    /// Precision the proof was checked at
    pub precision: Decimal,

    /// When the proof was computed
    pub timestamp: DateTime<Utc>,
}

/// Recorded when the requested algorithm could not be used
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationFallback {
    /// Algorithm the caller asked for
    pub requested: Algorithm,

    /// Algorithm that produced the plan
    pub used: Algorithm,

    /// Why
    pub reason: String,

    /// Caused by the time budget rather than by the data
    #[serde(default)]
    pub timed_out: bool,
}

/// Result of one optimization request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    /// Session settled
    pub session_id: SessionId,

    /// Algorithm requested
    pub algorithm: Algorithm,

    /// Positions the plan was built from
    pub positions: Vec<PlayerPosition>,

    /// Optimized plan, in priority order
    pub optimized_payments: Vec<Payment>,

    /// Naive baseline plan, in priority order
    pub direct_payments: Vec<Payment>,

    /// Metrics
    pub metrics: OptimizationMetrics,

    /// Plan is mathematically correct for the positions
    pub is_valid: bool,

    /// Problems and fallbacks encountered
    pub validation_errors: Vec<String>,

    /// Embedded balance proof
    pub balance_proof: BalanceProof,

    /// Set when another algorithm produced the plan
    pub fallback: Option<OptimizationFallback>,

    /// SHA-256 over the input positions
    pub data_fingerprint: String,

    /// Configuration version used
    pub config_version: u32,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl OptimizationResult {
    /// Algorithm that actually produced the optimized plan
    pub fn algorithm_used(&self) -> Algorithm {
        self.fallback
            .as_ref()
            .map(|f| f.used)
            .unwrap_or(self.algorithm)
    }

    /// Display name of a player, falling back to the id
    pub fn player_name<'a>(&'a self, player_id: &'a PlayerId) -> &'a str {
        self.positions
            .iter()
            .find(|p| &p.player_id == player_id)
            .map(|p| p.name.as_str())
            .unwrap_or_else(|| player_id.as_str())
    }
}

/// Net flow per player: received - paid
pub fn net_flows(payments: &[Payment]) -> BTreeMap<PlayerId, Decimal> {
    let mut flows: BTreeMap<PlayerId, Decimal> = BTreeMap::new();
    for payment in payments {
        *flows.entry(payment.from_player.clone()).or_insert(Decimal::ZERO) -= payment.amount;
        *flows.entry(payment.to_player.clone()).or_insert(Decimal::ZERO) += payment.amount;
    }
    flows
}

/// Net value a plan moves (Σ of positive net flows)
pub fn settled_total(payments: &[Payment]) -> Decimal {
    net_flows(payments)
        .values()
        .filter(|v| v.is_sign_positive())
        .copied()
        .sum()
}

/// Σ payment amounts
pub fn gross_total(payments: &[Payment]) -> Decimal {
    payments.iter().map(|p| p.amount).sum()
}

/// Position left unsettled per player: net_position - (received - paid)
pub fn residuals(positions: &[PlayerPosition], payments: &[Payment]) -> BTreeMap<PlayerId, Decimal> {
    let flows = net_flows(payments);
    let mut residuals: BTreeMap<PlayerId, Decimal> = positions
        .iter()
        .map(|p| {
            let flow = flows.get(&p.player_id).copied().unwrap_or(Decimal::ZERO);
            (p.player_id.clone(), p.net_position - flow)
        })
        .collect();

    // Players paid or charged without holding a position
    for (player_id, flow) in flows {
        residuals.entry(player_id).or_insert(-flow);
    }
    residuals
}
