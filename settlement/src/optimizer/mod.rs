//! Debt optimization
//!
//! Turns signed net positions into a payment plan at cent precision.
//!
//! # Algorithms
//!
//! | Algorithm | Payments | Notes |
//! |---|---|---|
//! | Direct | ≤ debtors × creditors | proportional baseline |
//! | Greedy | ≤ n - 1 | largest creditor ↔ largest debtor, O(n log n) |
//! | HubBased | debtors + creditors - 1 | everything flows through the largest creditor |
//! | BalancedFlow | ≤ n - 1 | spreads payment count across players |
//! | MinimalTransactions | n - (zero-sum groups) | exact for small n, else Greedy |
//!
//! # Example
//!
//! ```text
//! Positions:  Alice +80  Bob +50  Charlie -80  Diana -50
//!
//! Direct:     Charlie→Alice 49.23  Charlie→Bob 30.77
//!             Diana→Alice 30.77    Diana→Bob 19.23      (4 payments)
//! Greedy:     Charlie→Alice 80.00  Diana→Bob 50.00      (2 payments, 50% reduction)
//! ```

mod balanced;
mod direct;
mod greedy;
mod hub;
mod minimal;

use crate::{
    config::OptimizerConfig,
    crypto,
    metrics::Metrics,
    precision::{from_cents, PrecisionTracker, CENT},
    types::*,
    Error, Result,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Settlement algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// One payment per debtor/creditor pairing (baseline)
    Direct,
    /// Largest creditor matched with largest debtor
    Greedy,
    /// All money routed through the largest creditor
    HubBased,
    /// Payment count spread evenly across players
    BalancedFlow,
    /// Exhaustive minimum transfer count (small sessions)
    MinimalTransactions,
}

impl Algorithm {
    /// Every algorithm
    pub const ALL: [Algorithm; 5] = [
        Algorithm::Direct,
        Algorithm::Greedy,
        Algorithm::HubBased,
        Algorithm::BalancedFlow,
        Algorithm::MinimalTransactions,
    ];

    /// Stable name
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Direct => "direct",
            Algorithm::Greedy => "greedy",
            Algorithm::HubBased => "hub_based",
            Algorithm::BalancedFlow => "balanced_flow",
            Algorithm::MinimalTransactions => "minimal_transactions",
        }
    }

    /// Compute a plan for the given balances
    pub fn compute_plan(&self, balances: &[Balance], ctx: &PlanContext) -> Result<Plan> {
        match self {
            Algorithm::Direct => Ok(Plan::new(direct::plan(balances))),
            Algorithm::Greedy => greedy::plan(balances, &ctx.deadline).map(Plan::new),
            Algorithm::HubBased => hub::plan(balances, &ctx.deadline).map(Plan::new),
            Algorithm::BalancedFlow => balanced::plan(balances, &ctx.deadline).map(Plan::new),
            Algorithm::MinimalTransactions => {
                minimal::plan(balances, &ctx.deadline, ctx.exhaustive_player_limit)
            }
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Algorithm::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown algorithm '{}'", s)))
    }
}

/// Signed balance of one player in cents (positive = owed money)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balance {
    /// Player
    pub player_id: PlayerId,
    /// Signed cents
    pub cents: i64,
}

impl Balance {
    /// Create balance
    pub fn new(player_id: impl Into<String>, cents: i64) -> Self {
        Self {
            player_id: PlayerId::new(player_id),
            cents,
        }
    }
}

/// Raw transfer produced by an algorithm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    /// Payer
    pub from: PlayerId,
    /// Payee
    pub to: PlayerId,
    /// Amount in cents (> 0)
    pub cents: i64,
}

/// Algorithm output
#[derive(Debug, Clone)]
pub struct Plan {
    /// Transfers
    pub transfers: Vec<Transfer>,
    /// Set when the algorithm delegated to another one
    pub fallback: Option<(Algorithm, String)>,
}

impl Plan {
    fn new(transfers: Vec<Transfer>) -> Self {
        Self {
            transfers,
            fallback: None,
        }
    }
}

/// Cooperative time budget
#[derive(Debug, Clone)]
pub struct Deadline {
    started: Instant,
    at: Option<Instant>,
}

impl Deadline {
    /// Deadline `budget` from now
    pub fn after(budget: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            at: Some(started + budget),
        }
    }

    /// No deadline
    pub fn unbounded() -> Self {
        Self {
            started: Instant::now(),
            at: None,
        }
    }

    /// Fail with a timeout once the budget is spent
    pub fn check(&self, operation: &str) -> Result<()> {
        match self.at {
            Some(at) if Instant::now() >= at => Err(Error::Timeout {
                operation: operation.to_string(),
                elapsed_ms: self.started.elapsed().as_millis() as u64,
            }),
            _ => Ok(()),
        }
    }
}

/// Inputs shared by every algorithm
#[derive(Debug, Clone)]
pub struct PlanContext {
    /// Time budget
    pub deadline: Deadline,
    /// Exhaustive search bound
    pub exhaustive_player_limit: usize,
}

impl PlanContext {
    /// Context without a time budget
    pub fn unbounded(exhaustive_player_limit: usize) -> Self {
        Self {
            deadline: Deadline::unbounded(),
            exhaustive_player_limit,
        }
    }
}

/// Split balances into (debtors, creditors) with positive amounts, ordered by player id
pub(crate) fn split_sides(balances: &[Balance]) -> (Vec<(PlayerId, i64)>, Vec<(PlayerId, i64)>) {
    let mut debtors: Vec<(PlayerId, i64)> = balances
        .iter()
        .filter(|b| b.cents < 0)
        .map(|b| (b.player_id.clone(), -b.cents))
        .collect();
    let mut creditors: Vec<(PlayerId, i64)> = balances
        .iter()
        .filter(|b| b.cents > 0)
        .map(|b| (b.player_id.clone(), b.cents))
        .collect();
    debtors.sort_by(|a, b| a.0.cmp(&b.0));
    creditors.sort_by(|a, b| a.0.cmp(&b.0));
    (debtors, creditors)
}

/// Debt optimizer
pub struct DebtOptimizer {
    metrics: Option<Arc<Metrics>>,
}

impl fmt::Debug for DebtOptimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebtOptimizer")
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

impl Default for DebtOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl DebtOptimizer {
    /// Create optimizer
    pub fn new() -> Self {
        Self { metrics: None }
    }

    /// Create optimizer that records metrics
    pub fn with_metrics(metrics: Arc<Metrics>) -> Self {
        Self {
            metrics: Some(metrics),
        }
    }

    /// Optimize a set of positions
    ///
    /// Fails with `UnbalancedSettlement` when the positions do not sum to
    /// zero within tolerance. A spent time budget never fails the call: the
    /// direct plan is returned and the fallback recorded.
    pub fn optimize(
        &self,
        config: &OptimizerConfig,
        session_id: &SessionId,
        positions: &[PlayerPosition],
        algorithm: Option<Algorithm>,
    ) -> Result<OptimizationResult> {
        let started = Instant::now();
        let algorithm = algorithm.unwrap_or(config.default_algorithm);

        check_input(session_id, positions)?;
        let (balances, _tracker) = to_balances(positions)?;
        check_balanced(positions, config.tolerance)?;

        let direct = direct::plan(&balances);

        let ctx = PlanContext {
            deadline: Deadline::after(config.time_budget()),
            exhaustive_player_limit: config.exhaustive_player_limit,
        };

        let mut validation_errors = Vec::new();
        let mut fallback = None;

        let mut optimized = match algorithm.compute_plan(&balances, &ctx) {
            Ok(plan) => {
                if let Some((used, reason)) = plan.fallback {
                    tracing::info!("{} delegated to {}: {}", algorithm, used, reason);
                    validation_errors.push(format!("Fallback to {}: {}", used, reason));
                    fallback = Some(OptimizationFallback {
                        requested: algorithm,
                        used,
                        reason,
                        timed_out: false,
                    });
                }
                plan.transfers
            }
            Err(Error::Timeout { elapsed_ms, .. }) => {
                let reason = format!(
                    "{} exceeded time budget of {}ms after {}ms",
                    algorithm, config.time_budget_ms, elapsed_ms
                );
                tracing::warn!("Session {}: {}, using direct settlement", session_id, reason);
                if let Some(metrics) = &self.metrics {
                    metrics.record_optimizer_fallback();
                }
                validation_errors.push(format!("Fallback to direct: {}", reason));
                fallback = Some(OptimizationFallback {
                    requested: algorithm,
                    used: Algorithm::Direct,
                    reason,
                    timed_out: true,
                });
                direct.clone()
            }
            Err(e) => return Err(e),
        };

        if optimized.len() > direct.len() {
            let reason = format!(
                "{} produced {} payments, more than the {} of direct settlement",
                algorithm,
                optimized.len(),
                direct.len()
            );
            tracing::debug!("Session {}: {}", session_id, reason);
            validation_errors.push(format!("Fallback to direct: {}", reason));
            fallback = Some(OptimizationFallback {
                requested: algorithm,
                used: Algorithm::Direct,
                reason,
                timed_out: false,
            });
            optimized = direct.clone();
        }

        let optimized_payments = to_payments(optimized);
        let direct_payments = to_payments(direct);

        let balance_proof = balance_proof(positions, &optimized_payments, config.tolerance);
        if !balance_proof.is_balanced {
            validation_errors.push(format!(
                "Plan leaves positions unsettled (net balance {})",
                balance_proof.net_balance
            ));
        }

        let original_count = direct_payments.len();
        let optimized_count = optimized_payments.len();
        let reduction_percentage = if original_count == 0 {
            0.0
        } else {
            (original_count - optimized_count) as f64 / original_count as f64 * 100.0
        };

        let processing_time = started.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.record_optimization(processing_time.as_secs_f64());
        }

        let result = OptimizationResult {
            session_id: session_id.clone(),
            algorithm,
            positions: sorted_positions(positions),
            metrics: OptimizationMetrics {
                original_count,
                optimized_count,
                reduction_percentage,
                total_settled: settled_total(&optimized_payments),
                processing_time_ms: processing_time.as_millis() as u64,
            },
            is_valid: balance_proof.is_balanced,
            optimized_payments,
            direct_payments,
            validation_errors,
            balance_proof,
            fallback,
            data_fingerprint: positions_fingerprint(positions)?,
            config_version: 0,
            created_at: Utc::now(),
        };

        tracing::info!(
            "Optimized session {} with {}: {} → {} payments ({:.1}% reduction, {} settled)",
            session_id,
            result.algorithm_used(),
            result.metrics.original_count,
            result.metrics.optimized_count,
            result.metrics.reduction_percentage,
            result.metrics.total_settled
        );

        Ok(result)
    }
}

/// SHA-256 fingerprint of a position set (order independent)
pub fn positions_fingerprint(positions: &[PlayerPosition]) -> Result<String> {
    crypto::fingerprint(&sorted_positions(positions))
}

/// Embedded balance proof for a plan
pub fn balance_proof(
    positions: &[PlayerPosition],
    payments: &[Payment],
    tolerance: Decimal,
) -> BalanceProof {
    let total_debits: Decimal = positions
        .iter()
        .filter(|p| p.is_debtor())
        .map(|p| -p.net_position)
        .sum();
    let total_credits: Decimal = positions
        .iter()
        .filter(|p| p.is_creditor())
        .map(|p| p.net_position)
        .sum();
    let net_balance = total_credits - total_debits;

    let settled = residuals(positions, payments)
        .values()
        .all(|r| r.abs() <= tolerance);

    BalanceProof {
        total_debits,
        total_credits,
        net_balance,
        is_balanced: net_balance.abs() <= tolerance && settled,
        precision: CENT,
        timestamp: Utc::now(),
    }
}

/// Convert positions to cent balances, recording rounding
pub fn to_balances(positions: &[PlayerPosition]) -> Result<(Vec<Balance>, PrecisionTracker)> {
    let mut tracker = PrecisionTracker::new();
    let mut balances = Vec::with_capacity(positions.len());
    for position in positions {
        let cents = tracker.to_cents(
            format!("position:{}", position.player_id),
            position.net_position,
        )?;
        balances.push(Balance {
            player_id: position.player_id.clone(),
            cents,
        });
    }
    balances.sort_by(|a, b| a.player_id.cmp(&b.player_id));
    Ok((balances, tracker))
}

/// Turn transfers into prioritized payments.
///
/// Larger amounts first; ties by payer then payee id.
pub fn to_payments(transfers: Vec<Transfer>) -> Vec<Payment> {
    let mut transfers: Vec<Transfer> = transfers.into_iter().filter(|t| t.cents > 0).collect();
    transfers.sort_by(|a, b| {
        b.cents
            .cmp(&a.cents)
            .then_with(|| a.from.cmp(&b.from))
            .then_with(|| a.to.cmp(&b.to))
    });

    transfers
        .into_iter()
        .enumerate()
        .map(|(index, t)| Payment {
            from_player: t.from,
            to_player: t.to,
            amount: from_cents(t.cents),
            priority: index as u32 + 1,
        })
        .collect()
}

fn sorted_positions(positions: &[PlayerPosition]) -> Vec<PlayerPosition> {
    let mut sorted = positions.to_vec();
    sorted.sort_by(|a, b| a.player_id.cmp(&b.player_id));
    sorted
}

fn check_input(session_id: &SessionId, positions: &[PlayerPosition]) -> Result<()> {
    if session_id.as_str().trim().is_empty() {
        return Err(Error::InvalidInput("Session id must not be empty".to_string()));
    }

    let mut seen = HashSet::with_capacity(positions.len());
    for position in positions {
        if position.player_id.as_str().trim().is_empty() {
            return Err(Error::InvalidInput("Player id must not be empty".to_string()));
        }
        if !seen.insert(&position.player_id) {
            return Err(Error::InvalidInput(format!(
                "Duplicate position for player {}",
                position.player_id
            )));
        }
    }
    Ok(())
}

fn check_balanced(positions: &[PlayerPosition], tolerance: Decimal) -> Result<()> {
    let net: Decimal = positions.iter().map(|p| p.net_position).sum();
    let rounded: Decimal = positions
        .iter()
        .map(|p| crate::precision::round_cents(p.net_position))
        .sum();

    for total in [net, rounded] {
        if total.abs() > tolerance {
            tracing::warn!("Rejecting unbalanced settlement: Σ positions = {}", total);
            return Err(Error::UnbalancedSettlement { net: total, tolerance });
        }
    }
    Ok(())
}
