//! Settlement validation
//!
//! Audits any payment plan in six fixed steps:
//!
//! 1. Mathematical balance
//! 2. Player positions
//! 3. Precision
//! 4. Real-time (live positions)
//! 5. Bank balance
//! 6. Summary
//!
//! Every step is recorded with its inputs, so a failed validation can be
//! read back without re-running it. Results are cached by a fingerprint of
//! the plan, its positions, the live positions and the thresholds applied.

use crate::{
    cache::{BoundedCache, CacheStats},
    config::ValidationConfig,
    crypto,
    error::ErrorSeverity,
    metrics::Metrics,
    optimizer,
    precision::has_sub_cent,
    types::*,
    Result,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Typed validation error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    /// Totals or live balances disagree
    BalanceMismatch,
    /// Payment party or player set is wrong
    InvalidPlayerState,
    /// Amount carries a fractional cent
    PrecisionError,
    /// Cumulative rounding loss too large
    RoundingError,
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            ValidationCode::BalanceMismatch => "BALANCE_MISMATCH",
            ValidationCode::InvalidPlayerState => "INVALID_PLAYER_STATE",
            ValidationCode::PrecisionError => "PRECISION_ERROR",
            ValidationCode::RoundingError => "ROUNDING_ERROR",
        };
        write!(f, "{}", code)
    }
}

/// One validation finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Error code
    pub code: ValidationCode,
    /// Severity
    pub severity: ErrorSeverity,
    /// Human-readable message
    pub message: String,
    /// Players involved
    pub affected_players: Vec<PlayerId>,
}

/// Rounding severity of a position set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingSeverity {
    /// No sub-cent input
    None,
    /// Loss within the configured maximum
    Minor,
    /// Loss above the configured maximum
    Major,
}

/// One recorded step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationStep {
    /// 1-based step number
    pub step: u8,
    /// Step name
    pub name: String,
    /// Step outcome
    pub passed: bool,
    /// Values the step looked at
    pub inputs: BTreeMap<String, String>,
    /// What the step found
    pub details: String,
    /// Time spent
    pub duration_us: u64,
}

/// Outcome of validating one plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementValidation {
    /// Validation id
    pub validation_id: Uuid,
    /// Session validated
    pub session_id: SessionId,
    /// False if any step failed
    pub is_valid: bool,
    /// Steps 1-6 in order
    pub steps: Vec<ValidationStep>,
    /// Typed findings
    pub errors: Vec<ValidationIssue>,
    /// Non-blocking notes
    pub warnings: Vec<String>,
    /// Rounding classification
    pub rounding: RoundingSeverity,
    /// Σ |position rounding loss|
    pub cumulative_rounding_loss: Decimal,
    /// Cache key of this validation
    pub fingerprint: String,
    /// When validated
    pub validated_at: DateTime<Utc>,
    /// Total time spent
    pub elapsed_us: u64,
    /// Served from cache
    pub from_cache: bool,
}

impl SettlementValidation {
    /// Findings with a given code
    pub fn errors_with(&self, code: ValidationCode) -> impl Iterator<Item = &ValidationIssue> {
        self.errors.iter().filter(move |e| e.code == code)
    }

    /// Step by number
    pub fn step(&self, step: u8) -> Option<&ValidationStep> {
        self.steps.iter().find(|s| s.step == step)
    }
}

/// Accumulates steps and findings
struct Audit {
    steps: Vec<ValidationStep>,
    errors: Vec<ValidationIssue>,
    warnings: Vec<String>,
}

impl Audit {
    fn new() -> Self {
        Self {
            steps: Vec::with_capacity(6),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn add_error(
        &mut self,
        code: ValidationCode,
        severity: ErrorSeverity,
        message: String,
        affected_players: Vec<PlayerId>,
    ) {
        self.errors.push(ValidationIssue {
            code,
            severity,
            message,
            affected_players,
        });
    }

    /// Run one step; it fails if it added any error
    fn step<F>(&mut self, step: u8, name: &str, check: F)
    where
        F: FnOnce(&mut Self, &mut BTreeMap<String, String>) -> String,
    {
        let started = Instant::now();
        let errors_before = self.errors.len();
        let mut inputs = BTreeMap::new();
        let details = check(self, &mut inputs);
        let passed = self.errors.len() == errors_before;

        tracing::debug!("Validation step {} ({}): passed={}", step, name, passed);
        self.steps.push(ValidationStep {
            step,
            name: name.to_string(),
            passed,
            inputs,
            details,
            duration_us: started.elapsed().as_micros() as u64,
        });
    }
}

#[derive(Serialize)]
struct CacheKey<'a> {
    session_id: &'a SessionId,
    payments: &'a [Payment],
    positions: &'a [PlayerPosition],
    live_positions: Option<&'a [PlayerPosition]>,
    tolerance: Decimal,
    max_rounding_loss: Decimal,
}

/// Settlement validator
#[derive(Debug)]
pub struct SettlementValidator {
    cache: BoundedCache<SettlementValidation>,
    metrics: Option<Arc<Metrics>>,
}

impl SettlementValidator {
    /// Create validator
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            cache: BoundedCache::new(config.cache_capacity),
            metrics: None,
        }
    }

    /// Create validator that records metrics
    pub fn with_metrics(config: &ValidationConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            cache: BoundedCache::new(config.cache_capacity).with_metrics(metrics.clone()),
            metrics: Some(metrics),
        }
    }

    /// Cache counters
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Validate a plan
    ///
    /// `live_positions` are positions re-read after the plan was built; when
    /// absent the real-time step passes with a note.
    pub fn validate(
        &self,
        config: &ValidationConfig,
        result: &OptimizationResult,
        live_positions: Option<&[PlayerPosition]>,
    ) -> Result<SettlementValidation> {
        let fingerprint = crypto::fingerprint(&CacheKey {
            session_id: &result.session_id,
            payments: &result.optimized_payments,
            positions: &result.positions,
            live_positions,
            tolerance: config.tolerance,
            max_rounding_loss: config.max_rounding_loss,
        })?;

        if let Some(mut cached) = self.cache.get(&fingerprint) {
            tracing::debug!("Validation cache hit for session {}", result.session_id);
            cached.from_cache = true;
            return Ok(cached);
        }

        let validation = run(config, result, live_positions, fingerprint.clone())?;

        if let Some(metrics) = &self.metrics {
            metrics.record_validation(validation.is_valid);
        }
        if validation.is_valid {
            tracing::info!(
                "Session {} plan validated ({} payments)",
                result.session_id,
                result.optimized_payments.len()
            );
        } else {
            tracing::warn!(
                "Session {} plan failed validation: {}",
                result.session_id,
                validation
                    .errors
                    .iter()
                    .map(|e| e.code.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        self.cache.insert(fingerprint, validation.clone());
        Ok(validation)
    }
}

fn run(
    config: &ValidationConfig,
    result: &OptimizationResult,
    live_positions: Option<&[PlayerPosition]>,
    fingerprint: String,
) -> Result<SettlementValidation> {
    let started = Instant::now();
    let tolerance = config.tolerance;
    let positions = &result.positions;
    let payments = &result.optimized_payments;
    let mut audit = Audit::new();

    // 1. Mathematical balance
    audit.step(1, "Mathematical Balance Validation", |audit, inputs| {
        let credits: Decimal = positions.iter().filter(|p| p.is_creditor()).map(|p| p.net_position).sum();
        let debits: Decimal = positions.iter().filter(|p| p.is_debtor()).map(|p| -p.net_position).sum();
        let flows = net_flows(payments);
        let plan_credits: Decimal = flows.values().filter(|v| **v > Decimal::ZERO).copied().sum();
        let plan_debits: Decimal = flows.values().filter(|v| **v < Decimal::ZERO).map(|v| -*v).sum();

        inputs.insert("total_credits".into(), credits.to_string());
        inputs.insert("total_debits".into(), debits.to_string());
        inputs.insert("plan_credits".into(), plan_credits.to_string());
        inputs.insert("plan_debits".into(), plan_debits.to_string());

        if (credits - debits).abs() > tolerance {
            audit.add_error(
                ValidationCode::BalanceMismatch,
                ErrorSeverity::Critical,
                format!("Credits {} and debits {} differ by more than {}", credits, debits, tolerance),
                Vec::new(),
            );
        }
        if plan_credits != plan_debits {
            audit.add_error(
                ValidationCode::BalanceMismatch,
                ErrorSeverity::Critical,
                format!("Plan pays out {} but collects {}", plan_credits, plan_debits),
                Vec::new(),
            );
        }
        if (plan_credits - credits).abs() > tolerance || (plan_debits - debits).abs() > tolerance {
            audit.add_error(
                ValidationCode::BalanceMismatch,
                ErrorSeverity::Critical,
                format!("Plan settles {} but positions require {}", plan_credits, credits),
                Vec::new(),
            );
        }

        format!("ΣCredits {} = ΣDebits {}, plan settles {}", credits, debits, plan_credits)
    });

    // 2. Player positions
    audit.step(2, "Player Position Validation", |audit, inputs| {
        let known: BTreeSet<&PlayerId> = positions.iter().map(|p| &p.player_id).collect();
        inputs.insert("players".into(), known.len().to_string());
        inputs.insert("payments".into(), payments.len().to_string());

        for payment in payments {
            if payment.amount <= Decimal::ZERO {
                audit.add_error(
                    ValidationCode::InvalidPlayerState,
                    ErrorSeverity::High,
                    format!(
                        "Payment {} → {} has non-positive amount {}",
                        payment.from_player, payment.to_player, payment.amount
                    ),
                    vec![payment.from_player.clone(), payment.to_player.clone()],
                );
            }
            if payment.from_player == payment.to_player {
                audit.add_error(
                    ValidationCode::InvalidPlayerState,
                    ErrorSeverity::High,
                    format!("Player {} pays themself", payment.from_player),
                    vec![payment.from_player.clone()],
                );
            }
            for party in [&payment.from_player, &payment.to_player] {
                if !known.contains(party) {
                    audit.add_error(
                        ValidationCode::InvalidPlayerState,
                        ErrorSeverity::High,
                        format!("Payment references unknown player {}", party),
                        vec![party.clone()],
                    );
                }
            }
        }

        let mut unsettled = 0;
        for (player_id, residual) in residuals(positions, payments) {
            if residual.abs() > tolerance {
                unsettled += 1;
                audit.add_error(
                    ValidationCode::InvalidPlayerState,
                    ErrorSeverity::High,
                    format!("Player {} is left with {} unsettled", player_id, residual),
                    vec![player_id],
                );
            }
        }

        format!("{} players checked, {} unsettled", known.len(), unsettled)
    });

    // 3. Precision
    let mut rounding = RoundingSeverity::None;
    let mut cumulative_rounding_loss = Decimal::ZERO;
    let (_, tracker) = optimizer::to_balances(positions)?;
    audit.step(3, "Precision Validation", |audit, inputs| {
        for payment in payments.iter().filter(|p| has_sub_cent(p.amount)) {
            audit.add_error(
                ValidationCode::PrecisionError,
                ErrorSeverity::Medium,
                format!(
                    "Payment {} → {} carries a fractional cent ({})",
                    payment.from_player, payment.to_player, payment.amount
                ),
                vec![payment.from_player.clone(), payment.to_player.clone()],
            );
        }

        cumulative_rounding_loss = tracker.lossy().map(|op| op.loss.abs()).sum();
        rounding = if cumulative_rounding_loss.is_zero() {
            RoundingSeverity::None
        } else if cumulative_rounding_loss <= config.max_rounding_loss {
            RoundingSeverity::Minor
        } else {
            RoundingSeverity::Major
        };

        inputs.insert("rounding_operations".into(), tracker.operations().len().to_string());
        inputs.insert("cumulative_loss".into(), cumulative_rounding_loss.to_string());

        match rounding {
            RoundingSeverity::Major => audit.add_error(
                ValidationCode::RoundingError,
                ErrorSeverity::Medium,
                format!(
                    "Cumulative rounding loss {} exceeds {}",
                    cumulative_rounding_loss, config.max_rounding_loss
                ),
                tracker
                    .lossy()
                    .filter_map(|op| op.subject.strip_prefix("position:"))
                    .map(PlayerId::new)
                    .collect(),
            ),
            RoundingSeverity::Minor => audit.warnings.push(format!(
                "Positions rounded to the cent (loss {})",
                cumulative_rounding_loss
            )),
            RoundingSeverity::None => {}
        }

        format!("Rounding {:?}, cumulative loss {}", rounding, cumulative_rounding_loss)
    });

    // 4. Real-time
    audit.step(4, "Real-time Validation", |audit, inputs| {
        let Some(live) = live_positions else {
            inputs.insert("live_snapshot".into(), "absent".into());
            return "No live snapshot supplied, positions taken as current".to_string();
        };
        inputs.insert("live_players".into(), live.len().to_string());

        let planned: BTreeMap<&PlayerId, Decimal> =
            positions.iter().map(|p| (&p.player_id, p.net_position)).collect();
        let current: BTreeMap<&PlayerId, Decimal> =
            live.iter().map(|p| (&p.player_id, p.net_position)).collect();

        let joined: Vec<PlayerId> = current.keys().filter(|id| !planned.contains_key(*id)).map(|id| (*id).clone()).collect();
        let left: Vec<PlayerId> = planned.keys().filter(|id| !current.contains_key(*id)).map(|id| (*id).clone()).collect();
        if !joined.is_empty() {
            audit.add_error(
                ValidationCode::InvalidPlayerState,
                ErrorSeverity::High,
                format!("{} player(s) joined since the plan was built", joined.len()),
                joined,
            );
        }
        if !left.is_empty() {
            audit.add_error(
                ValidationCode::InvalidPlayerState,
                ErrorSeverity::High,
                format!("{} player(s) left since the plan was built", left.len()),
                left,
            );
        }

        let mut changed = 0;
        for (player_id, planned_net) in &planned {
            if let Some(current_net) = current.get(player_id) {
                if (*current_net - *planned_net).abs() > tolerance {
                    changed += 1;
                    audit.add_error(
                        ValidationCode::BalanceMismatch,
                        ErrorSeverity::High,
                        format!(
                            "Player {} position moved from {} to {}",
                            player_id, planned_net, current_net
                        ),
                        vec![(*player_id).clone()],
                    );
                }
            }
        }

        format!("{} live positions compared, {} changed", current.len(), changed)
    });

    // 5. Bank balance
    audit.step(5, "Bank Balance Cross-validation", |audit, inputs| {
        let buy_ins: Decimal = positions.iter().map(|p| p.buy_ins).sum();
        let cash_outs: Decimal = positions.iter().map(|p| p.cash_outs).sum();
        let bank_balance = buy_ins - cash_outs;
        let plan_total = settled_total(payments);

        inputs.insert("bank_balance".into(), bank_balance.to_string());
        inputs.insert("plan_total".into(), plan_total.to_string());

        if plan_total > bank_balance + tolerance {
            audit.add_error(
                ValidationCode::BalanceMismatch,
                ErrorSeverity::High,
                format!("Plan moves {} but the bank holds {}", plan_total, bank_balance),
                Vec::new(),
            );
        }

        format!("Plan total {} against bank balance {}", plan_total, bank_balance)
    });

    // 6. Summary
    let failed = audit.steps.iter().filter(|s| !s.passed).count();
    let elapsed_us = started.elapsed().as_micros() as u64;
    audit.step(6, "Validation Summary", |audit, inputs| {
        inputs.insert("steps_passed".into(), (audit.steps.len() - failed).to_string());
        inputs.insert("steps_failed".into(), failed.to_string());
        inputs.insert("errors".into(), audit.errors.len().to_string());
        inputs.insert("elapsed_us".into(), elapsed_us.to_string());
        format!(
            "{} of {} steps passed, {} error(s) in {}µs",
            audit.steps.len() - failed,
            audit.steps.len(),
            audit.errors.len(),
            elapsed_us
        )
    });

    Ok(SettlementValidation {
        validation_id: Uuid::new_v4(),
        session_id: result.session_id.clone(),
        is_valid: audit.errors.is_empty(),
        steps: audit.steps,
        errors: audit.errors,
        warnings: audit.warnings,
        rounding,
        cumulative_rounding_loss,
        fingerprint,
        validated_at: Utc::now(),
        elapsed_us: started.elapsed().as_micros() as u64,
        from_cache: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizerConfig;
    use crate::optimizer::DebtOptimizer;

    fn optimize(entries: &[(&str, i64)]) -> OptimizationResult {
        let positions: Vec<PlayerPosition> = entries
            .iter()
            .map(|(id, units)| PlayerPosition::from_net(*id, *id, Decimal::from(*units)))
            .collect();
        DebtOptimizer::new()
            .optimize(&OptimizerConfig::default(), &SessionId::new("s1"), &positions, None)
            .unwrap()
    }

    #[test]
    fn test_valid_plan_passes_all_steps() {
        let result = optimize(&[("alice", 50), ("bob", -50)]);
        let validator = SettlementValidator::new(&ValidationConfig::default());
        let validation = validator
            .validate(&ValidationConfig::default(), &result, None)
            .unwrap();

        assert!(validation.is_valid);
        assert!(validation.errors.is_empty());
        assert_eq!(validation.steps.len(), 6);
        assert!(validation.steps.iter().all(|s| s.passed));
        assert_eq!(validation.rounding, RoundingSeverity::None);
    }

    #[test]
    fn test_wrong_direction_detected() {
        let mut result = optimize(&[("alice", 50), ("bob", -50)]);
        let payment = &mut result.optimized_payments[0];
        std::mem::swap(&mut payment.from_player, &mut payment.to_player);

        let validation = SettlementValidator::new(&ValidationConfig::default())
            .validate(&ValidationConfig::default(), &result, None)
            .unwrap();

        assert!(!validation.is_valid);
        assert!(!validation.step(2).unwrap().passed);
        assert_eq!(validation.errors_with(ValidationCode::InvalidPlayerState).count(), 2);
    }

    #[test]
    fn test_sub_cent_payment_flagged() {
        let mut result = optimize(&[("alice", 50), ("bob", -50)]);
        result.optimized_payments[0].amount = Decimal::new(50001, 3);

        let validation = SettlementValidator::new(&ValidationConfig::default())
            .validate(&ValidationConfig::default(), &result, None)
            .unwrap();
        assert_eq!(validation.errors_with(ValidationCode::PrecisionError).count(), 1);
    }

    #[test]
    fn test_live_changes_detected() {
        let result = optimize(&[("alice", 50), ("bob", -50)]);
        let live = vec![
            PlayerPosition::from_net("alice", "alice", Decimal::from(60)),
            PlayerPosition::from_net("bob", "bob", Decimal::from(-50)),
            PlayerPosition::from_net("carol", "carol", Decimal::from(-10)),
        ];

        let validation = SettlementValidator::new(&ValidationConfig::default())
            .validate(&ValidationConfig::default(), &result, Some(&live))
            .unwrap();

        assert!(!validation.step(4).unwrap().passed);
        assert_eq!(validation.errors_with(ValidationCode::BalanceMismatch).count(), 1);
        let joined: Vec<_> = validation.errors_with(ValidationCode::InvalidPlayerState).collect();
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].affected_players, vec![PlayerId::new("carol")]);
    }

    #[test]
    fn test_plan_exceeding_bank_fails() {
        // Creditor already cashed out everything the bank held
        let mut result = optimize(&[("alice", 50), ("bob", -50)]);
        for position in &mut result.positions {
            position.cash_outs += position.buy_ins;
        }

        let validation = SettlementValidator::new(&ValidationConfig::default())
            .validate(&ValidationConfig::default(), &result, None)
            .unwrap();
        assert!(!validation.step(5).unwrap().passed);
    }

    #[test]
    fn test_cached_by_fingerprint() {
        let result = optimize(&[("alice", 80), ("bob", 50), ("carol", -80), ("dave", -50)]);
        let config = ValidationConfig::default();
        let validator = SettlementValidator::new(&config);

        let first = validator.validate(&config, &result, None).unwrap();
        let second = validator.validate(&config, &result, None).unwrap();

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.validation_id, second.validation_id);
        assert_eq!(validator.cache_stats().hits, 1);
    }

    #[test]
    fn test_stricter_config_not_served_from_cache() {
        let positions = vec![
            PlayerPosition::from_net("alice", "Alice", Decimal::new(33_334, 3)),
            PlayerPosition::from_net("bob", "Bob", Decimal::new(-16_667, 3)),
            PlayerPosition::from_net("carol", "Carol", Decimal::new(-16_667, 3)),
        ];
        let result = DebtOptimizer::new()
            .optimize(&OptimizerConfig::default(), &SessionId::new("s1"), &positions, None)
            .unwrap();

        let lenient = ValidationConfig::default();
        let strict = ValidationConfig {
            max_rounding_loss: Decimal::new(1, 3),
            ..ValidationConfig::default()
        };
        let validator = SettlementValidator::new(&lenient);

        let first = validator.validate(&lenient, &result, None).unwrap();
        assert_eq!(first.errors_with(ValidationCode::RoundingError).count(), 0);

        let second = validator.validate(&strict, &result, None).unwrap();
        assert!(!second.from_cache);
        assert!(!second.is_valid);
        assert_eq!(second.rounding, RoundingSeverity::Major);
        assert_eq!(second.errors_with(ValidationCode::RoundingError).count(), 1);
        assert_ne!(first.fingerprint, second.fingerprint);
    }
}
