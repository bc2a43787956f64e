//! Main settlement engine
//!
//! Orchestrates position reads, optimization, validation, proof generation
//! and warning monitoring for one caller.

use crate::{
    cache::{BoundedCache, CacheStats},
    config::Config,
    error::ErrorSeverity,
    metrics::Metrics,
    monitor::{Warning, WarningMonitor},
    optimizer::{positions_fingerprint, Algorithm, DebtOptimizer},
    proof::{ExportFormat, MathematicalProof, ProofGenerator, ProofVerification},
    types::*,
    validator::{SettlementValidation, SettlementValidator},
    Error, Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use session_ledger::{BalanceVerifier, BankBalance, PositionCalculator, SessionSource};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Everything produced by one settlement run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReport {
    /// Session settled
    pub session_id: SessionId,

    /// Bank balance at settlement time
    pub bank: BankBalance,

    /// Payment plan
    pub result: OptimizationResult,

    /// Pre-settlement validation
    pub validation: SettlementValidation,

    /// Signed proof
    pub proof: MathematicalProof,

    /// Warnings still open (none of them blocking)
    pub open_warnings: Vec<Warning>,

    /// Completed timestamp
    pub settled_at: DateTime<Utc>,
}

/// Settlement engine
pub struct SettlementEngine {
    /// Configuration
    config: Config,

    /// Position reads
    calculator: Arc<PositionCalculator>,

    /// Bank balance checks
    verifier: BalanceVerifier,

    /// Payment plans
    optimizer: DebtOptimizer,

    /// Pre-settlement validation
    validator: SettlementValidator,

    /// Proofs
    prover: ProofGenerator,

    /// Adjustment warnings
    monitor: WarningMonitor,

    /// Plans keyed by session, algorithm, config version and data fingerprint
    results: BoundedCache<OptimizationResult>,

    /// Metrics
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for SettlementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementEngine")
            .field("config_version", &self.config.version)
            .field("cached_results", &self.results.len())
            .finish()
    }
}

impl SettlementEngine {
    /// Create new settlement engine
    pub fn new(source: Arc<dyn SessionSource>, config: Config) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(Metrics::new()?);
        let calculator = Arc::new(PositionCalculator::new(source, &config.ledger));
        let verifier = BalanceVerifier::new(calculator.clone(), &config.ledger);
        let optimizer = DebtOptimizer::with_metrics(metrics.clone());
        let validator = SettlementValidator::with_metrics(&config.validation, metrics.clone());
        let prover = ProofGenerator::new(&config.proof)?.with_metrics(metrics.clone());
        let monitor = WarningMonitor::with_metrics(calculator.clone(), metrics.clone());
        let results = BoundedCache::new(config.validation.cache_capacity).with_metrics(metrics.clone());

        tracing::info!(
            "Settlement engine {} v{} ready (config v{}, proof key {})",
            config.service_name,
            config.service_version,
            config.version,
            prover.public_key()
        );

        Ok(Self {
            config,
            calculator,
            verifier,
            optimizer,
            validator,
            prover,
            monitor,
            results,
            metrics,
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Warning monitor
    pub fn monitor(&self) -> &WarningMonitor {
        &self.monitor
    }

    /// Metrics registry
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Net positions of a session
    pub async fn positions(&self, session_id: &SessionId) -> Result<Vec<PlayerPosition>> {
        self.bounded("positions", async {
            Ok(self.calculator.calculate_positions(session_id).await?)
        })
        .await
    }

    /// Bank balance of a session
    pub async fn verify_bank(&self, session_id: &SessionId) -> Result<BankBalance> {
        self.bounded("verify_bank", async { Ok(self.verifier.verify(session_id).await?) })
            .await
    }

    /// Build a payment plan for a session
    pub async fn optimize_session(
        &self,
        session_id: &SessionId,
        algorithm: Option<Algorithm>,
    ) -> Result<OptimizationResult> {
        self.bounded("optimize_session", self.optimize_inner(session_id, algorithm))
            .await
    }

    /// Validate a plan against the session's current positions
    pub async fn validate_result(&self, result: &OptimizationResult) -> Result<SettlementValidation> {
        self.bounded("validate_result", self.validate_inner(result))
            .await
    }

    /// Build a plan and prove it
    pub async fn prove_session(
        &self,
        session_id: &SessionId,
        algorithm: Option<Algorithm>,
    ) -> Result<MathematicalProof> {
        self.bounded("prove_session", async {
            let result = self.optimize_inner(session_id, algorithm).await?;
            self.prover.generate(&self.config.proof, &result)
        })
        .await
    }

    /// Verify a proof
    pub fn verify_proof(&self, proof: &MathematicalProof) -> Result<ProofVerification> {
        self.prover.verify(&self.config.proof, proof)
    }

    /// Render a proof export and record it in the proof's history
    pub fn export_proof(&self, proof: &mut MathematicalProof, format: ExportFormat) -> Result<String> {
        self.prover.export(&self.config.proof, proof, format)
    }

    /// Optimize, validate and prove a session.
    ///
    /// Refuses to settle while a critical warning is open or when validation
    /// fails.
    pub async fn settle_session(
        &self,
        session_id: &SessionId,
        algorithm: Option<Algorithm>,
    ) -> Result<SettlementReport> {
        self.bounded("settle_session", async {
            let started = Instant::now();

            if !self.monitor.can_proceed(session_id).await {
                let blocking = self
                    .monitor
                    .active_warnings(session_id)
                    .await
                    .into_iter()
                    .filter(|w| !w.can_proceed)
                    .count();
                return Err(Error::Consistency {
                    message: format!(
                        "Session {} blocked by {} unresolved critical warning(s)",
                        session_id, blocking
                    ),
                    severity: ErrorSeverity::Critical,
                });
            }

            let bank = self.verifier.verify(session_id).await?;
            let result = self.optimize_inner(session_id, algorithm).await?;
            let validation = self.validate_inner(&result).await?;
            if !validation.is_valid {
                let (message, severity) = validation
                    .errors
                    .iter()
                    .max_by_key(|issue| issue.severity)
                    .map(|issue| (issue.message.clone(), issue.severity))
                    .unwrap_or_else(|| ("Validation failed".to_string(), ErrorSeverity::High));
                return Err(Error::Consistency { message, severity });
            }

            let proof = self.prover.generate(&self.config.proof, &result)?;
            self.prover.ensure_valid(&self.config.proof, &proof)?;

            tracing::info!(
                "Settled session {}: {} payments (direct {}), proof {} in {}ms",
                session_id,
                result.optimized_payments.len(),
                result.direct_payments.len(),
                proof.proof_id,
                started.elapsed().as_millis()
            );

            Ok(SettlementReport {
                session_id: session_id.clone(),
                bank,
                result,
                validation,
                proof,
                open_warnings: self.monitor.active_warnings(session_id).await,
                settled_at: Utc::now(),
            })
        })
        .await
    }

    /// Drop cached plans of a session
    pub fn invalidate_session(&self, session_id: &SessionId) -> usize {
        let dropped = self.results.invalidate_prefix(&format!("{}|", session_id));
        tracing::debug!("Dropped {} cached plans for session {}", dropped, session_id);
        dropped
    }

    /// Plan cache statistics
    pub fn result_cache_stats(&self) -> CacheStats {
        self.results.stats()
    }

    /// Validation cache statistics
    pub fn validation_cache_stats(&self) -> CacheStats {
        self.validator.cache_stats()
    }

    async fn optimize_inner(
        &self,
        session_id: &SessionId,
        algorithm: Option<Algorithm>,
    ) -> Result<OptimizationResult> {
        let algorithm = algorithm.unwrap_or(self.config.optimizer.default_algorithm);
        let positions = self.calculator.calculate_positions(session_id).await?;

        let key = format!(
            "{}|{}|{}|{}",
            session_id,
            algorithm,
            self.config.version,
            positions_fingerprint(&positions)?
        );
        if let Some(result) = self.results.get(&key) {
            tracing::debug!("Plan cache hit for session {} ({})", session_id, algorithm);
            return Ok(result);
        }

        let mut result = self.optimizer.optimize(
            &self.config.optimizer,
            session_id,
            &positions,
            Some(algorithm),
        )?;
        result.config_version = self.config.version;

        // Timed-out runs depend on load, not on data
        let timed_out = result.fallback.as_ref().is_some_and(|f| f.timed_out);
        if !timed_out {
            self.results.insert(key, result.clone());
        }
        Ok(result)
    }

    async fn validate_inner(&self, result: &OptimizationResult) -> Result<SettlementValidation> {
        let live = self.calculator.calculate_positions(&result.session_id).await?;
        self.validator
            .validate(&self.config.validation, result, Some(live.as_slice()))
    }

    async fn bounded<T>(&self, operation: &str, work: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.config.request_timeout();
        match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("{} exceeded {}ms", operation, timeout.as_millis());
                Err(Error::Timeout {
                    operation: operation.to_string(),
                    elapsed_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::monitor::{AdjustmentKind, AdjustmentRequest, Resolution};
    use rust_decimal::Decimal;
    use session_ledger::{
        InMemorySessionSource, Player, Session, SessionSnapshot, SessionStatus, Transaction,
    };
    use std::time::Duration;

    async fn source_with(players: &[(&str, i64, i64)]) -> InMemorySessionSource {
        let source = InMemorySessionSource::new();
        source
            .insert_snapshot(SessionSnapshot {
                session: Session {
                    session_id: SessionId::new("s1"),
                    name: "Friday".to_string(),
                    status: SessionStatus::Completed,
                    created_at: Utc::now(),
                },
                players: players
                    .iter()
                    .map(|(id, _, chips)| Player::new(*id, id.to_uppercase(), Decimal::from(*chips)))
                    .collect(),
                transactions: players
                    .iter()
                    .map(|(id, buy_in, _)| Transaction::buy_in(*id, Decimal::from(*buy_in)))
                    .collect(),
            })
            .await;
        source
    }

    fn engine(source: InMemorySessionSource) -> SettlementEngine {
        SettlementEngine::new(Arc::new(source), Config::default()).unwrap()
    }

    #[tokio::test]
    async fn test_settle_session() {
        let source = source_with(&[("alice", 100, 150), ("bob", 100, 80), ("carol", 100, 70)]).await;
        let engine = engine(source);

        let report = engine.settle_session(&SessionId::new("s1"), None).await.unwrap();
        assert!(report.bank.is_balanced);
        assert!(report.result.is_valid);
        assert!(report.validation.is_valid);
        assert!(report.proof.is_valid);
        assert_eq!(report.result.config_version, 1);
        assert_eq!(settled_total(&report.result.optimized_payments), Decimal::from(50));
    }

    #[tokio::test]
    async fn test_plan_cache_keyed_by_data() {
        let source = source_with(&[("alice", 100, 150), ("bob", 100, 50)]).await;
        let engine = engine(source.clone());
        let session_id = SessionId::new("s1");

        let first = engine.optimize_session(&session_id, None).await.unwrap();
        let second = engine.optimize_session(&session_id, None).await.unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(engine.result_cache_stats().hits, 1);

        source
            .set_chips(&session_id, &PlayerId::new("alice"), Decimal::from(140))
            .await
            .unwrap();
        source
            .set_chips(&session_id, &PlayerId::new("bob"), Decimal::from(60))
            .await
            .unwrap();
        let third = engine.optimize_session(&session_id, None).await.unwrap();
        assert_ne!(first.data_fingerprint, third.data_fingerprint);
        assert_eq!(engine.invalidate_session(&session_id), 2);
    }

    #[tokio::test]
    async fn test_only_timed_out_plans_skip_cache() {
        let players = [("alice", 100, 180), ("bob", 100, 150), ("carol", 100, 20), ("dave", 100, 50)];
        let session_id = SessionId::new("s1");

        // Delegating to greedy depends only on the data
        let mut config = Config::default();
        config.optimizer.exhaustive_player_limit = 2;
        let delegating = SettlementEngine::new(Arc::new(source_with(&players).await), config).unwrap();
        let first = delegating
            .optimize_session(&session_id, Some(Algorithm::MinimalTransactions))
            .await
            .unwrap();
        assert!(first.fallback.as_ref().is_some_and(|f| !f.timed_out));
        delegating
            .optimize_session(&session_id, Some(Algorithm::MinimalTransactions))
            .await
            .unwrap();
        assert_eq!(delegating.result_cache_stats().hits, 1);

        let mut config = Config::default();
        config.optimizer.time_budget_ms = 0;
        let rushed = SettlementEngine::new(Arc::new(source_with(&players).await), config).unwrap();
        let first = rushed.optimize_session(&session_id, Some(Algorithm::Greedy)).await.unwrap();
        assert!(first.fallback.as_ref().is_some_and(|f| f.timed_out));
        rushed.optimize_session(&session_id, Some(Algorithm::Greedy)).await.unwrap();
        assert_eq!(rushed.result_cache_stats().hits, 0);
    }

    #[tokio::test]
    async fn test_stale_plan_fails_validation() {
        let source = source_with(&[("alice", 100, 150), ("bob", 100, 50)]).await;
        let engine = engine(source.clone());
        let session_id = SessionId::new("s1");

        let result = engine.optimize_session(&session_id, None).await.unwrap();
        source
            .set_chips(&session_id, &PlayerId::new("alice"), Decimal::from(120))
            .await
            .unwrap();
        source
            .set_chips(&session_id, &PlayerId::new("bob"), Decimal::from(80))
            .await
            .unwrap();

        let validation = engine.validate_result(&result).await.unwrap();
        assert!(!validation.is_valid);
        assert!(!validation.step(4).unwrap().passed);
    }

    #[tokio::test]
    async fn test_critical_warning_blocks_settlement() {
        let source = source_with(&[("alice", 100, 120), ("bob", 100, 80)]).await;
        let engine = engine(source);
        let session_id = SessionId::new("s1");

        let warnings = engine
            .monitor()
            .record_manual_adjustment(
                &MonitorConfig::default(),
                AdjustmentRequest {
                    session_id: session_id.clone(),
                    player_id: PlayerId::new("alice"),
                    kind: AdjustmentKind::ChipCount,
                    delta: Decimal::from(30),
                    actor: "host".to_string(),
                    reason: "recount".to_string(),
                },
            )
            .await
            .unwrap();

        let blocked = engine.settle_session(&session_id, None).await;
        assert!(matches!(
            blocked,
            Err(Error::Consistency { severity: ErrorSeverity::Critical, .. })
        ));

        engine
            .monitor()
            .resolve_warning(&MonitorConfig::default(), warnings[0].warning_id, Resolution::Approved, "ok")
            .await
            .unwrap();
        assert!(engine.settle_session(&session_id, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_slow_source_times_out() {
        let source = source_with(&[("alice", 100, 150), ("bob", 100, 50)])
            .await
            .with_latency(Duration::from_millis(200));
        let config = Config {
            request_timeout_ms: 20,
            ..Config::default()
        };
        let engine = SettlementEngine::new(Arc::new(source), config).unwrap();

        let result = engine.optimize_session(&SessionId::new("s1"), None).await;
        let err = result.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let engine = engine(InMemorySessionSource::new());
        let result = engine.optimize_session(&SessionId::new("missing"), None).await;
        assert!(matches!(
            result,
            Err(Error::Ledger(session_ledger::Error::SessionNotFound(_)))
        ));
    }
}
