//! End-to-end settlement scenarios
//!
//! Runs whole sessions through the engine:
//! - Two- and four-player settlements with validation and proof
//! - Unbalanced tables rejected before any payment is planned
//! - Manual adjustments raising warnings and corrections
//! - Proof exports that re-verify from their own content

use chrono::Utc;
use rust_decimal::Decimal;
use session_ledger::{
    InMemorySessionSource, Player, Session, SessionSnapshot, SessionStatus, Transaction,
};
use settlement::{
    config::{MonitorConfig, OptimizerConfig},
    monitor::WarningCode,
    proof::StructuredExport,
    settled_total, AdjustmentKind, AdjustmentRequest, Algorithm, Config, DebtOptimizer, Error,
    ExportFormat, PlayerId, PlayerPosition, SessionId, SettlementEngine, WarningSeverity,
};
use std::sync::Arc;
use std::time::Duration;

const SESSION: &str = "friday";

/// Session where each player bought in `buy_in` and holds `chips`
async fn session(players: &[(&str, i64, i64)]) -> InMemorySessionSource {
    let source = InMemorySessionSource::new();
    source
        .insert_snapshot(SessionSnapshot {
            session: Session {
                session_id: SessionId::new(SESSION),
                name: "Friday game".to_string(),
                status: SessionStatus::Completed,
                created_at: Utc::now(),
            },
            players: players
                .iter()
                .map(|(id, _, chips)| Player::new(*id, capitalize(id), Decimal::from(*chips)))
                .collect(),
            transactions: players
                .iter()
                .map(|(id, buy_in, _)| Transaction::buy_in(*id, Decimal::from(*buy_in)))
                .collect(),
        })
        .await;
    source
}

fn capitalize(id: &str) -> String {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn engine(source: InMemorySessionSource) -> SettlementEngine {
    SettlementEngine::new(Arc::new(source), Config::default()).unwrap()
}

fn adjustment(player: &str, cents: i64) -> AdjustmentRequest {
    AdjustmentRequest {
        session_id: SessionId::new(SESSION),
        player_id: PlayerId::new(player),
        kind: AdjustmentKind::ChipCount,
        delta: Decimal::new(cents, 2),
        actor: "host".to_string(),
        reason: "recount".to_string(),
    }
}

#[tokio::test]
async fn test_two_players_single_payment() {
    let engine = engine(session(&[("alice", 100, 150), ("bob", 100, 50)]).await);
    let session_id = SessionId::new(SESSION);

    let result = engine
        .optimize_session(&session_id, Some(Algorithm::Greedy))
        .await
        .unwrap();
    assert_eq!(result.optimized_payments.len(), 1);
    let payment = &result.optimized_payments[0];
    assert_eq!(payment.from_player.as_str(), "bob");
    assert_eq!(payment.to_player.as_str(), "alice");
    assert_eq!(payment.amount, Decimal::from(50));

    let validation = engine.validate_result(&result).await.unwrap();
    assert!(validation.is_valid);
    assert!(validation.errors.is_empty());
}

#[tokio::test]
async fn test_four_players_every_algorithm() {
    let engine = engine(
        session(&[
            ("alice", 100, 180),
            ("bob", 100, 150),
            ("charlie", 100, 20),
            ("diana", 100, 50),
        ])
        .await,
    );
    let session_id = SessionId::new(SESSION);

    for algorithm in Algorithm::ALL {
        let result = engine.optimize_session(&session_id, Some(algorithm)).await.unwrap();
        assert!(result.is_valid, "{} produced an invalid plan", algorithm);
        assert!(result.optimized_payments.len() <= result.direct_payments.len());
        assert_eq!(
            settled_total(&result.optimized_payments),
            settled_total(&result.direct_payments)
        );

        let proof = engine.prove_session(&session_id, Some(algorithm)).await.unwrap();
        assert!(proof.balance_verification.is_balanced);
        assert!(proof.balance_verification.net_balance.abs() <= Decimal::new(1, 2));
        assert!(proof.calculation_steps.iter().all(|step| step.verified));
    }
}

#[tokio::test]
async fn test_single_winner_without_counterpart_rejected() {
    let engine = engine(session(&[("alice", 100, 200)]).await);

    let result = engine.optimize_session(&SessionId::new(SESSION), None).await;
    assert!(matches!(result, Err(Error::UnbalancedSettlement { .. })));

    let settle = engine.settle_session(&SessionId::new(SESSION), None).await;
    assert!(settle.is_err());
}

#[tokio::test]
async fn test_small_adjustment_gets_correction() {
    let engine = engine(session(&[("alice", 100, 100), ("bob", 100, 100)]).await);

    let warnings = engine
        .monitor()
        .record_manual_adjustment(&MonitorConfig::default(), adjustment("alice", 15))
        .await
        .unwrap();

    assert_eq!(warnings.len(), 1);
    let warning = &warnings[0];
    assert_eq!(warning.severity, WarningSeverity::Minor);
    assert!(warning.can_proceed);
    let correction = warning.auto_correction.as_ref().unwrap();
    assert_eq!(correction.total(), Decimal::new(15, 2));
    assert!(engine.monitor().can_proceed(&SessionId::new(SESSION)).await);
}

#[tokio::test]
async fn test_frequent_adjustments_flagged() {
    let engine = engine(session(&[("alice", 100, 100), ("bob", 100, 100)]).await);
    let config = MonitorConfig::default();

    let mut raised = Vec::new();
    for _ in 0..6 {
        raised.extend(
            engine
                .monitor()
                .record_manual_adjustment(&config, adjustment("bob", -10))
                .await
                .unwrap(),
        );
    }

    assert!(raised.iter().any(|w| w.code == WarningCode::FrequentAdjustments));
    assert_eq!(
        raised.iter().filter(|w| w.code == WarningCode::BalanceAdjustment).count(),
        6
    );

    let metrics = engine.monitor().metrics();
    assert_eq!(metrics.total_warnings, raised.len());
    assert_eq!(metrics.active_warnings, raised.len());
}

#[tokio::test]
async fn test_settlement_report_exports() {
    let engine = engine(
        session(&[
            ("alice", 100, 180),
            ("bob", 100, 150),
            ("charlie", 100, 20),
            ("diana", 100, 50),
        ])
        .await,
    );

    let mut report = engine
        .settle_session(&SessionId::new(SESSION), Some(Algorithm::MinimalTransactions))
        .await
        .unwrap();
    assert!(report.proof.is_valid);
    assert!(engine.verify_proof(&report.proof).unwrap().is_valid);

    let structured = engine
        .export_proof(&mut report.proof, ExportFormat::Structured)
        .unwrap();
    let parsed = StructuredExport::parse(&structured).unwrap();
    assert_eq!(parsed.payments, report.result.optimized_payments);
    assert_eq!(parsed.settled_total(), settled_total(&report.result.optimized_payments));
    assert!(parsed.reverify().passed);

    let narrative = engine
        .export_proof(&mut report.proof, ExportFormat::Narrative)
        .unwrap();
    assert!(narrative.contains("Charlie pays"));
    assert_eq!(report.proof.export_history.len(), 2);
}

#[tokio::test]
async fn test_tampered_proof_detected() {
    let engine = engine(session(&[("alice", 100, 150), ("bob", 100, 50)]).await);
    let mut proof = engine
        .prove_session(&SessionId::new(SESSION), None)
        .await
        .unwrap();

    proof.settlement.payments[0].amount = Decimal::from(40);
    let verification = engine.verify_proof(&proof).unwrap();
    assert!(!verification.is_valid);
    assert!(!verification.checksum_valid);
}

#[test]
fn test_spent_budget_falls_back_to_direct() {
    let positions: Vec<PlayerPosition> = (0..12)
        .map(|i| {
            let net = if i % 2 == 0 { 1_000 + i } else { -(1_000 + i - 1) };
            PlayerPosition::from_net(format!("p{:02}", i), format!("P{}", i), Decimal::new(net, 2))
        })
        .collect();
    let config = OptimizerConfig {
        time_budget_ms: 0,
        ..OptimizerConfig::default()
    };

    let result = DebtOptimizer::new()
        .optimize(&config, &SessionId::new("slow"), &positions, Some(Algorithm::Greedy))
        .unwrap();
    assert!(result.is_valid);
    assert_eq!(result.algorithm_used(), Algorithm::Direct);
    assert_eq!(result.optimized_payments, result.direct_payments);
    assert!(result
        .validation_errors
        .iter()
        .any(|e| e.starts_with("Fallback to direct")));
}

#[tokio::test]
async fn test_stalled_source_times_out() {
    let source = session(&[("alice", 100, 150), ("bob", 100, 50)])
        .await
        .with_latency(Duration::from_secs(5));
    let config = Config {
        request_timeout_ms: 50,
        ..Config::default()
    };
    let engine = SettlementEngine::new(Arc::new(source), config).unwrap();

    let err = engine
        .settle_session(&SessionId::new(SESSION), None)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}
