//! Real-time adjustment monitoring
//!
//! Tracks manual chip corrections per session, classifies their risk and
//! keeps resolvable warnings. A monitored session also runs a sampling task
//! that snapshots balances and flags zero-sum drift.
//!
//! # Concurrency
//!
//! Each session's state sits behind its own async mutex, so writes to one
//! session are serialized while different sessions never wait on each
//! other.

mod correction;
mod sampler;
mod warnings;

pub use correction::{propose as propose_correction, AutoCorrection, CorrectionEntry};
pub use warnings::{
    AuditEntry, Resolution, Warning, WarningCode, WarningResolution, WarningSeverity, WarningStatus,
};

use crate::{
    config::MonitorConfig,
    metrics::Metrics,
    precision::has_sub_cent,
    types::{PlayerId, SessionId},
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::{DashMap, DashSet};
use rust_decimal::Decimal;
use sampler::SamplerHandle;
use serde::{Deserialize, Serialize};
use session_ledger::{bank_balance, compute_positions, net_sum, BankBalance, PlayerPosition, PositionCalculator};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What a manual adjustment changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    /// Chip count corrected
    ChipCount,
    /// Buy-in amount corrected
    BuyIn,
    /// Cash-out amount corrected
    CashOut,
}

/// A manual adjustment to record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustmentRequest {
    /// Session
    pub session_id: SessionId,
    /// Player adjusted
    pub player_id: PlayerId,
    /// What changed
    pub kind: AdjustmentKind,
    /// Signed change
    pub delta: Decimal,
    /// Who made it
    pub actor: String,
    /// Why
    pub reason: String,
}

/// Logged adjustment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustmentRecord {
    /// Adjustment id
    pub adjustment_id: Uuid,
    /// Player adjusted
    pub player_id: PlayerId,
    /// What changed
    pub kind: AdjustmentKind,
    /// Signed change
    pub delta: Decimal,
    /// Who made it
    pub actor: String,
    /// Why
    pub reason: String,
    /// When
    pub recorded_at: DateTime<Utc>,
}

/// Sampled balances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// When
    pub taken_at: DateTime<Utc>,
    /// Σ net positions (0 when the books close)
    pub net_total: Decimal,
    /// Aggregate bank view
    pub bank: BankBalance,
    /// Net position per player
    pub positions: BTreeMap<PlayerId, Decimal>,
}

/// Per-session monitoring state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringState {
    /// Session
    pub session_id: SessionId,
    /// Sampling task running
    pub is_monitoring: bool,
    /// Recent snapshots, oldest first
    pub balance_snapshots: Vec<BalanceSnapshot>,
    /// Open warnings
    pub active_warnings: Vec<Warning>,
    /// Recently resolved warnings
    pub resolved_warnings: Vec<Warning>,
    /// Recent adjustments, oldest first
    pub adjustment_history: Vec<AdjustmentRecord>,
}

impl MonitoringState {
    fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            is_monitoring: false,
            balance_snapshots: Vec::new(),
            active_warnings: Vec::new(),
            resolved_warnings: Vec::new(),
            adjustment_history: Vec::new(),
        }
    }

    fn has_open(&self, code: WarningCode, player_id: Option<&PlayerId>) -> bool {
        self.active_warnings.iter().any(|w| {
            w.code == code && player_id.map_or(true, |id| w.affected_players.contains(id))
        })
    }
}

/// Warning counters across sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorMetrics {
    /// Warnings raised per severity
    pub warnings_by_severity: BTreeMap<WarningSeverity, usize>,
    /// Warnings raised
    pub total_warnings: usize,
    /// Currently open
    pub active_warnings: usize,
    /// Resolved so far
    pub resolved_warnings: usize,
    /// resolved / total
    pub resolution_rate: f64,
    /// Mean creation → resolution time
    pub mean_resolution_latency_ms: Option<f64>,
    /// Sessions being sampled
    pub monitored_sessions: usize,
}

#[derive(Debug, Default)]
struct WarningStats {
    by_severity: BTreeMap<WarningSeverity, usize>,
    resolved: usize,
    total_latency_ms: i64,
}

#[derive(Debug)]
struct SessionMonitor {
    state: MonitoringState,
    sampler: Option<SamplerHandle>,
}

pub(crate) struct Inner {
    calculator: Arc<PositionCalculator>,
    sessions: DashMap<SessionId, Arc<Mutex<SessionMonitor>>>,
    warning_index: DashMap<Uuid, SessionId>,
    monitored: DashSet<SessionId>,
    stats: parking_lot::Mutex<WarningStats>,
    metrics: Option<Arc<Metrics>>,
}

/// Warning monitor
#[derive(Clone)]
pub struct WarningMonitor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WarningMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarningMonitor")
            .field("sessions", &self.inner.sessions.len())
            .field("warnings", &self.inner.warning_index.len())
            .finish()
    }
}

impl WarningMonitor {
    /// Create monitor reading positions through `calculator`
    pub fn new(calculator: Arc<PositionCalculator>) -> Self {
        Self::build(calculator, None)
    }

    /// Create monitor that records metrics
    pub fn with_metrics(calculator: Arc<PositionCalculator>, metrics: Arc<Metrics>) -> Self {
        Self::build(calculator, Some(metrics))
    }

    fn build(calculator: Arc<PositionCalculator>, metrics: Option<Arc<Metrics>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                calculator,
                sessions: DashMap::new(),
                warning_index: DashMap::new(),
                monitored: DashSet::new(),
                stats: parking_lot::Mutex::new(WarningStats::default()),
                metrics,
            }),
        }
    }

    /// Start sampling a session. Returns false if it was already sampled.
    pub async fn start_monitoring(&self, session_id: &SessionId, config: &MonitorConfig) -> Result<bool> {
        if config.sampling_interval_ms == 0 {
            return Err(Error::Config("sampling_interval_ms must be positive".to_string()));
        }
        // Fail fast on unknown sessions
        self.inner.calculator.snapshot(session_id).await?;

        let entry = self.inner.session(session_id);
        let mut monitor = entry.lock().await;
        if monitor.sampler.as_ref().is_some_and(|s| s.is_running()) {
            return Ok(false);
        }

        monitor.sampler = Some(sampler::spawn(
            Arc::downgrade(&self.inner),
            session_id.clone(),
            config.clone(),
        ));
        monitor.state.is_monitoring = true;
        drop(monitor);

        self.inner.monitored.insert(session_id.clone());
        self.inner.update_monitored_gauge();
        info!("Started monitoring session {}", session_id);
        Ok(true)
    }

    /// Stop sampling a session. Returns false if it was not sampled.
    pub async fn stop_monitoring(&self, session_id: &SessionId) -> bool {
        let Some(entry) = self.inner.existing(session_id) else {
            return false;
        };
        let mut monitor = entry.lock().await;
        monitor.state.is_monitoring = false;
        let Some(sampler) = monitor.sampler.take() else {
            return false;
        };
        sampler.stop();
        drop(monitor);

        self.inner.monitored.remove(session_id);
        self.inner.update_monitored_gauge();
        info!("Stopped monitoring session {}", session_id);
        true
    }

    /// Take a balance snapshot now
    pub async fn sample_now(&self, session_id: &SessionId, config: &MonitorConfig) -> Result<BalanceSnapshot> {
        self.inner.sample(session_id, config).await
    }

    /// Record a manual adjustment and return the warnings it raised
    pub async fn record_manual_adjustment(
        &self,
        config: &MonitorConfig,
        request: AdjustmentRequest,
    ) -> Result<Vec<Warning>> {
        validate_request(&request)?;
        let thresholds = &config.thresholds;

        let snapshot = self.inner.calculator.snapshot(&request.session_id).await?;
        if !snapshot.players.iter().any(|p| p.player_id == request.player_id) {
            return Err(session_ledger::Error::PlayerNotFound {
                session_id: request.session_id.clone(),
                player_id: request.player_id.clone(),
            }
            .into());
        }
        let positions = compute_positions(&snapshot.players, &snapshot.transactions)?;

        let entry = self.inner.session(&request.session_id);
        let mut monitor = entry.lock().await;
        let state = &mut monitor.state;
        let now = Utc::now();

        info!(
            "Manual {:?} adjustment of {} to player {} in session {} by {}: {}",
            request.kind, request.delta, request.player_id, request.session_id, request.actor, request.reason
        );
        state.adjustment_history.push(AdjustmentRecord {
            adjustment_id: Uuid::new_v4(),
            player_id: request.player_id.clone(),
            kind: request.kind,
            delta: request.delta,
            actor: request.actor.clone(),
            reason: request.reason.clone(),
            recorded_at: now,
        });
        truncate_front(&mut state.adjustment_history, config.adjustment_history_limit);

        let impact = request.delta.abs();
        let severity = WarningSeverity::classify(impact, thresholds);
        let mut created = Vec::new();

        let mut adjustment = Warning::new(
            request.session_id.clone(),
            WarningCode::BalanceAdjustment,
            severity,
            format!(
                "{} adjusted {} by {} ({:?})",
                request.actor, request.player_id, request.delta, request.kind
            ),
            vec![request.player_id.clone()],
            impact,
        );
        adjustment.suggested_actions = match severity {
            WarningSeverity::Critical => vec![
                "Recount chips before settling".to_string(),
                "Resolve this warning to unblock settlement".to_string(),
            ],
            WarningSeverity::Major => vec!["Have the host approve the adjustment".to_string()],
            WarningSeverity::Minor => vec!["No action needed".to_string()],
        };
        if impact <= thresholds.auto_correction_max {
            let correction = correction::propose(&request.player_id, request.delta, &snapshot.players)?;
            adjustment
                .suggested_actions
                .push(format!("Apply auto-correction {} to offset {}", correction.correction_id, correction.discrepancy));
            adjustment.auto_correction = Some(correction);
        }
        created.push(adjustment);

        if impact > thresholds.large_adjustment {
            created.push(
                Warning::new(
                    request.session_id.clone(),
                    WarningCode::LargeAdjustment,
                    severity.max(WarningSeverity::Major),
                    format!("Adjustment of {} exceeds {}", impact, thresholds.large_adjustment),
                    vec![request.player_id.clone()],
                    impact,
                )
                .with_actions(&["Confirm the amount with the player", "Recount chips"]),
            );
        }

        let window_start = now - Duration::minutes(thresholds.frequent_window_mins);
        let recent = state
            .adjustment_history
            .iter()
            .filter(|a| a.player_id == request.player_id && a.recorded_at >= window_start)
            .count();
        if recent > thresholds.frequent_count
            && !state.has_open(WarningCode::FrequentAdjustments, Some(&request.player_id))
        {
            created.push(
                Warning::new(
                    request.session_id.clone(),
                    WarningCode::FrequentAdjustments,
                    WarningSeverity::Major,
                    format!(
                        "{} adjustments to {} in the last {} minutes",
                        recent, request.player_id, thresholds.frequent_window_mins
                    ),
                    vec![request.player_id.clone()],
                    Decimal::ZERO,
                )
                .with_actions(&["Review the adjustment history", "Check who is making the adjustments"]),
            );
        }

        for position in &positions {
            if let Some(warning) = standing_position_warning(state, &request.session_id, position, config) {
                created.push(warning);
            }
        }

        for warning in &created {
            self.inner.register(warning);
            debug!("Raised {} ({}) in session {}", warning.code, warning.severity, warning.session_id);
        }
        state.active_warnings.extend(created.iter().cloned());
        self.inner.expire_open(state, config, now);

        if created.iter().any(|w| !w.can_proceed) {
            warn!("Session {} is blocked by a critical adjustment", request.session_id);
        }
        Ok(created)
    }

    /// Resolve an open warning
    pub async fn resolve_warning(
        &self,
        config: &MonitorConfig,
        warning_id: Uuid,
        resolution: Resolution,
        reason: impl Into<String>,
    ) -> Result<Warning> {
        let session_id = self
            .inner
            .warning_index
            .get(&warning_id)
            .map(|entry| entry.value().clone())
            .ok_or(Error::WarningNotFound(warning_id))?;
        let entry = self
            .inner
            .existing(&session_id)
            .ok_or(Error::WarningNotFound(warning_id))?;

        let mut monitor = entry.lock().await;
        let state = &mut monitor.state;
        let index = state
            .active_warnings
            .iter()
            .position(|w| w.warning_id == warning_id)
            .ok_or(Error::WarningNotFound(warning_id))?;

        let mut warning = state.active_warnings.remove(index);
        warning.resolve(resolution, reason.into());

        state.resolved_warnings.push(warning.clone());
        let cutoff = Utc::now() - Duration::hours(config.retention_hours);
        state
            .resolved_warnings
            .retain(|w| w.resolved_at.map_or(true, |at| at >= cutoff));
        truncate_front(&mut state.resolved_warnings, config.warning_history_limit);
        drop(monitor);

        self.inner.warning_index.remove(&warning_id);
        {
            let mut stats = self.inner.stats.lock();
            stats.resolved += 1;
            stats.total_latency_ms += warning
                .resolution_latency()
                .map_or(0, |latency| latency.num_milliseconds());
        }

        info!(
            "Resolved {} warning {} in session {} as {:?}",
            warning.code, warning_id, session_id, resolution
        );
        Ok(warning)
    }

    /// Whether no open warning blocks settlement
    pub async fn can_proceed(&self, session_id: &SessionId) -> bool {
        match self.inner.existing(session_id) {
            Some(entry) => entry.lock().await.state.active_warnings.iter().all(|w| w.can_proceed),
            None => true,
        }
    }

    /// Open warnings of a session
    pub async fn active_warnings(&self, session_id: &SessionId) -> Vec<Warning> {
        match self.inner.existing(session_id) {
            Some(entry) => entry.lock().await.state.active_warnings.clone(),
            None => Vec::new(),
        }
    }

    /// Monitoring state of a session
    pub async fn state(&self, session_id: &SessionId) -> Option<MonitoringState> {
        let entry = self.inner.existing(session_id)?;
        let monitor = entry.lock().await;
        Some(monitor.state.clone())
    }

    /// Warning counters across sessions
    pub fn metrics(&self) -> MonitorMetrics {
        let stats = self.inner.stats.lock();
        let total: usize = stats.by_severity.values().sum();
        let mut by_severity: BTreeMap<WarningSeverity, usize> =
            WarningSeverity::ALL.into_iter().map(|s| (s, 0)).collect();
        by_severity.extend(stats.by_severity.iter().map(|(s, n)| (*s, *n)));

        MonitorMetrics {
            warnings_by_severity: by_severity,
            total_warnings: total,
            active_warnings: self.inner.warning_index.len(),
            resolved_warnings: stats.resolved,
            resolution_rate: if total == 0 {
                0.0
            } else {
                stats.resolved as f64 / total as f64
            },
            mean_resolution_latency_ms: (stats.resolved > 0)
                .then(|| stats.total_latency_ms as f64 / stats.resolved as f64),
            monitored_sessions: self.inner.monitored.len(),
        }
    }
}

impl Inner {
    fn session(&self, session_id: &SessionId) -> Arc<Mutex<SessionMonitor>> {
        self.sessions
            .entry(session_id.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(SessionMonitor {
                    state: MonitoringState::new(session_id.clone()),
                    sampler: None,
                }))
            })
            .clone()
    }

    fn existing(&self, session_id: &SessionId) -> Option<Arc<Mutex<SessionMonitor>>> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    fn register(&self, warning: &Warning) {
        self.warning_index
            .insert(warning.warning_id, warning.session_id.clone());
        *self.stats.lock().by_severity.entry(warning.severity).or_default() += 1;
        if let Some(metrics) = &self.metrics {
            metrics.record_warning(warning.severity.name());
        }
    }

    /// Drop open warnings that do not block settlement once they outlive
    /// the retention window or overflow the per-session limit
    fn expire_open(&self, state: &mut MonitoringState, config: &MonitorConfig, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(config.retention_hours);
        let mut expired = Vec::new();
        state.active_warnings.retain(|w| {
            let keep = !w.can_proceed || w.created_at >= cutoff;
            if !keep {
                expired.push(w.warning_id);
            }
            keep
        });

        // Oldest first
        let mut overflow = state.active_warnings.len().saturating_sub(config.active_warning_limit);
        state.active_warnings.retain(|w| {
            if overflow > 0 && w.can_proceed {
                overflow -= 1;
                expired.push(w.warning_id);
                return false;
            }
            true
        });

        if expired.is_empty() {
            return;
        }
        for warning_id in &expired {
            self.warning_index.remove(warning_id);
        }
        debug!(
            "Expired {} open warnings in session {}",
            expired.len(),
            state.session_id
        );
    }

    fn update_monitored_gauge(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.set_monitored_sessions(self.monitored.len());
        }
    }

    /// Snapshot balances and flag zero-sum drift
    pub(crate) async fn sample(&self, session_id: &SessionId, config: &MonitorConfig) -> Result<BalanceSnapshot> {
        let positions = self.calculator.calculate_positions(session_id).await?;
        let net_total = net_sum(&positions);
        let snapshot = BalanceSnapshot {
            taken_at: Utc::now(),
            net_total,
            bank: bank_balance(session_id, &positions, config.tolerance),
            positions: positions
                .iter()
                .map(|p| (p.player_id.clone(), p.net_position))
                .collect(),
        };

        let entry = self.session(session_id);
        let mut monitor = entry.lock().await;
        let state = &mut monitor.state;
        state.balance_snapshots.push(snapshot.clone());
        truncate_front(&mut state.balance_snapshots, config.snapshot_limit);

        if net_total.abs() > config.tolerance && !state.has_open(WarningCode::BalanceDrift, None) {
            let drift = net_total.abs();
            let warning = Warning::new(
                session_id.clone(),
                WarningCode::BalanceDrift,
                WarningSeverity::classify(drift, &config.thresholds),
                format!("Positions sum to {} instead of zero", net_total),
                Vec::new(),
                drift,
            )
            .requiring_approval()
            .with_actions(&["Recount chips", "Review recent adjustments"]);

            warn!("Session {} drifted by {}", session_id, net_total);
            self.register(&warning);
            state.active_warnings.push(warning);
        }
        self.expire_open(state, config, snapshot.taken_at);

        debug!("Sampled session {}: Σ = {}", session_id, net_total);
        Ok(snapshot)
    }
}

fn validate_request(request: &AdjustmentRequest) -> Result<()> {
    if request.session_id.as_str().trim().is_empty() {
        return Err(Error::InvalidInput("Session id must not be empty".to_string()));
    }
    if request.player_id.as_str().trim().is_empty() {
        return Err(Error::InvalidInput("Player id must not be empty".to_string()));
    }
    if request.actor.trim().is_empty() {
        return Err(Error::InvalidInput("Adjustment actor must not be empty".to_string()));
    }
    if request.delta.is_zero() {
        return Err(Error::InvalidInput("Adjustment delta must not be zero".to_string()));
    }
    if has_sub_cent(request.delta) {
        return Err(Error::InvalidInput(format!(
            "Adjustment delta {} is finer than one cent",
            request.delta
        )));
    }
    Ok(())
}

fn standing_position_warning(
    state: &MonitoringState,
    session_id: &SessionId,
    position: &PlayerPosition,
    config: &MonitorConfig,
) -> Option<Warning> {
    let thresholds = &config.thresholds;
    let net = position.net_position;

    let (code, severity, message, actions): (_, _, _, &[&str]) = if net > thresholds.large_positive_position {
        (
            WarningCode::LargePositivePosition,
            WarningSeverity::Minor,
            format!("{} is up {}", position.name, net),
            &["No action needed"],
        )
    } else if -net > thresholds.large_negative_position {
        (
            WarningCode::LargeNegativePosition,
            WarningSeverity::Major,
            format!("{} is down {}", position.name, -net),
            &["Confirm the player can cover the loss"],
        )
    } else {
        return None;
    };

    if state.has_open(code, Some(&position.player_id)) {
        return None;
    }
    Some(
        Warning::new(
            session_id.clone(),
            code,
            severity,
            message,
            vec![position.player_id.clone()],
            net.abs(),
        )
        .with_actions(actions),
    )
}

fn truncate_front<T>(items: &mut Vec<T>, limit: usize) {
    let overflow = items.len().saturating_sub(limit);
    items.drain(..overflow);
}
