//! Warning types and classification

use super::correction::AutoCorrection;
use crate::{
    config::WarningThresholds,
    types::{PlayerId, SessionId},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Warning severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningSeverity {
    /// Informational
    Minor,
    /// Needs approval, settlement may proceed
    Major,
    /// Blocks settlement until resolved
    Critical,
}

impl WarningSeverity {
    /// Every severity
    pub const ALL: [WarningSeverity; 3] =
        [WarningSeverity::Minor, WarningSeverity::Major, WarningSeverity::Critical];

    /// Stable name
    pub fn name(&self) -> &'static str {
        match self {
            WarningSeverity::Minor => "minor",
            WarningSeverity::Major => "major",
            WarningSeverity::Critical => "critical",
        }
    }

    /// Classify a balance impact
    pub fn classify(impact: Decimal, thresholds: &WarningThresholds) -> Self {
        if impact >= thresholds.critical_impact {
            WarningSeverity::Critical
        } else if impact >= thresholds.major_impact {
            WarningSeverity::Major
        } else {
            WarningSeverity::Minor
        }
    }
}

impl fmt::Display for WarningSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Warning code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningCode {
    /// A manual adjustment moved the balance
    BalanceAdjustment,
    /// A single adjustment above the large-amount threshold
    LargeAdjustment,
    /// Too many adjustments to one player inside the window
    FrequentAdjustments,
    /// A player is far ahead
    LargePositivePosition,
    /// A player is far behind
    LargeNegativePosition,
    /// Sampled positions no longer sum to zero
    BalanceDrift,
}

impl fmt::Display for WarningCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            WarningCode::BalanceAdjustment => "BALANCE_ADJUSTMENT",
            WarningCode::LargeAdjustment => "LARGE_ADJUSTMENT",
            WarningCode::FrequentAdjustments => "FREQUENT_ADJUSTMENTS",
            WarningCode::LargePositivePosition => "LARGE_POSITIVE_POSITION",
            WarningCode::LargeNegativePosition => "LARGE_NEGATIVE_POSITION",
            WarningCode::BalanceDrift => "BALANCE_DRIFT",
        };
        write!(f, "{}", code)
    }
}

/// Warning status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningStatus {
    /// Awaiting resolution
    Open,
    /// Resolved
    Resolved,
}

/// How a warning was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Accepted as is
    Approved,
    /// Proposed auto-correction applied
    Corrected,
    /// Adjustment reverted
    Reverted,
    /// Judged not to be a problem
    Dismissed,
}

/// Resolution record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningResolution {
    /// Resolution
    pub resolution: Resolution,
    /// Why
    pub reason: String,
    /// When
    pub resolved_at: DateTime<Utc>,
}

/// Audit trail entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When
    pub at: DateTime<Utc>,
    /// Status after the action
    pub status: WarningStatus,
    /// What happened
    pub note: String,
}

/// Warning raised by the monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warning {
    /// Warning id
    pub warning_id: Uuid,
    /// Session
    pub session_id: SessionId,
    /// Code
    pub code: WarningCode,
    /// Severity
    pub severity: WarningSeverity,
    /// Human-readable message
    pub message: String,
    /// Players involved
    pub affected_players: Vec<PlayerId>,
    /// Absolute balance impact
    pub balance_impact: Decimal,
    /// Settlement may go ahead while this is open
    pub can_proceed: bool,
    /// Someone must approve before settling
    pub requires_approval: bool,
    /// What to do about it
    pub suggested_actions: Vec<String>,
    /// Reversible correction proposal
    pub auto_correction: Option<AutoCorrection>,
    /// Status
    pub status: WarningStatus,
    /// Resolution, once resolved
    pub resolution: Option<WarningResolution>,
    /// created → resolved
    pub audit_trail: Vec<AuditEntry>,
    /// Created
    pub created_at: DateTime<Utc>,
    /// Resolved
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Warning {
    /// Open a warning; approval and blocking follow from severity
    pub fn new(
        session_id: SessionId,
        code: WarningCode,
        severity: WarningSeverity,
        message: String,
        affected_players: Vec<PlayerId>,
        balance_impact: Decimal,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            warning_id: Uuid::new_v4(),
            session_id,
            code,
            severity,
            message,
            affected_players,
            balance_impact,
            can_proceed: severity != WarningSeverity::Critical,
            requires_approval: severity >= WarningSeverity::Major,
            suggested_actions: Vec::new(),
            auto_correction: None,
            status: WarningStatus::Open,
            resolution: None,
            audit_trail: vec![AuditEntry {
                at: created_at,
                status: WarningStatus::Open,
                note: format!("{} created ({})", code, severity),
            }],
            created_at,
            resolved_at: None,
        }
    }

    /// Force approval regardless of severity
    pub fn requiring_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    /// Attach suggested actions
    pub fn with_actions(mut self, actions: &[&str]) -> Self {
        self.suggested_actions = actions.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Whether still open
    pub fn is_open(&self) -> bool {
        self.status == WarningStatus::Open
    }

    /// Move to resolved
    pub(crate) fn resolve(&mut self, resolution: Resolution, reason: String) {
        let now = Utc::now();
        self.status = WarningStatus::Resolved;
        self.audit_trail.push(AuditEntry {
            at: now,
            status: WarningStatus::Resolved,
            note: format!("Resolved as {:?}: {}", resolution, reason),
        });
        self.resolution = Some(WarningResolution {
            resolution,
            reason,
            resolved_at: now,
        });
        self.resolved_at = Some(now);
    }

    /// Time from creation to resolution
    pub fn resolution_latency(&self) -> Option<chrono::Duration> {
        self.resolved_at.map(|at| at - self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let thresholds = WarningThresholds::default();
        assert_eq!(WarningSeverity::classify(Decimal::new(15, 2), &thresholds), WarningSeverity::Minor);
        assert_eq!(WarningSeverity::classify(Decimal::from(5), &thresholds), WarningSeverity::Major);
        assert_eq!(WarningSeverity::classify(Decimal::from(30), &thresholds), WarningSeverity::Critical);
    }

    #[test]
    fn test_severity_flags() {
        let critical = Warning::new(
            SessionId::new("s1"),
            WarningCode::BalanceAdjustment,
            WarningSeverity::Critical,
            "big".to_string(),
            vec![],
            Decimal::from(30),
        );
        assert!(!critical.can_proceed);
        assert!(critical.requires_approval);

        let minor = Warning::new(
            SessionId::new("s1"),
            WarningCode::LargePositivePosition,
            WarningSeverity::Minor,
            "ahead".to_string(),
            vec![],
            Decimal::ZERO,
        );
        assert!(minor.can_proceed);
        assert!(!minor.requires_approval);
        assert!(minor.clone().requiring_approval().requires_approval);
    }

    #[test]
    fn test_resolve_appends_audit() {
        let mut warning = Warning::new(
            SessionId::new("s1"),
            WarningCode::BalanceAdjustment,
            WarningSeverity::Major,
            "moved".to_string(),
            vec![],
            Decimal::from(6),
        );
        warning.resolve(Resolution::Approved, "host confirmed".to_string());

        assert!(!warning.is_open());
        assert_eq!(warning.audit_trail.len(), 2);
        assert_eq!(warning.audit_trail[1].status, WarningStatus::Resolved);
        assert!(warning.resolution_latency().is_some());
    }
}
