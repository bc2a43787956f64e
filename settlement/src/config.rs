//! Configuration for the settlement core
//!
//! Configuration is a plain, versioned value. Components take the section
//! they need by reference on every call; nothing mutates it in place.

use crate::optimizer::Algorithm;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settlement core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version, bumped on every threshold change
    pub version: u32,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Budget for a whole request (read + compute)
    pub request_timeout_ms: u64,

    /// Session ledger configuration
    pub ledger: session_ledger::Config,

    /// Optimizer configuration
    pub optimizer: OptimizerConfig,

    /// Validation configuration
    pub validation: ValidationConfig,

    /// Proof configuration
    pub proof: ProofConfig,

    /// Warning monitor configuration
    pub monitor: MonitorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            service_name: "settlement-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            request_timeout_ms: 10_000,
            ledger: session_ledger::Config::default(),
            optimizer: OptimizerConfig::default(),
            validation: ValidationConfig::default(),
            proof: ProofConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

/// Optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Algorithm used when the caller does not pick one
    pub default_algorithm: Algorithm,

    /// Time budget for one optimization (default: 2s for ~100 players)
    pub time_budget_ms: u64,

    /// Largest non-zero player count searched exhaustively
    pub exhaustive_player_limit: usize,

    /// Zero-sum tolerance
    pub tolerance: Decimal,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            default_algorithm: Algorithm::Greedy,
            time_budget_ms: 2_000,
            exhaustive_player_limit: 14,
            tolerance: Decimal::new(1, 2),
        }
    }
}

impl OptimizerConfig {
    /// Time budget as a duration
    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }
}

/// Validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Balance tolerance
    pub tolerance: Decimal,

    /// Cumulative rounding loss at which rounding becomes an error
    pub max_rounding_loss: Decimal,

    /// Cached validations kept
    pub cache_capacity: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            tolerance: Decimal::new(1, 2),
            max_rounding_loss: Decimal::new(1, 2),
            cache_capacity: 256,
        }
    }
}

/// Proof configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProofConfig {
    /// Agreement tolerance between algorithms
    pub tolerance: Decimal,

    /// Proofs older than this are stale
    pub retention_days: i64,

    /// Maximum line width of the compact export
    pub compact_line_width: usize,

    /// List items shown in the compact export before "+N more"
    pub compact_max_items: usize,

    /// Export records kept per proof
    pub export_history_limit: usize,

    /// Hex-encoded 32-byte Ed25519 seed; random key when absent
    pub signing_seed: Option<String>,

    /// Hex public keys whose proofs verify besides the generator's own
    pub trusted_public_keys: Vec<String>,
}

impl Default for ProofConfig {
    fn default() -> Self {
        Self {
            tolerance: Decimal::new(1, 2),
            retention_days: 7,
            compact_line_width: 48,
            compact_max_items: 5,
            export_history_limit: 20,
            signing_seed: None,
            trusted_public_keys: Vec::new(),
        }
    }
}

/// Warning monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Balance tolerance
    pub tolerance: Decimal,

    /// Classification thresholds
    pub thresholds: WarningThresholds,

    /// Sampling interval of a monitored session
    pub sampling_interval_ms: u64,

    /// Balance snapshots kept per session
    pub snapshot_limit: usize,

    /// Adjustments kept per session
    pub adjustment_history_limit: usize,

    /// Resolved warnings kept per session
    pub warning_history_limit: usize,

    /// Resolved warnings, and open ones that do not block settlement,
    /// are dropped once older than this
    pub retention_hours: i64,

    /// Open warnings kept per session; the oldest non-blocking go first
    pub active_warning_limit: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tolerance: Decimal::new(1, 2),
            thresholds: WarningThresholds::default(),
            sampling_interval_ms: 30_000,
            snapshot_limit: 120,
            adjustment_history_limit: 500,
            warning_history_limit: 200,
            retention_hours: 72,
            active_warning_limit: 100,
        }
    }
}

impl MonitorConfig {
    /// Sampling interval as a duration
    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }
}

/// Manual adjustment thresholds
///
/// All defaults are illustrative house policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarningThresholds {
    /// Impact at which an adjustment becomes major
    pub major_impact: Decimal,

    /// Impact at which an adjustment becomes critical
    pub critical_impact: Decimal,

    /// Single delta flagged as LARGE_ADJUSTMENT
    pub large_adjustment: Decimal,

    /// Adjustments per player tolerated inside the window
    pub frequent_count: usize,

    /// Frequency window (minutes)
    pub frequent_window_mins: i64,

    /// Standing position flagged as LARGE_POSITIVE_POSITION
    pub large_positive_position: Decimal,

    /// Standing loss flagged as LARGE_NEGATIVE_POSITION
    pub large_negative_position: Decimal,

    /// Impacts up to this amount get an auto-correction proposal
    pub auto_correction_max: Decimal,
}

impl Default for WarningThresholds {
    fn default() -> Self {
        Self {
            major_impact: Decimal::new(500, 2),     // 5.00
            critical_impact: Decimal::new(2500, 2), // 25.00
            large_adjustment: Decimal::from(100),
            frequent_count: 4,
            frequent_window_mins: 30,
            large_positive_position: Decimal::from(500),
            large_negative_position: Decimal::from(500),
            auto_correction_max: Decimal::ONE,
        }
    }
}

impl Config {
    /// Request timeout as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(algorithm) = std::env::var("SETTLEMENT_ALGORITHM") {
            config.optimizer.default_algorithm = algorithm.parse()?;
        }

        if let Ok(budget) = std::env::var("SETTLEMENT_TIME_BUDGET_MS") {
            config.optimizer.time_budget_ms = parse_env("SETTLEMENT_TIME_BUDGET_MS", &budget)?;
        }

        if let Ok(timeout) = std::env::var("SETTLEMENT_REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = parse_env("SETTLEMENT_REQUEST_TIMEOUT_MS", &timeout)?;
        }

        if let Ok(days) = std::env::var("SETTLEMENT_PROOF_RETENTION_DAYS") {
            config.proof.retention_days = parse_env("SETTLEMENT_PROOF_RETENTION_DAYS", &days)?;
        }

        if let Ok(seed) = std::env::var("SETTLEMENT_SIGNING_SEED") {
            config.proof.signing_seed = Some(seed);
        }

        if let Ok(keys) = std::env::var("SETTLEMENT_TRUSTED_KEYS") {
            config.proof.trusted_public_keys = keys
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject threshold sets that cannot classify consistently
    pub fn validate(&self) -> crate::Result<()> {
        let t = &self.monitor.thresholds;
        if t.major_impact >= t.critical_impact {
            return Err(crate::Error::Config(format!(
                "major_impact {} must be below critical_impact {}",
                t.major_impact, t.critical_impact
            )));
        }
        if t.frequent_window_mins <= 0 {
            return Err(crate::Error::Config(
                "frequent_window_mins must be positive".to_string(),
            ));
        }
        if self.optimizer.tolerance < rust_decimal::Decimal::ZERO {
            return Err(crate::Error::Config("tolerance must not be negative".to_string()));
        }
        if self.proof.compact_line_width < 16 {
            return Err(crate::Error::Config(
                "compact_line_width must be at least 16".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> crate::Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| crate::Error::Config(format!("Invalid {}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.version, 1);
        assert_eq!(config.optimizer.default_algorithm, Algorithm::Greedy);
        assert_eq!(config.optimizer.time_budget_ms, 2_000);
        assert_eq!(config.proof.retention_days, 7);
        assert_eq!(config.monitor.thresholds.frequent_count, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "version = 3\n\n[optimizer]\ndefault_algorithm = \"minimal_transactions\"\n\n[monitor.thresholds]\nfrequent_count = 2"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.version, 3);
        assert_eq!(config.optimizer.default_algorithm, Algorithm::MinimalTransactions);
        assert_eq!(config.optimizer.time_budget_ms, 2_000);
        assert_eq!(config.monitor.thresholds.frequent_count, 2);
        assert_eq!(config.monitor.thresholds.frequent_window_mins, 30);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut config = Config::default();
        config.monitor.thresholds.major_impact = Decimal::from(50);
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
    }
}
