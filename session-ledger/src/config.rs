//! Configuration for the session ledger

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Budget for a single source read (milliseconds)
    pub read_timeout_ms: u64,

    /// Balance tolerance (one minimum currency unit)
    pub tolerance: Decimal,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_timeout_ms: 5_000,
            tolerance: Decimal::new(1, 2), // 0.01
        }
    }
}

impl Config {
    /// Read timeout as a duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(timeout) = std::env::var("LEDGER_READ_TIMEOUT_MS") {
            config.read_timeout_ms = timeout
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid LEDGER_READ_TIMEOUT_MS: {}", e)))?;
        }

        if let Ok(tolerance) = std::env::var("LEDGER_TOLERANCE") {
            config.tolerance = tolerance
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid LEDGER_TOLERANCE: {}", e)))?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.read_timeout_ms, 5_000);
        assert_eq!(config.tolerance, Decimal::new(1, 2));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "read_timeout_ms = 250\ntolerance = \"0.05\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.read_timeout_ms, 250);
        assert_eq!(config.tolerance, Decimal::new(5, 2));
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "read_timeout_ms = \"soon\"").unwrap();

        assert!(matches!(
            Config::from_file(file.path()),
            Err(crate::Error::Config(_))
        ));
    }
}
