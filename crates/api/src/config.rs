//! Application configuration loaded from environment variables.

/// Default probability that the demonstration payment gateway approves a charge.
pub const DEFAULT_PAYMENT_APPROVAL_RATE: f64 = 0.5;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: PostgreSQL ledger; unset means an in-memory ledger
/// - `TRANSITS_API`: remote transits service; unset means in-process inventory
/// - `PAYMENT_APPROVAL_RATE`: approval probability in `[0, 1]` (default: `0.5`)
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub transits_api: Option<String>,
    pub payment_approval_rate: f64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            host: non_empty("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: non_empty("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            log_level: non_empty("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            database_url: non_empty("DATABASE_URL"),
            transits_api: non_empty("TRANSITS_API"),
            payment_approval_rate: non_empty("PAYMENT_APPROVAL_RATE")
                .and_then(|r| r.parse::<f64>().ok())
                .filter(|r| !r.is_nan())
                .map(|r| r.clamp(0.0, 1.0))
                .unwrap_or(DEFAULT_PAYMENT_APPROVAL_RATE),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            transits_api: None,
            payment_approval_rate: DEFAULT_PAYMENT_APPROVAL_RATE,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert!(config.database_url.is_none());
        assert!(config.transits_api.is_none());
        assert_eq!(config.payment_approval_rate, 0.5);
    }

    #[test]
    fn test_empty_environment_matches_defaults() {
        assert_eq!(config_from(&[]), Config::default());
    }

    #[test]
    fn test_reads_backends() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/saga"),
            ("TRANSITS_API", "http://transits.local/transits"),
            ("PORT", "8080"),
        ]);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/saga")
        );
        assert_eq!(
            config.transits_api.as_deref(),
            Some("http://transits.local/transits")
        );
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_approval_rate_is_clamped() {
        assert_eq!(
            config_from(&[("PAYMENT_APPROVAL_RATE", "1.7")]).payment_approval_rate,
            1.0
        );
        assert_eq!(
            config_from(&[("PAYMENT_APPROVAL_RATE", "-2")]).payment_approval_rate,
            0.0
        );
        assert_eq!(
            config_from(&[("PAYMENT_APPROVAL_RATE", "often")]).payment_approval_rate,
            0.5
        );
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let config = config_from(&[("DATABASE_URL", "  "), ("PORT", "not-a-port")]);
        assert!(config.database_url.is_none());
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }
}
