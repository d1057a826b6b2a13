//! Handler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Configuration of the simple transaction handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimpleHandlerConfig {
    /// Maximum transactions held in flight with the policy loop.
    pub max_in_flight: usize,
    /// Interval between policy loop cycles when nothing wakes it earlier.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// How fresh the most recent local transaction record must be before the
    /// node is asked for the next nonce instead.
    #[serde(with = "humantime_serde")]
    pub nonce_state_timeout: Duration,
    /// Time without a receipt before a transaction is re-sent (same nonce).
    #[serde(with = "humantime_serde")]
    pub resubmit_interval: Duration,
    /// A fixed gasPrice value/structure to pass to the connector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_gas_price: Option<Value>,
    /// Backoff for retryable submission failures.
    pub retry: RetryConfig,
    /// Gas oracle selection.
    pub gas_oracle: GasOracleConfig,
}

impl Default for SimpleHandlerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 100,
            interval: Duration::from_secs(10),
            nonce_state_timeout: Duration::from_secs(60 * 60),
            resubmit_interval: Duration::from_secs(5 * 60),
            fixed_gas_price: None,
            retry: RetryConfig::default(),
            gas_oracle: GasOracleConfig::default(),
        }
    }
}

/// Bounded exponential backoff parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before the given (1-based) retry attempt, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_delay.as_secs_f64();
        for _ in 1..attempt {
            delay *= self.factor;
            if delay >= self.max_delay.as_secs_f64() {
                return self.max_delay;
            }
        }
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Gas price source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GasOracleMode {
    /// No oracle; the standalone `fixedGasPrice` value is used if set.
    #[default]
    Disabled,
    /// The `fixedGasPrice` value from configuration.
    Fixed,
    /// Ask the connector for an estimate.
    Connector,
    /// Query a REST API and extract the price with a template expression.
    RestApi,
}

/// Gas oracle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GasOracleConfig {
    pub mode: GasOracleMode,
    /// REST API mode: URL of the oracle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// REST API mode: HTTP method, GET or POST.
    pub method: String,
    /// REST API mode: dot-separated path selecting the gas price block out of
    /// the response JSON (empty = whole response).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Minimum interval between oracle queries; responses are cached.
    #[serde(with = "humantime_serde")]
    pub query_interval: Duration,
}

impl Default for GasOracleConfig {
    fn default() -> Self {
        Self {
            mode: GasOracleMode::Disabled,
            url: None,
            method: "GET".to_string(),
            template: None,
            query_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Duration fields serialize as humane strings ("250ms", "10s", "1h").
pub mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() != 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(hours) = s.strip_suffix('h') {
            hours
                .trim()
                .parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
                .map_err(|_| "invalid hours")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else {
            // Plain number of seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SimpleHandlerConfig::default();
        assert_eq!(config.max_in_flight, 100);
        assert_eq!(config.interval, Duration::from_secs(10));
        assert_eq!(config.nonce_state_timeout, Duration::from_secs(3600));
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.retry.max_delay, Duration::from_secs(30));
        assert_eq!(config.retry.factor, 2.0);
        assert_eq!(config.gas_oracle.mode, GasOracleMode::Disabled);
        assert_eq!(config.gas_oracle.method, "GET");
    }

    #[test]
    fn test_duration_parsing() {
        use humantime_serde::parse_duration;
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
        assert!(parse_duration("abc").is_err());
    }

    #[test]
    fn test_config_from_json() {
        let config: SimpleHandlerConfig = serde_json::from_str(
            r#"{
                "maxInFlight": 10,
                "interval": "0s",
                "fixedGasPrice": 12345,
                "gasOracle": {"mode": "connector"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.max_in_flight, 10);
        assert_eq!(config.interval, Duration::ZERO);
        assert_eq!(config.fixed_gas_price, Some(serde_json::json!(12345)));
        assert_eq!(config.gas_oracle.mode, GasOracleMode::Connector);
        // Unset sections keep their defaults
        assert_eq!(config.retry.factor, 2.0);
    }

    #[test]
    fn test_backoff_delays() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(250));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(500));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(1000));
        // Capped at max_delay
        assert_eq!(retry.delay_for_attempt(20), Duration::from_secs(30));
    }
}
