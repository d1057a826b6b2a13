//! Pluggable gas price sources.
//!
//! Four modes: no oracle (fall back to the fixed value when configured), a
//! fixed JSON block from configuration, a connector estimate, or a REST API
//! whose response is narrowed by a template expression. REST responses are
//! cached for the configured query interval.

use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use txm_connector::{BlockchainConnector, ConnectorError};

use crate::config::{GasOracleConfig, GasOracleMode};

/// Gas oracle failure. Fails the cycle for the affected record only; the
/// loop retries on the next cycle.
#[derive(Debug, Error)]
pub enum GasOracleError {
    #[error("gas oracle request failed: {0}")]
    Request(String),

    #[error("gas oracle template path '{0}' matched nothing in the response")]
    Template(String),

    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

/// Resolves gas prices per the configured mode.
pub struct GasOracle {
    mode: GasOracleMode,
    fixed_gas_price: Option<Value>,
    url: Option<String>,
    method: String,
    template: Option<String>,
    query_interval: std::time::Duration,
    client: reqwest::Client,
    cached: Mutex<Option<(Instant, Value)>>,
}

impl GasOracle {
    pub fn new(config: &GasOracleConfig, fixed_gas_price: Option<Value>) -> Self {
        Self {
            mode: config.mode,
            fixed_gas_price,
            url: config.url.clone(),
            method: config.method.to_uppercase(),
            template: config.template.clone(),
            query_interval: config.query_interval,
            client: reqwest::Client::new(),
            cached: Mutex::new(None),
        }
    }

    /// Returns the gas price block to pass to the connector, or `None` when
    /// no price applies.
    pub async fn gas_price(
        &self,
        connector: &dyn BlockchainConnector,
    ) -> Result<Option<Value>, GasOracleError> {
        match self.mode {
            // Without an oracle the standalone fixedGasPrice value still
            // applies when configured.
            GasOracleMode::Disabled | GasOracleMode::Fixed => Ok(self.fixed_gas_price.clone()),
            GasOracleMode::Connector => {
                let res = connector.gas_price_estimate().await?;
                Ok(Some(res.gas_price))
            }
            GasOracleMode::RestApi => self.query_rest_api().await.map(Some),
        }
    }

    async fn query_rest_api(&self) -> Result<Value, GasOracleError> {
        if let Some((at, value)) = self.cached.lock().as_ref() {
            if at.elapsed() < self.query_interval {
                return Ok(value.clone());
            }
        }

        let url = self
            .url
            .as_deref()
            .ok_or_else(|| GasOracleError::Request("no URL configured".to_string()))?;
        let request = match self.method.as_str() {
            "POST" => self.client.post(url).json(&Value::Null),
            _ => self.client.get(url),
        };
        let response: Value = request
            .send()
            .await
            .map_err(|e| GasOracleError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| GasOracleError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| GasOracleError::Request(e.to_string()))?;

        let gas_price = match self.template.as_deref() {
            None | Some("") => response,
            Some(path) => extract_path(&response, path)
                .ok_or_else(|| GasOracleError::Template(path.to_string()))?,
        };

        debug!(%gas_price, "gas oracle response");
        *self.cached.lock() = Some((Instant::now(), gas_price.clone()));
        Ok(gas_price)
    }
}

/// Selects a value out of a JSON document by a dot-separated path, with
/// numeric segments indexing into arrays.
pub fn extract_path(value: &Value, path: &str) -> Option<Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use txm_connector::mock::MockConnector;

    #[tokio::test]
    async fn test_disabled_mode_uses_fixed_price_when_set() {
        let oracle = GasOracle::new(&GasOracleConfig::default(), Some(json!(12345)));
        let connector = MockConnector::new();
        let price = oracle.gas_price(&connector).await.unwrap();
        assert_eq!(price, Some(json!(12345)));
        assert_eq!(connector.gas_price_calls(), 0);
    }

    #[tokio::test]
    async fn test_disabled_mode_without_fixed_price() {
        let oracle = GasOracle::new(&GasOracleConfig::default(), None);
        let connector = MockConnector::new();
        assert_eq!(oracle.gas_price(&connector).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_connector_mode() {
        let config = GasOracleConfig {
            mode: GasOracleMode::Connector,
            ..Default::default()
        };
        let oracle = GasOracle::new(&config, None);
        let connector = MockConnector::new();
        let price = oracle.gas_price(&connector).await.unwrap();
        assert_eq!(price, Some(json!("12345")));
        assert_eq!(connector.gas_price_calls(), 1);
    }

    #[test]
    fn test_extract_path() {
        let doc = json!({
            "standard": {"maxFeePerGas": "123", "tips": [1, 2, 3]},
        });
        assert_eq!(
            extract_path(&doc, "standard.maxFeePerGas"),
            Some(json!("123"))
        );
        assert_eq!(extract_path(&doc, "standard.tips.1"), Some(json!(2)));
        assert_eq!(extract_path(&doc, "standard.missing"), None);
        assert_eq!(extract_path(&doc, "standard.tips.x"), None);
    }
}
