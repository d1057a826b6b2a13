//! Transaction handler registry.
//!
//! Handlers are selected by `transactions.handler.name`. The built-in
//! `simple` handler is registered by default; embedders can register their
//! own factories before building the manager.

use std::collections::HashMap;
use std::sync::Arc;

use txm_connector::BlockchainConnector;
use txm_handler::ports::inbound::TransactionHandler;
use txm_handler::SimpleTransactionHandler;
use txm_persistence::Persistence;

use crate::config::Config;
use crate::errors::ManagerError;

/// Builds a transaction handler from configuration.
pub trait TransactionHandlerFactory: Send + Sync {
    fn name(&self) -> &str;

    fn new_handler(
        &self,
        config: &Config,
        persistence: Arc<dyn Persistence>,
        connector: Arc<dyn BlockchainConnector>,
    ) -> Arc<dyn TransactionHandler>;
}

/// Factory for the built-in simple handler.
pub struct SimpleHandlerFactory;

impl TransactionHandlerFactory for SimpleHandlerFactory {
    fn name(&self) -> &str {
        "simple"
    }

    fn new_handler(
        &self,
        config: &Config,
        persistence: Arc<dyn Persistence>,
        connector: Arc<dyn BlockchainConnector>,
    ) -> Arc<dyn TransactionHandler> {
        Arc::new(SimpleTransactionHandler::new(
            config.transactions.handler.simple.clone(),
            config.transactions.max_history_count,
            config.confirmations.stale_receipt_timeout,
            persistence,
            connector,
        ))
    }
}

/// Name → factory lookup.
pub struct HandlerRegistry {
    factories: HashMap<String, Arc<dyn TransactionHandlerFactory>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(Arc::new(SimpleHandlerFactory));
        registry
    }
}

impl HandlerRegistry {
    pub fn register(&mut self, factory: Arc<dyn TransactionHandlerFactory>) {
        self.factories.insert(factory.name().to_string(), factory);
    }

    /// Builds the handler named in the configuration.
    pub fn new_handler(
        &self,
        config: &Config,
        persistence: Arc<dyn Persistence>,
        connector: Arc<dyn BlockchainConnector>,
    ) -> Result<Arc<dyn TransactionHandler>, ManagerError> {
        let name = &config.transactions.handler.name;
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ManagerError::UnknownHandlerName(name.clone()))?;
        Ok(factory.new_handler(config, persistence, connector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txm_connector::mock::MockConnector;
    use txm_persistence::adapters::MemoryPersistence;

    #[test]
    fn test_default_registry_has_simple() {
        let registry = HandlerRegistry::default();
        let config = Config::default();
        let handler = registry.new_handler(
            &config,
            Arc::new(MemoryPersistence::new()),
            Arc::new(MockConnector::new()),
        );
        assert!(handler.is_ok());
    }

    #[test]
    fn test_unknown_handler_name() {
        let registry = HandlerRegistry::default();
        let mut config = Config::default();
        config.transactions.handler.name = "wrong".to_string();
        let err = registry
            .new_handler(
                &config,
                Arc::new(MemoryPersistence::new()),
                Arc::new(MockConnector::new()),
            )
            .unwrap_err();
        assert!(err.to_string().contains("FF21070"));
    }
}
