use crate::{Error, EventLogSink, Result, SinkFactory};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry for event log sink factories
pub struct Registry {
    sink_factories: HashMap<String, Arc<dyn SinkFactory>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            sink_factories: HashMap::new(),
        }
    }

    /// Register a sink factory
    pub fn register_sink(&mut self, factory: Arc<dyn SinkFactory>) {
        let name = factory.name().to_string();
        self.sink_factories.insert(name, factory);
    }

    /// Get a sink factory by name
    pub fn get_sink_factory(&self, name: &str) -> Result<Arc<dyn SinkFactory>> {
        self.sink_factories
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("Sink factory '{}' not found", name)))
    }

    /// Build a sink of the given type
    pub async fn create_sink(&self, name: &str, config: Value) -> Result<Arc<dyn EventLogSink>> {
        self.get_sink_factory(name)?.create(config).await
    }

    /// List all registered sink types
    pub fn list_sinks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sink_factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register_sink(Arc::new(crate::MemorySinkFactory));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_registered_sink() {
        let registry = Registry::default();
        assert_eq!(registry.list_sinks(), vec!["memory".to_string()]);

        let sink = registry
            .create_sink("memory", Value::Null)
            .await
            .unwrap();
        assert_eq!(sink.kind(), "memory");
    }

    #[tokio::test]
    async fn unknown_sink_is_a_configuration_error() {
        let registry = Registry::new();
        let err = registry.create_sink("kafka", Value::Null).await.err().unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
