use crate::{EventLogSink, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Factory trait for creating event log sinks
#[async_trait]
pub trait SinkFactory: Send + Sync {
    /// Get the name/type identifier for this sink
    fn name(&self) -> &str;

    /// Create a connected sink from its configuration
    async fn create(&self, config: Value) -> Result<Arc<dyn EventLogSink>>;
}

/// Factory for the in-process event log
pub struct MemorySinkFactory;

#[async_trait]
impl SinkFactory for MemorySinkFactory {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create(&self, _config: Value) -> Result<Arc<dyn EventLogSink>> {
        Ok(Arc::new(crate::memory::InMemoryEventLog::new()))
    }
}
