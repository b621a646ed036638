use crate::{PostgresConfig, PostgresEventLog};
use async_trait::async_trait;
use datalake_core::{EventLogSink, Result, SinkFactory};
use serde_json::Value;
use std::sync::Arc;

pub struct PostgresSinkFactory;

#[async_trait]
impl SinkFactory for PostgresSinkFactory {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn create(&self, config: Value) -> Result<Arc<dyn EventLogSink>> {
        let config: PostgresConfig = serde_json::from_value(config)?;
        let log = PostgresEventLog::connect(config).await?;
        Ok(Arc::new(log))
    }
}
