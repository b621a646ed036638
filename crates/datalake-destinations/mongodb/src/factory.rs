use crate::{MongoEventLog, MongoSinkConfig};
use async_trait::async_trait;
use datalake_core::{EventLogSink, Result, SinkFactory};
use mongodb::Database;
use serde_json::Value;
use std::sync::Arc;

/// Creates event logs in the database the processor is already connected to
pub struct MongoSinkFactory {
    database: Database,
}

impl MongoSinkFactory {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl SinkFactory for MongoSinkFactory {
    fn name(&self) -> &str {
        "mongodb"
    }

    async fn create(&self, config: Value) -> Result<Arc<dyn EventLogSink>> {
        let config: MongoSinkConfig = if config.is_null() {
            MongoSinkConfig::default()
        } else {
            serde_json::from_value(config)?
        };
        let log = MongoEventLog::open(&self.database, config).await?;
        Ok(Arc::new(log))
    }
}
