use crate::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Upfront check that the data source can serve change feeds.
/// The supervisor must not be started when this fails
#[async_trait]
pub trait ReadinessGate: Send + Sync {
    async fn check(&self) -> Result<ReadinessReport>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReadinessReport {
    /// Replica set name or cluster kind serving change streams
    pub topology: String,
    pub present_collections: Vec<String>,
    /// Watched collections that do not exist yet; they are created on first write
    pub missing_collections: Vec<String>,
}
