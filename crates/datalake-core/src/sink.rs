use crate::{DataLakeEvent, LakeStatistics, Result};
use async_trait::async_trait;

/// Append-only store for data lake events
#[async_trait]
pub trait EventLogSink: Send + Sync {
    /// Short name of the backing store, used in logs
    fn kind(&self) -> &str;

    /// Atomically append a single event
    async fn append(&self, event: &DataLakeEvent) -> Result<()>;

    /// Read back totals, per-name and per-operation counts and the latest events
    async fn statistics(&self) -> Result<LakeStatistics>;
}
