use crate::Collection;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Failed to open change feed for '{collection}': {reason}")]
    Subscription {
        collection: Collection,
        reason: String,
    },

    #[error("Readiness check failed: {0}")]
    Readiness(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Customer lookup error: {0}")]
    Lookup(String),

    #[error("Event log error: {0}")]
    Sink(String),

    #[error("Timed out after {millis}ms while {action}")]
    Timeout { action: String, millis: u64 },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl Error {
    /// True for failures that must stop the process rather than a single event.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            Error::Subscription { .. } | Error::Readiness(_) | Error::Configuration(_)
        )
    }
}

/// Await `fut`, failing with [`Error::Timeout`] if `limit` elapses first
pub(crate) async fn within<T, F>(limit: Option<Duration>, action: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| Error::Timeout {
            action: action.to_string(),
            millis: limit.as_millis() as u64,
        })?,
        None => fut.await,
    }
}
