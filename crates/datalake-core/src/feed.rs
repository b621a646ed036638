use crate::{ChangeEvent, Collection, Result};
use async_trait::async_trait;

/// Opens change feed subscriptions, one per watched collection
#[async_trait]
pub trait ChangeFeedSource: Send + Sync {
    /// Open an ordered subscription on the collection's change feed.
    /// Insert and update events must carry the full post-change document.
    async fn subscribe(&self, collection: Collection) -> Result<Box<dyn ChangeFeed>>;
}

/// An open subscription on a single collection's change feed
#[async_trait]
pub trait ChangeFeed: Send {
    fn collection(&self) -> Collection;

    /// Wait for the next change event.
    /// Returns None if the feed is closed
    async fn next_event(&mut self) -> Result<Option<ChangeEvent>>;

    /// Release the subscription
    async fn close(&mut self) -> Result<()>;

    /// Get feed status information
    fn status(&self) -> FeedStatus;
}

#[derive(Debug, Clone, Default)]
pub struct FeedStatus {
    pub open: bool,
    pub events_received: u64,
    pub events_skipped: u64,
    pub errors: u64,
    pub last_error: Option<String>,
}
