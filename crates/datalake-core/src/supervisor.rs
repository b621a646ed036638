use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::within;
use crate::{
    ChangeEvent, ChangeFeed, ChangeFeedSource, Collection, DataLakeEvent, Error, EventLogWriter,
    Result, SourceDocument,
};

/// Lifecycle of a single watch loop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LoopState {
    Idle,
    Subscribing,
    Watching,
    Draining,
    Stopped,
    Failed(String),
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Stopped | LoopState::Failed(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoopStatus {
    pub state: LoopState,
    pub events_processed: u64,
    pub handler_failures: u64,
    pub feed_errors: u64,
    pub last_error: Option<String>,
}

impl Default for LoopStatus {
    fn default() -> Self {
        Self {
            state: LoopState::Idle,
            events_processed: 0,
            handler_failures: 0,
            feed_errors: 0,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Collections to watch, one loop each
    pub collections: Vec<Collection>,

    /// Upper bound on opening a subscription
    pub subscribe_timeout: Option<Duration>,

    /// Consecutive feed read errors tolerated before the loop fails
    pub max_consecutive_feed_errors: u32,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            collections: Collection::ALL.to_vec(),
            subscribe_timeout: Some(Duration::from_secs(10)),
            max_consecutive_feed_errors: 5,
        }
    }
}

/// Final state of every loop once `start` has returned
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorReport {
    pub loops: Vec<(Collection, LoopStatus)>,
}

impl SupervisorReport {
    pub fn status(&self, collection: Collection) -> Option<&LoopStatus> {
        self.loops
            .iter()
            .find(|(c, _)| *c == collection)
            .map(|(_, s)| s)
    }

    pub fn events_processed(&self) -> u64 {
        self.loops.iter().map(|(_, s)| s.events_processed).sum()
    }
}

type SharedStatus = Arc<RwLock<HashMap<Collection, LoopStatus>>>;

/// Runs one change feed watch loop per collection and coordinates their shutdown
pub struct ChangeStreamSupervisor {
    source: Arc<dyn ChangeFeedSource>,
    writer: EventLogWriter,
    settings: SupervisorSettings,
    status: SharedStatus,
}

impl ChangeStreamSupervisor {
    pub fn new(
        source: Arc<dyn ChangeFeedSource>,
        writer: EventLogWriter,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            source,
            writer,
            settings,
            status: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Watch every configured collection until `cancel` fires or a loop fails.
    ///
    /// Returns once all loops have unwound. A loop that cannot open its feed, or
    /// that keeps failing to read from it, cancels its siblings and its error is
    /// returned; the caller's token itself is never cancelled here.
    pub async fn start(&self, cancel: CancellationToken) -> Result<SupervisorReport> {
        info!(
            "Starting change stream monitoring for {:?}",
            self.settings.collections
        );

        let shutdown = cancel.child_token();

        {
            let mut status = self.status.write().await;
            status.clear();
            for collection in &self.settings.collections {
                status.insert(*collection, LoopStatus::default());
            }
        }

        let handles: Vec<_> = self
            .settings
            .collections
            .iter()
            .map(|collection| {
                let watch = WatchLoop {
                    collection: *collection,
                    source: self.source.clone(),
                    writer: self.writer.clone(),
                    settings: self.settings.clone(),
                    status: self.status.clone(),
                    shutdown: shutdown.clone(),
                };
                tokio::spawn(watch.run())
            })
            .collect();

        let results = join_all(handles).await;

        let mut failure: Option<Error> = None;
        for (collection, joined) in self.settings.collections.iter().zip(results) {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    error!("[{}] Watch loop panicked: {}", collection, e);
                    failure.get_or_insert(Error::Generic(anyhow::anyhow!(
                        "watch loop for '{}' panicked: {}",
                        collection,
                        e
                    )));
                }
            }
        }

        if let Some(e) = failure {
            error!("Change stream monitoring stopped with error: {}", e);
            return Err(e);
        }

        let report = SupervisorReport {
            loops: self.loop_states().await,
        };
        info!(
            "Change stream monitoring stopped ({} events processed)",
            report.events_processed()
        );
        Ok(report)
    }

    /// Current status of every loop, in configured collection order
    pub async fn loop_states(&self) -> Vec<(Collection, LoopStatus)> {
        let status = self.status.read().await;
        self.settings
            .collections
            .iter()
            .map(|c| (*c, status.get(c).cloned().unwrap_or_default()))
            .collect()
    }
}

struct WatchLoop {
    collection: Collection,
    source: Arc<dyn ChangeFeedSource>,
    writer: EventLogWriter,
    settings: SupervisorSettings,
    status: SharedStatus,
    shutdown: CancellationToken,
}

impl WatchLoop {
    async fn run(self) -> Result<()> {
        self.set_state(LoopState::Subscribing).await;

        let subscribed = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                info!("[{}] Cancelled before subscription opened", self.collection);
                self.set_state(LoopState::Stopped).await;
                return Ok(());
            }
            subscribed = within(
                self.settings.subscribe_timeout,
                "opening change feed",
                self.source.subscribe(self.collection),
            ) => subscribed,
        };

        let mut feed = match subscribed {
            Ok(feed) => feed,
            Err(e) => {
                let e = match e {
                    Error::Subscription { .. } => e,
                    other => Error::Subscription {
                        collection: self.collection,
                        reason: other.to_string(),
                    },
                };
                error!("[{}] {}", self.collection, e);
                self.set_state(LoopState::Failed(e.to_string())).await;
                self.shutdown.cancel();
                return Err(e);
            }
        };

        info!("[{}] Watching for changes", self.collection);
        self.set_state(LoopState::Watching).await;

        let outcome = self.watch(feed.as_mut()).await;

        self.set_state(LoopState::Draining).await;
        if let Err(e) = feed.close().await {
            warn!("[{}] Failed to close change feed: {}", self.collection, e);
        }

        match outcome {
            Ok(()) => {
                self.set_state(LoopState::Stopped).await;
                info!("[{}] Watch loop stopped", self.collection);
                Ok(())
            }
            Err(e) => {
                self.set_state(LoopState::Failed(e.to_string())).await;
                self.shutdown.cancel();
                Err(e)
            }
        }
    }

    async fn watch(&self, feed: &mut dyn ChangeFeed) -> Result<()> {
        let mut consecutive_errors = 0u32;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("[{}] Stop requested", self.collection);
                    return Ok(());
                }
                next = feed.next_event() => next,
            };

            match next {
                Ok(Some(event)) => {
                    consecutive_errors = 0;
                    self.dispatch(event).await;
                }
                Ok(None) => {
                    warn!("[{}] Change feed closed", self.collection);
                    return Ok(());
                }
                // the feed is healthy, only this change's document was unreadable
                Err(Error::Decode(reason)) => {
                    consecutive_errors = 0;
                    error!("[{}] Skipping undecodable change: {}", self.collection, reason);
                    self.record(|s| {
                        s.handler_failures += 1;
                        s.last_error = Some(reason);
                    })
                    .await;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    error!(
                        "[{}] Error receiving change ({}/{}): {}",
                        self.collection, consecutive_errors, self.settings.max_consecutive_feed_errors, e
                    );
                    self.record(|s| {
                        s.feed_errors += 1;
                        s.last_error = Some(e.to_string());
                    })
                    .await;

                    if consecutive_errors >= self.settings.max_consecutive_feed_errors {
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Handle one event; failures are logged and never stop the loop
    async fn dispatch(&self, event: ChangeEvent) {
        let document_key = event.document_key.clone();

        match self.handle(event).await {
            Ok(written) => {
                debug!("[{}] Stored event {}", self.collection, written.id);
                self.record(|s| s.events_processed += 1).await;
            }
            Err(e) => {
                error!(
                    "[{}] Failed to process change on document {}: {}",
                    self.collection, document_key, e
                );
                self.record(|s| {
                    s.handler_failures += 1;
                    s.last_error = Some(format!("{}: {}", document_key, e));
                })
                .await;
            }
        }
    }

    async fn handle(&self, event: ChangeEvent) -> Result<DataLakeEvent> {
        let event_name = event.event_name();
        info!(
            "[{}] Processing {} on {}: {}",
            self.collection,
            event.operation,
            event.collection.entity_kind(),
            event.document_key
        );

        match event.collection {
            Collection::Orders => {
                let order = match (&event.full_document, event.operation.carries_document()) {
                    (Some(SourceDocument::Order(order)), true) => Some(order),
                    (Some(other), true) => {
                        return Err(Error::Decode(format!(
                            "expected an order document, got {}",
                            other.collection().entity_kind()
                        )))
                    }
                    _ => None,
                };

                self.writer
                    .append_enriched(
                        &event_name,
                        event.operation,
                        event.collection,
                        &event.document_key,
                        order,
                    )
                    .await
            }
            Collection::Customers | Collection::Items => {
                self.writer
                    .append_simple(
                        &event_name,
                        event.operation,
                        event.collection,
                        &event.document_key,
                    )
                    .await
            }
        }
    }

    async fn set_state(&self, state: LoopState) {
        debug!("[{}] -> {:?}", self.collection, state);
        self.record(|s| s.state = state).await;
    }

    async fn record(&self, update: impl FnOnce(&mut LoopStatus)) {
        let mut status = self.status.write().await;
        update(status.entry(self.collection).or_default());
    }
}
