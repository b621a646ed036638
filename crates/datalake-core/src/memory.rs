//! In-process implementations of the source, lookup and sink traits.
//!
//! Used by the `memory` sink type and as test doubles for the supervisor.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::{
    ChangeEvent, ChangeFeed, ChangeFeedSource, Collection, Customer, CustomerLookup,
    DataLakeEvent, Error, EventLogSink, FeedStatus, LakeStatistics, Result,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Customer store backed by a map
#[derive(Default)]
pub struct InMemoryCustomers {
    customers: Mutex<HashMap<String, Customer>>,
}

impl InMemoryCustomers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, customer: Customer) {
        lock(&self.customers).insert(customer.id.clone(), customer);
    }

    pub fn remove(&self, customer_id: &str) -> Option<Customer> {
        lock(&self.customers).remove(customer_id)
    }
}

#[async_trait]
impl CustomerLookup for InMemoryCustomers {
    async fn find_customer(&self, customer_id: &str) -> Result<Option<Customer>> {
        Ok(lock(&self.customers).get(customer_id).cloned())
    }
}

/// Event log kept in a vector, in append order
#[derive(Default)]
pub struct InMemoryEventLog {
    events: Mutex<Vec<DataLakeEvent>>,
    failures_pending: Mutex<usize>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` appends fail with a sink error
    pub fn fail_next(&self, count: usize) {
        *lock(&self.failures_pending) = count;
    }

    pub fn events(&self) -> Vec<DataLakeEvent> {
        lock(&self.events).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.events).is_empty()
    }
}

#[async_trait]
impl EventLogSink for InMemoryEventLog {
    fn kind(&self) -> &str {
        "memory"
    }

    async fn append(&self, event: &DataLakeEvent) -> Result<()> {
        {
            let mut pending = lock(&self.failures_pending);
            if *pending > 0 {
                *pending -= 1;
                return Err(Error::Sink("Injected append failure".to_string()));
            }
        }

        lock(&self.events).push(event.clone());
        Ok(())
    }

    async fn statistics(&self) -> Result<LakeStatistics> {
        Ok(LakeStatistics::from_events(lock(&self.events).iter()))
    }
}

type FeedItem = Result<ChangeEvent>;

/// Change feed source fed through channels, one per collection.
///
/// Events pushed with [`FeedPublisher`] are delivered in order to the
/// subscription of their collection. Dropping the publisher closes every feed.
pub struct ChannelFeedSource {
    receivers: Mutex<HashMap<Collection, mpsc::UnboundedReceiver<FeedItem>>>,
    refused: Mutex<HashSet<Collection>>,
}

#[derive(Clone)]
pub struct FeedPublisher {
    senders: HashMap<Collection, mpsc::UnboundedSender<FeedItem>>,
}

impl ChannelFeedSource {
    pub fn new() -> (Self, FeedPublisher) {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();

        for collection in Collection::ALL {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(collection, tx);
            receivers.insert(collection, rx);
        }

        let source = Self {
            receivers: Mutex::new(receivers),
            refused: Mutex::new(HashSet::new()),
        };
        (source, FeedPublisher { senders })
    }

    /// Make subscriptions on `collection` fail, as when the topology cannot serve change feeds
    pub fn refuse_subscription(&self, collection: Collection) {
        lock(&self.refused).insert(collection);
    }
}

#[async_trait]
impl ChangeFeedSource for ChannelFeedSource {
    async fn subscribe(&self, collection: Collection) -> Result<Box<dyn ChangeFeed>> {
        if lock(&self.refused).contains(&collection) {
            return Err(Error::Subscription {
                collection,
                reason: "change feeds are not supported by this source".to_string(),
            });
        }

        let receiver = lock(&self.receivers)
            .remove(&collection)
            .ok_or_else(|| Error::Subscription {
                collection,
                reason: "feed already subscribed".to_string(),
            })?;

        info!("[{}] Subscribed to in-memory feed", collection);
        Ok(Box::new(ChannelFeed {
            collection,
            receiver: Some(receiver),
            status: FeedStatus {
                open: true,
                ..FeedStatus::default()
            },
        }))
    }
}

impl FeedPublisher {
    pub fn publish(&self, event: ChangeEvent) -> Result<()> {
        self.send(event.collection, Ok(event))
    }

    /// Deliver a read error on the collection's feed
    pub fn publish_error(&self, collection: Collection, message: &str) -> Result<()> {
        self.send(collection, Err(Error::Connection(message.to_string())))
    }

    /// Deliver a change whose document could not be decoded
    pub fn publish_undecodable(&self, collection: Collection, document_key: &str) -> Result<()> {
        self.send(
            collection,
            Err(Error::Decode(format!("{}: malformed document", document_key))),
        )
    }

    fn send(&self, collection: Collection, item: FeedItem) -> Result<()> {
        self.senders
            .get(&collection)
            .ok_or_else(|| Error::Connection(format!("No feed for '{}'", collection)))?
            .send(item)
            .map_err(|_| Error::Connection(format!("Feed for '{}' is closed", collection)))
    }
}

struct ChannelFeed {
    collection: Collection,
    receiver: Option<mpsc::UnboundedReceiver<FeedItem>>,
    status: FeedStatus,
}

#[async_trait]
impl ChangeFeed for ChannelFeed {
    fn collection(&self) -> Collection {
        self.collection
    }

    async fn next_event(&mut self) -> Result<Option<ChangeEvent>> {
        let receiver = self
            .receiver
            .as_mut()
            .ok_or_else(|| Error::Connection("Feed is closed".to_string()))?;

        match receiver.recv().await {
            Some(Ok(event)) => {
                self.status.events_received += 1;
                Ok(Some(event))
            }
            Some(Err(e)) => {
                self.status.errors += 1;
                self.status.last_error = Some(e.to_string());
                Err(e)
            }
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.receiver = None;
        self.status.open = false;
        Ok(())
    }

    fn status(&self) -> FeedStatus {
        self.status.clone()
    }
}
