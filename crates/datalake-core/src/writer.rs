use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::within;
use crate::{
    Collection, DataLakeEvent, DenormalizationResolver, EventLogSink, EventMetadata, Operation,
    Order, Result, EVENT_ORIGIN,
};

/// Static part of the metadata stamped on every event
#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub schema_version: String,
    pub producer_host: String,
    /// Upper bound on a single append
    pub append_timeout: Option<Duration>,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            schema_version: "1.0".to_string(),
            producer_host: local_hostname(),
            append_timeout: None,
        }
    }
}

/// Best-effort host name of the running process
pub fn local_hostname() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Builds data lake events and appends them to the event log
#[derive(Clone)]
pub struct EventLogWriter {
    sink: Arc<dyn EventLogSink>,
    resolver: DenormalizationResolver,
    settings: WriterSettings,
}

impl EventLogWriter {
    pub fn new(
        sink: Arc<dyn EventLogSink>,
        resolver: DenormalizationResolver,
        settings: WriterSettings,
    ) -> Self {
        Self {
            sink,
            resolver,
            settings,
        }
    }

    pub fn sink(&self) -> Arc<dyn EventLogSink> {
        self.sink.clone()
    }

    /// Append an event, denormalizing `order` into it when present.
    /// Deletes carry no order and produce an event without a snapshot
    pub async fn append_enriched(
        &self,
        event_name: &str,
        operation: Operation,
        collection: Collection,
        document_id: &str,
        order: Option<&Order>,
    ) -> Result<DataLakeEvent> {
        let mut event = self.build_event(event_name, operation, collection, document_id);

        if let Some(order) = order {
            event.enriched_order = Some(self.resolver.resolve(order).await?);
        }

        self.store(event).await
    }

    /// Append an event with no enrichment, used for customer and item changes
    pub async fn append_simple(
        &self,
        event_name: &str,
        operation: Operation,
        collection: Collection,
        document_id: &str,
    ) -> Result<DataLakeEvent> {
        let event = self.build_event(event_name, operation, collection, document_id);
        self.store(event).await
    }

    fn build_event(
        &self,
        event_name: &str,
        operation: Operation,
        collection: Collection,
        document_id: &str,
    ) -> DataLakeEvent {
        let now = Utc::now();
        DataLakeEvent {
            id: Uuid::now_v7(),
            event_name: event_name.to_string(),
            timestamp: now,
            operation,
            source_collection: collection,
            document_id: document_id.to_string(),
            enriched_order: None,
            metadata: EventMetadata {
                origin: EVENT_ORIGIN.to_string(),
                schema_version: self.settings.schema_version.clone(),
                processed_at: now,
                producer_host: self.settings.producer_host.clone(),
            },
        }
    }

    async fn store(&self, event: DataLakeEvent) -> Result<DataLakeEvent> {
        let appended = within(
            self.settings.append_timeout,
            "appending to the event log",
            self.sink.append(&event),
        )
        .await;

        match appended {
            Ok(()) => {
                info!(
                    "Event saved to {} log: {} - {}",
                    self.sink.kind(),
                    event.event_name,
                    event.document_id
                );
                Ok(event)
            }
            Err(e) => {
                error!(
                    "Failed to save event to {} log: {} - {}: {}",
                    self.sink.kind(),
                    event.event_name,
                    event.document_id,
                    e
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryCustomers, InMemoryEventLog};
    use crate::{Customer, Error, LineItem};

    fn writer(log: Arc<InMemoryEventLog>, customers: InMemoryCustomers) -> EventLogWriter {
        EventLogWriter::new(
            log,
            DenormalizationResolver::new(Arc::new(customers)),
            WriterSettings {
                schema_version: "2.1".to_string(),
                producer_host: "worker-1".to_string(),
                append_timeout: None,
            },
        )
    }

    fn order() -> Order {
        Order {
            id: "O1".to_string(),
            customer_id: "C1".to_string(),
            order_date: Utc::now(),
            items: vec![LineItem {
                item_id: "I1".to_string(),
                name: "Keyboard".to_string(),
                unit_price: 350.0,
                quantity: 2,
            }],
            total: 700.0,
        }
    }

    #[tokio::test]
    async fn enriched_append_embeds_snapshot_and_metadata() {
        let log = Arc::new(InMemoryEventLog::new());
        let customers = InMemoryCustomers::new();
        customers.upsert(Customer {
            id: "C1".to_string(),
            name: "Maria Santos".to_string(),
            email: "maria@x.com".to_string(),
        });
        let writer = writer(log.clone(), customers);

        let before = Utc::now();
        let event = writer
            .append_enriched("order_insert", Operation::Insert, Collection::Orders, "O1", Some(&order()))
            .await
            .unwrap();

        let snapshot = event.enriched_order.as_ref().unwrap();
        assert_eq!(snapshot.customer_summary.name, "Maria Santos");
        assert_eq!(snapshot.item_count, 2);
        assert_eq!(event.metadata.origin, "change_stream");
        assert_eq!(event.metadata.schema_version, "2.1");
        assert_eq!(event.metadata.producer_host, "worker-1");
        assert!(event.timestamp >= before);
        assert_eq!(event.timestamp, event.metadata.processed_at);
        assert_eq!(log.events(), vec![event]);
    }

    #[tokio::test]
    async fn enriched_append_without_order_has_no_snapshot() {
        let log = Arc::new(InMemoryEventLog::new());
        let writer = writer(log.clone(), InMemoryCustomers::new());

        let event = writer
            .append_enriched("order_delete", Operation::Delete, Collection::Orders, "O1", None)
            .await
            .unwrap();

        assert!(event.enriched_order.is_none());
        assert_eq!(event.document_id, "O1");
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn repeated_appends_get_distinct_ids() {
        let log = Arc::new(InMemoryEventLog::new());
        let writer = writer(log.clone(), InMemoryCustomers::new());

        let first = writer
            .append_simple("item_update", Operation::Update, Collection::Items, "I1")
            .await
            .unwrap();
        let second = writer
            .append_simple("item_update", Operation::Update, Collection::Items, "I1")
            .await
            .unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn sink_failure_propagates() {
        let log = Arc::new(InMemoryEventLog::new());
        log.fail_next(1);
        let writer = writer(log.clone(), InMemoryCustomers::new());

        let err = writer
            .append_simple("customer_insert", Operation::Insert, Collection::Customers, "C1")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Sink(_)));
        assert!(log.is_empty());
    }
}
