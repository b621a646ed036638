use async_trait::async_trait;
use chrono::{DateTime, Utc};
use datalake_core::{
    DataLakeEvent, Error, EventLogSink, GroupCount, LakeStatistics, RecentEvent, Result,
};
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::{Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSinkConfig {
    /// Collection receiving the events
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Create the timestamp and event name indexes on open
    #[serde(default = "default_create_indexes")]
    pub create_indexes: bool,
}

fn default_collection() -> String {
    "datalake".to_string()
}

fn default_create_indexes() -> bool {
    true
}

impl Default for MongoSinkConfig {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            create_indexes: default_create_indexes(),
        }
    }
}

fn bson_date(value: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(value.timestamp_millis())
}

/// Layout of an event in the data lake collection.
/// Timestamps are stored as BSON dates so they sort and range-filter natively
pub fn event_to_document(event: &DataLakeEvent) -> Document {
    let mut document = doc! {
        "_id": event.id.to_string(),
        "event_name": event.event_name.clone(),
        "timestamp": bson_date(event.timestamp),
        "operation": event.operation.as_str(),
        "source_collection": event.source_collection.as_str(),
        "document_id": event.document_id.clone(),
        "metadata": {
            "origin": event.metadata.origin.clone(),
            "schema_version": event.metadata.schema_version.clone(),
            "processed_at": bson_date(event.metadata.processed_at),
            "producer_host": event.metadata.producer_host.clone(),
        },
    };

    if let Some(order) = &event.enriched_order {
        let line_items: Vec<Bson> = order
            .line_items
            .iter()
            .map(|line| {
                Bson::Document(doc! {
                    "item_id": line.item_id.clone(),
                    "name": line.name.clone(),
                    "unit_price": line.unit_price,
                    "quantity": line.quantity,
                })
            })
            .collect();

        document.insert(
            "enriched_order",
            doc! {
                "id": order.id.clone(),
                "total": order.total,
                "order_date": bson_date(order.order_date),
                "customer_summary": {
                    "id": order.customer_summary.id.clone(),
                    "name": order.customer_summary.name.clone(),
                    "email": order.customer_summary.email.clone(),
                },
                "line_items": line_items,
                "item_count": order.item_count,
                "average_line_value": order.average_line_value,
            },
        );
    }

    document
}

fn count_of(document: &Document) -> u64 {
    match document.get("count") {
        Some(Bson::Int32(n)) => *n as u64,
        Some(Bson::Int64(n)) => *n as u64,
        Some(Bson::Double(n)) => *n as u64,
        _ => 0,
    }
}

/// Append-only event log in a MongoDB collection
pub struct MongoEventLog {
    collection: Collection<Document>,
}

impl MongoEventLog {
    pub async fn open(database: &Database, config: MongoSinkConfig) -> Result<Self> {
        let collection = database.collection::<Document>(&config.collection);

        if config.create_indexes {
            for keys in [doc! { "timestamp": 1 }, doc! { "event_name": 1 }] {
                collection
                    .create_index(IndexModel::builder().keys(keys).build())
                    .await
                    .map_err(|e| Error::Sink(format!("Failed to create index: {}", e)))?;
            }
            debug!("Indexes ensured on '{}'", config.collection);
        }

        info!("Data lake collection: {}", config.collection);
        Ok(Self { collection })
    }

    async fn group_counts(&self, field: &str) -> Result<Vec<GroupCount>> {
        let pipeline = [
            doc! { "$group": { "_id": format!("${}", field), "count": { "$sum": 1 } } },
            doc! { "$sort": { "count": -1, "_id": 1 } },
        ];

        let mut cursor = self
            .collection
            .aggregate(pipeline)
            .await
            .map_err(|e| Error::Sink(format!("Failed to aggregate by {}: {}", field, e)))?;

        let mut groups = Vec::new();
        while let Some(group) = cursor
            .try_next()
            .await
            .map_err(|e| Error::Sink(format!("Failed to read aggregation: {}", e)))?
        {
            groups.push(GroupCount {
                key: group.get_str("_id").unwrap_or_default().to_string(),
                count: count_of(&group),
            });
        }
        Ok(groups)
    }

    async fn latest_events(&self) -> Result<Vec<RecentEvent>> {
        let mut cursor = self
            .collection
            .find(doc! {})
            .sort(doc! { "timestamp": -1 })
            .limit(LakeStatistics::LATEST_LIMIT as i64)
            .projection(doc! { "event_name": 1, "timestamp": 1, "document_id": 1 })
            .await
            .map_err(|e| Error::Sink(format!("Failed to read latest events: {}", e)))?;

        let mut recent = Vec::new();
        while let Some(event) = cursor
            .try_next()
            .await
            .map_err(|e| Error::Sink(format!("Failed to read latest events: {}", e)))?
        {
            let timestamp = event
                .get_datetime("timestamp")
                .ok()
                .and_then(|t| DateTime::from_timestamp_millis(t.timestamp_millis()))
                .unwrap_or_default();

            recent.push(RecentEvent {
                event_name: event.get_str("event_name").unwrap_or_default().to_string(),
                timestamp,
                document_id: event.get_str("document_id").unwrap_or_default().to_string(),
            });
        }
        Ok(recent)
    }
}

#[async_trait]
impl EventLogSink for MongoEventLog {
    fn kind(&self) -> &str {
        "mongodb"
    }

    async fn append(&self, event: &DataLakeEvent) -> Result<()> {
        self.collection
            .insert_one(event_to_document(event))
            .await
            .map_err(|e| Error::Sink(format!("Failed to insert event: {}", e)))?;
        Ok(())
    }

    async fn statistics(&self) -> Result<LakeStatistics> {
        let total_events = self
            .collection
            .count_documents(doc! {})
            .await
            .map_err(|e| Error::Sink(format!("Failed to count events: {}", e)))?;

        Ok(LakeStatistics {
            total_events,
            events_by_name: self.group_counts("event_name").await?,
            events_by_operation: self.group_counts("operation").await?,
            latest_events: self.latest_events().await?,
        })
    }
}
