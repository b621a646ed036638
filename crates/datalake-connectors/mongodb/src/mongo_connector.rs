use async_trait::async_trait;
use datalake_core::{
    ChangeEvent, ChangeFeed, ChangeFeedSource, Collection, Error, FeedStatus, Operation, Result,
};
use futures::StreamExt;
use mongodb::bson::{doc, Document};
use mongodb::change_stream::event::{ChangeStreamEvent, OperationType};
use mongodb::change_stream::ChangeStream;
use mongodb::options::{ClientOptions, FullDocumentType};
use mongodb::{Client, Database};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::documents::{decode_document, key_to_string};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoConfig {
    /// Connection string; change streams need a replica set or mongos
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Database holding the watched collections
    #[serde(default = "default_database")]
    pub database: String,

    /// Optional application name reported to the server
    #[serde(default)]
    pub app_name: Option<String>,
}

fn default_uri() -> String {
    "mongodb://localhost:27017/?replicaSet=rs0".to_string()
}

fn default_database() -> String {
    "datalake_demo".to_string()
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            database: default_database(),
            app_name: Some("datalake-processor".to_string()),
        }
    }
}

impl MongoConfig {
    /// Connect and return a handle on the configured database.
    /// The handle is cheap to clone and safe to share between loops
    pub async fn connect(&self) -> Result<Database> {
        info!("Connecting to MongoDB database '{}'", self.database);

        let mut options = ClientOptions::parse(&self.uri)
            .await
            .map_err(|e| Error::Connection(format!("Invalid MongoDB URI: {}", e)))?;
        if let Some(ref app_name) = self.app_name {
            options.app_name = Some(app_name.clone());
        }

        let client = Client::with_options(options)
            .map_err(|e| Error::Connection(format!("Failed to create MongoDB client: {}", e)))?;

        Ok(client.database(&self.database))
    }
}

/// Physical collection name for each watched logical collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionNames {
    #[serde(default = "default_orders")]
    pub orders: String,
    #[serde(default = "default_customers")]
    pub customers: String,
    #[serde(default = "default_items")]
    pub items: String,
}

fn default_orders() -> String {
    "orders".to_string()
}

fn default_customers() -> String {
    "customers".to_string()
}

fn default_items() -> String {
    "items".to_string()
}

impl Default for CollectionNames {
    fn default() -> Self {
        Self {
            orders: default_orders(),
            customers: default_customers(),
            items: default_items(),
        }
    }
}

impl CollectionNames {
    pub fn name_of(&self, collection: Collection) -> &str {
        match collection {
            Collection::Orders => &self.orders,
            Collection::Customers => &self.customers,
            Collection::Items => &self.items,
        }
    }

    pub fn all(&self) -> Vec<String> {
        Collection::ALL
            .iter()
            .map(|c| self.name_of(*c).to_string())
            .collect()
    }
}

/// Opens MongoDB change streams on the watched collections
pub struct MongoChangeFeedSource {
    database: Database,
    names: CollectionNames,
}

impl MongoChangeFeedSource {
    pub fn new(database: Database, names: CollectionNames) -> Self {
        Self { database, names }
    }
}

#[async_trait]
impl ChangeFeedSource for MongoChangeFeedSource {
    async fn subscribe(&self, collection: Collection) -> Result<Box<dyn ChangeFeed>> {
        let name = self.names.name_of(collection);
        info!("[{}] Opening change stream on '{}'", collection, name);

        let pipeline = [doc! {
            "$match": { "operationType": { "$in": ["insert", "update", "delete"] } }
        }];

        let stream = self
            .database
            .collection::<Document>(name)
            .watch()
            .pipeline(pipeline)
            .full_document(FullDocumentType::UpdateLookup)
            .await
            .map_err(|e| Error::Subscription {
                collection,
                reason: e.to_string(),
            })?;

        info!("[{}] Monitoring changes in '{}'", collection, name);

        Ok(Box::new(MongoChangeFeed {
            collection,
            stream: Some(stream),
            status: FeedStatus {
                open: true,
                ..FeedStatus::default()
            },
        }))
    }
}

/// Pair a change with its decoded full document.
///
/// Orders need their document for enrichment, so an unreadable order fails
/// the change. Customer and item events only carry the key, so an unreadable
/// document is dropped and the change is still reported.
pub(crate) fn build_change_event(
    collection: Collection,
    operation: Operation,
    document_key: String,
    full_document: Option<Document>,
) -> Result<ChangeEvent> {
    let full_document = match full_document {
        Some(doc) if operation.carries_document() => match decode_document(collection, doc) {
            Ok(decoded) => Some(decoded),
            Err(e) if collection == Collection::Orders => {
                return Err(Error::Decode(format!("{}: {}", document_key, e)));
            }
            Err(e) => {
                warn!(
                    "[{}] Keeping {} change on {} without its document: {}",
                    collection, operation, document_key, e
                );
                None
            }
        },
        _ => None,
    };

    Ok(ChangeEvent::new(
        operation,
        collection,
        document_key,
        full_document,
    ))
}

pub struct MongoChangeFeed {
    collection: Collection,
    stream: Option<ChangeStream<ChangeStreamEvent<Document>>>,
    status: FeedStatus,
}

impl MongoChangeFeed {
    fn to_change_event(
        collection: Collection,
        event: ChangeStreamEvent<Document>,
    ) -> Result<Option<ChangeEvent>> {
        let operation = match event.operation_type {
            OperationType::Insert => Operation::Insert,
            OperationType::Update => Operation::Update,
            OperationType::Delete => Operation::Delete,
            other => {
                debug!("[{}] Ignoring {:?} change", collection, other);
                return Ok(None);
            }
        };

        let document_key = event
            .document_key
            .as_ref()
            .and_then(|key| key.get("_id"))
            .map(key_to_string)
            .ok_or_else(|| {
                Error::Decode(format!("{} change without a document key", operation))
            })?;

        build_change_event(collection, operation, document_key, event.full_document).map(Some)
    }
}

#[async_trait]
impl ChangeFeed for MongoChangeFeed {
    fn collection(&self) -> Collection {
        self.collection
    }

    async fn next_event(&mut self) -> Result<Option<ChangeEvent>> {
        loop {
            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| Error::Connection("Change stream is closed".to_string()))?;

            let event = match stream.next().await {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    self.status.errors += 1;
                    self.status.last_error = Some(e.to_string());
                    error!("[{}] Change stream error: {}", self.collection, e);
                    return Err(Error::Connection(format!("Change stream error: {}", e)));
                }
                None => {
                    info!("[{}] Change stream ended", self.collection);
                    return Ok(None);
                }
            };

            if matches!(event.operation_type, OperationType::Invalidate) {
                warn!(
                    "[{}] Change stream invalidated (collection dropped or renamed)",
                    self.collection
                );
                return Ok(None);
            }

            match Self::to_change_event(self.collection, event) {
                Ok(Some(change)) => {
                    self.status.events_received += 1;
                    return Ok(Some(change));
                }
                Ok(None) => {
                    self.status.events_skipped += 1;
                }
                Err(e) => {
                    self.status.errors += 1;
                    self.status.last_error = Some(e.to_string());
                    return Err(e);
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.stream.take().is_some() {
            info!("[{}] Change stream released", self.collection);
        }
        self.status.open = false;
        Ok(())
    }

    fn status(&self) -> FeedStatus {
        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datalake_core::SourceDocument;
    use mongodb::bson::oid::ObjectId;

    #[test]
    fn unreadable_item_change_keeps_its_key() {
        // no price field at all
        let doc = doc! { "_id": ObjectId::new(), "label": "Notebook Dell" };

        let change =
            build_change_event(Collection::Items, Operation::Insert, "I1".to_string(), Some(doc))
                .unwrap();

        assert_eq!(change.event_name(), "item_insert");
        assert_eq!(change.document_key, "I1");
        assert!(change.full_document.is_none());
    }

    #[test]
    fn unreadable_customer_change_keeps_its_key() {
        let doc = doc! { "_id": "C1", "nome": ["not", "a", "name"] };

        let change = build_change_event(
            Collection::Customers,
            Operation::Update,
            "C1".to_string(),
            Some(doc),
        )
        .unwrap();

        assert_eq!(change.event_name(), "customer_update");
        assert!(change.full_document.is_none());
    }

    #[test]
    fn unreadable_order_change_is_rejected() {
        let doc = doc! { "_id": "O1", "total": 10.0 };

        let err =
            build_change_event(Collection::Orders, Operation::Insert, "O1".to_string(), Some(doc))
                .unwrap_err();

        match err {
            Error::Decode(reason) => assert!(reason.starts_with("O1: ")),
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn delete_ignores_any_document() {
        let change = build_change_event(
            Collection::Orders,
            Operation::Delete,
            "O1".to_string(),
            Some(doc! { "_id": "O1" }),
        )
        .unwrap();
        assert!(change.full_document.is_none());
    }

    #[test]
    fn readable_item_is_decoded() {
        let doc = doc! { "_id": "I1", "nome": "Mouse", "preco": 75.0, "quantidade": 50 };

        let change =
            build_change_event(Collection::Items, Operation::Update, "I1".to_string(), Some(doc))
                .unwrap();

        assert!(matches!(change.full_document, Some(SourceDocument::Item(_))));
    }
}
