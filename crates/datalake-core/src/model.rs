use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::{Error, Result};

/// Origin stamped on every event produced by this processor
pub const EVENT_ORIGIN: &str = "change_stream";

/// Name used in the customer summary when the referenced customer is missing
pub const CUSTOMER_NOT_FOUND_NAME: &str = "customer not found";

/// Email used in the customer summary when the referenced customer is missing
pub const CUSTOMER_NOT_FOUND_EMAIL: &str = "N/A";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// Insert and update carry the post-change document, delete does not
    pub fn carries_document(&self) -> bool {
        !matches!(self, Operation::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical source collections watched by the processor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Orders,
    Customers,
    Items,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Orders, Collection::Customers, Collection::Items];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Orders => "orders",
            Collection::Customers => "customers",
            Collection::Items => "items",
        }
    }

    /// Singular entity name used as the event name prefix
    pub fn entity_kind(&self) -> &'static str {
        match self {
            Collection::Orders => "order",
            Collection::Customers => "customer",
            Collection::Items => "item",
        }
    }

    /// `{entity_kind}_{operation}`, e.g. `order_insert`
    pub fn event_name(&self, operation: Operation) -> String {
        format!("{}_{}", self.entity_kind(), operation)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ===== Source documents =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    pub item_id: String,
    pub name: String,
    pub unit_price: f64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: String,
    pub customer_id: String,
    pub order_date: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<LineItem>,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// Catalogue item, as stored in the items collection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub quantity: i64,
}

/// Post-change document carried by insert and update events.
///
/// The variant is chosen by the collection the event was observed on, see
/// [`SourceDocument::decode`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceDocument {
    Order(Order),
    Customer(Customer),
    Item(Item),
}

type Decoder = fn(Value) -> serde_json::Result<SourceDocument>;

/// Dispatch table from collection to document decoder
const DECODERS: [(Collection, Decoder); 3] = [
    (Collection::Orders, |v| serde_json::from_value(v).map(SourceDocument::Order)),
    (Collection::Customers, |v| {
        serde_json::from_value(v).map(SourceDocument::Customer)
    }),
    (Collection::Items, |v| serde_json::from_value(v).map(SourceDocument::Item)),
];

impl SourceDocument {
    /// Decode a raw JSON document according to the collection it came from
    pub fn decode(collection: Collection, value: Value) -> Result<Self> {
        let decoder = DECODERS
            .iter()
            .find(|(c, _)| *c == collection)
            .map(|(_, d)| *d)
            .ok_or_else(|| Error::Decode(format!("No decoder for collection '{}'", collection)))?;

        decoder(value).map_err(|e| {
            Error::Decode(format!("Invalid {} document: {}", collection.entity_kind(), e))
        })
    }

    pub fn collection(&self) -> Collection {
        match self {
            SourceDocument::Order(_) => Collection::Orders,
            SourceDocument::Customer(_) => Collection::Customers,
            SourceDocument::Item(_) => Collection::Items,
        }
    }

    pub fn as_order(&self) -> Option<&Order> {
        match self {
            SourceDocument::Order(order) => Some(order),
            _ => None,
        }
    }
}

/// ===== Change feed =====

/// A single notification delivered by a collection's change feed
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub operation: Operation,
    pub collection: Collection,
    pub document_key: String,
    pub full_document: Option<SourceDocument>,
}

impl ChangeEvent {
    pub fn new(
        operation: Operation,
        collection: Collection,
        document_key: impl Into<String>,
        full_document: Option<SourceDocument>,
    ) -> Self {
        Self {
            operation,
            collection,
            document_key: document_key.into(),
            full_document,
        }
    }

    pub fn insert(collection: Collection, document_key: impl Into<String>, doc: SourceDocument) -> Self {
        Self::new(Operation::Insert, collection, document_key, Some(doc))
    }

    pub fn update(collection: Collection, document_key: impl Into<String>, doc: SourceDocument) -> Self {
        Self::new(Operation::Update, collection, document_key, Some(doc))
    }

    pub fn delete(collection: Collection, document_key: impl Into<String>) -> Self {
        Self::new(Operation::Delete, collection, document_key, None)
    }

    pub fn event_name(&self) -> String {
        self.collection.event_name(self.operation)
    }
}

/// ===== Data lake =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerSummary {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl CustomerSummary {
    /// Placeholder used when the referenced customer cannot be resolved
    pub fn not_found(customer_id: &str) -> Self {
        Self {
            id: customer_id.to_string(),
            name: CUSTOMER_NOT_FOUND_NAME.to_string(),
            email: CUSTOMER_NOT_FOUND_EMAIL.to_string(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.name == CUSTOMER_NOT_FOUND_NAME && self.email == CUSTOMER_NOT_FOUND_EMAIL
    }
}

impl From<Customer> for CustomerSummary {
    fn from(customer: Customer) -> Self {
        Self {
            id: customer.id,
            name: customer.name,
            email: customer.email,
        }
    }
}

/// Denormalized order embedded in order events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichedOrderSnapshot {
    pub id: String,
    pub total: f64,
    pub order_date: DateTime<Utc>,
    pub customer_summary: CustomerSummary,
    pub line_items: Vec<LineItem>,
    /// Sum of quantities across line items
    pub item_count: i64,
    /// Order total divided by the number of line items, 0 with no lines
    pub average_line_value: f64,
}

impl EnrichedOrderSnapshot {
    pub fn new(order: &Order, customer_summary: CustomerSummary) -> Self {
        let item_count = order.items.iter().map(|i| i.quantity).sum();
        let average_line_value = if order.items.is_empty() {
            0.0
        } else {
            order.total / order.items.len() as f64
        };

        Self {
            id: order.id.clone(),
            total: order.total,
            order_date: order.order_date,
            customer_summary,
            line_items: order.items.clone(),
            item_count,
            average_line_value,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventMetadata {
    pub origin: String,
    pub schema_version: String,
    pub processed_at: DateTime<Utc>,
    pub producer_host: String,
}

/// Immutable record appended to the data lake for every observed change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataLakeEvent {
    pub id: Uuid,
    pub event_name: String,
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub source_collection: Collection,
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enriched_order: Option<EnrichedOrderSnapshot>,
    pub metadata: EventMetadata,
}

/// Count of events sharing one key (event name or operation)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupCount {
    pub key: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecentEvent {
    pub event_name: String,
    pub timestamp: DateTime<Utc>,
    pub document_id: String,
}

/// Read-back summary of the event log, used for operational reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LakeStatistics {
    pub total_events: u64,
    pub events_by_name: Vec<GroupCount>,
    pub events_by_operation: Vec<GroupCount>,
    pub latest_events: Vec<RecentEvent>,
}

impl LakeStatistics {
    /// Number of recent events reported by [`LakeStatistics::latest_events`]
    pub const LATEST_LIMIT: usize = 5;

    /// Build statistics from a full in-memory view of the log
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a DataLakeEvent>) -> Self {
        let mut by_name: Vec<GroupCount> = Vec::new();
        let mut by_operation: Vec<GroupCount> = Vec::new();
        let mut recent: Vec<RecentEvent> = Vec::new();
        let mut total = 0u64;

        for event in events {
            total += 1;
            bump(&mut by_name, &event.event_name);
            bump(&mut by_operation, event.operation.as_str());
            recent.push(RecentEvent {
                event_name: event.event_name.clone(),
                timestamp: event.timestamp,
                document_id: event.document_id.clone(),
            });
        }

        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        recent.truncate(Self::LATEST_LIMIT);

        Self {
            total_events: total,
            events_by_name: by_name,
            events_by_operation: by_operation,
            latest_events: recent,
        }
    }

    pub fn count_for(&self, event_name: &str) -> u64 {
        self.events_by_name
            .iter()
            .find(|g| g.key == event_name)
            .map(|g| g.count)
            .unwrap_or(0)
    }
}

fn bump(groups: &mut Vec<GroupCount>, key: &str) {
    match groups.iter_mut().find(|g| g.key == key) {
        Some(group) => group.count += 1,
        None => groups.push(GroupCount {
            key: key.to_string(),
            count: 1,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order(items: Vec<LineItem>, total: f64) -> Order {
        Order {
            id: "O1".to_string(),
            customer_id: "C1".to_string(),
            order_date: Utc::now(),
            items,
            total,
        }
    }

    fn line(name: &str, price: f64, quantity: i64) -> LineItem {
        LineItem {
            item_id: format!("I-{}", name),
            name: name.to_string(),
            unit_price: price,
            quantity,
        }
    }

    #[test]
    fn event_names_use_entity_kind() {
        assert_eq!(Collection::Orders.event_name(Operation::Insert), "order_insert");
        assert_eq!(Collection::Customers.event_name(Operation::Update), "customer_update");
        assert_eq!(Collection::Items.event_name(Operation::Delete), "item_delete");
    }

    #[test]
    fn snapshot_derives_count_and_average() {
        let order = order(vec![line("Notebook", 2500.0, 1), line("Mouse", 75.0, 3)], 2725.0);
        let snapshot = EnrichedOrderSnapshot::new(&order, CustomerSummary::not_found("C1"));

        assert_eq!(snapshot.item_count, 4);
        assert_eq!(snapshot.average_line_value, 1362.5);
        assert_eq!(snapshot.line_items, order.items);
    }

    #[test]
    fn snapshot_without_lines_has_zero_average() {
        let order = order(Vec::new(), 100.0);
        let snapshot = EnrichedOrderSnapshot::new(&order, CustomerSummary::not_found("C1"));

        assert_eq!(snapshot.item_count, 0);
        assert_eq!(snapshot.average_line_value, 0.0);
    }

    #[test]
    fn decode_dispatches_on_collection() {
        let doc = SourceDocument::decode(
            Collection::Customers,
            json!({"id": "C1", "name": "Ana", "email": "ana@x.com"}),
        )
        .unwrap();
        assert_eq!(doc.collection(), Collection::Customers);
        assert!(doc.as_order().is_none());

        let err = SourceDocument::decode(Collection::Orders, json!({"id": "O1"})).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn statistics_group_and_limit_recent() {
        let now = Utc::now();
        let events: Vec<DataLakeEvent> = (0..7)
            .map(|i| DataLakeEvent {
                id: Uuid::now_v7(),
                event_name: if i % 2 == 0 { "order_insert" } else { "customer_delete" }.to_string(),
                timestamp: now + chrono::Duration::seconds(i),
                operation: if i % 2 == 0 { Operation::Insert } else { Operation::Delete },
                source_collection: Collection::Orders,
                document_id: format!("D{}", i),
                enriched_order: None,
                metadata: EventMetadata {
                    origin: EVENT_ORIGIN.to_string(),
                    schema_version: "1.0".to_string(),
                    processed_at: now,
                    producer_host: "test".to_string(),
                },
            })
            .collect();

        let stats = LakeStatistics::from_events(&events);
        assert_eq!(stats.total_events, 7);
        assert_eq!(stats.count_for("order_insert"), 4);
        assert_eq!(stats.count_for("customer_delete"), 3);
        assert_eq!(stats.latest_events.len(), LakeStatistics::LATEST_LIMIT);
        assert_eq!(stats.latest_events[0].document_id, "D6");
    }
}
