//! Decoding of MongoDB documents into the processor's source types.
//!
//! Field names follow the camelCase layout used by the order service
//! (`customerId`, `orderDate`, `itemId`, ...). The Portuguese names written by
//! the lesson's sample data (`clienteId`, `dataPedido`, `itens`, `nome`,
//! `preco`, `quantidade`) are accepted as aliases. Monetary values are accepted
//! as doubles, integers, `Decimal128` or numeric strings.

use chrono::{DateTime, Utc};
use datalake_core::{Collection, Customer, Error, Item, LineItem, Order, Result, SourceDocument};
use mongodb::bson::{self, Bson, Document};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use tracing::warn;

/// Render a document key as a string. ObjectIds become their 24-char hex form
pub fn key_to_string(value: &Bson) -> String {
    match value {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        Bson::Int32(i) => i.to_string(),
        Bson::Int64(i) => i.to_string(),
        other => other.to_string(),
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(d) => Some(*d),
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Decimal128(d) => d.to_string().parse().ok(),
        Bson::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        Bson::Double(d) if d.fract() == 0.0 => Some(*d as i64),
        Bson::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    let value = Bson::deserialize(deserializer)?;
    as_f64(&value).ok_or_else(|| D::Error::custom(format!("expected a number, got {}", value)))
}

fn integer<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    let value = Bson::deserialize(deserializer)?;
    as_i64(&value).ok_or_else(|| D::Error::custom(format!("expected an integer, got {}", value)))
}

fn identifier<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Bson::deserialize(deserializer).map(|value| key_to_string(&value))
}

fn to_utc(value: bson::DateTime) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value.timestamp_millis())
        .ok_or_else(|| Error::Decode(format!("date out of range: {}", value)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineItemDocument {
    #[serde(deserialize_with = "identifier")]
    item_id: String,
    #[serde(default, alias = "nome")]
    name: String,
    #[serde(alias = "preco", deserialize_with = "number")]
    price: f64,
    #[serde(alias = "quantidade", deserialize_with = "integer")]
    quantity: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderDocument {
    #[serde(rename = "_id", deserialize_with = "identifier")]
    id: String,
    #[serde(alias = "clienteId", deserialize_with = "identifier")]
    customer_id: String,
    #[serde(alias = "dataPedido")]
    order_date: bson::DateTime,
    #[serde(default, alias = "itens")]
    items: Vec<LineItemDocument>,
    #[serde(deserialize_with = "number")]
    total: f64,
}

#[derive(Debug, Deserialize)]
struct CustomerDocument {
    #[serde(rename = "_id", deserialize_with = "identifier")]
    id: String,
    #[serde(default, alias = "nome")]
    name: String,
    #[serde(default)]
    email: String,
}

#[derive(Debug, Deserialize)]
struct ItemDocument {
    #[serde(rename = "_id", deserialize_with = "identifier")]
    id: String,
    #[serde(default, alias = "nome")]
    name: String,
    #[serde(alias = "preco", deserialize_with = "number")]
    price: f64,
    #[serde(alias = "quantidade", deserialize_with = "integer")]
    quantity: i64,
}

fn parse<T: serde::de::DeserializeOwned>(collection: Collection, doc: Document) -> Result<T> {
    bson::from_document(doc).map_err(|e| {
        Error::Decode(format!("invalid {} document: {}", collection.entity_kind(), e))
    })
}

fn decode_order(doc: Document) -> Result<SourceDocument> {
    let order: OrderDocument = parse(Collection::Orders, doc)?;
    Ok(SourceDocument::Order(Order {
        id: order.id,
        customer_id: order.customer_id,
        order_date: to_utc(order.order_date)?,
        items: order
            .items
            .into_iter()
            .map(|line| LineItem {
                item_id: line.item_id,
                name: line.name,
                unit_price: line.price,
                quantity: line.quantity,
            })
            .collect(),
        total: order.total,
    }))
}

pub(crate) fn decode_customer(doc: Document) -> Result<Customer> {
    let customer: CustomerDocument = parse(Collection::Customers, doc)?;
    if customer.name.is_empty() {
        warn!("Customer {} has no name", customer.id);
    }
    Ok(Customer {
        id: customer.id,
        name: customer.name,
        email: customer.email,
    })
}

fn decode_item(doc: Document) -> Result<SourceDocument> {
    let item: ItemDocument = parse(Collection::Items, doc)?;
    Ok(SourceDocument::Item(Item {
        id: item.id,
        name: item.name,
        price: item.price,
        quantity: item.quantity,
    }))
}

type Decoder = fn(Document) -> Result<SourceDocument>;

/// Decode a full document according to the collection it was read from
pub fn decode_document(collection: Collection, doc: Document) -> Result<SourceDocument> {
    let decoder: Decoder = match collection {
        Collection::Orders => decode_order,
        Collection::Customers => |doc| decode_customer(doc).map(SourceDocument::Customer),
        Collection::Items => decode_item,
    };
    decoder(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, oid::ObjectId};

    #[test]
    fn decodes_order_with_object_ids() {
        let order_id = ObjectId::parse_str("6564f1a2b8c9d4e5f6789ac4").unwrap();
        let customer_id = ObjectId::parse_str("6564f1a2b8c9d4e5f6789abc").unwrap();
        let doc = doc! {
            "_id": order_id,
            "customerId": customer_id,
            "orderDate": bson::DateTime::from_millis(1_730_455_200_000),
            "items": [
                { "itemId": ObjectId::new(), "name": "Notebook Dell", "price": 2500.0, "quantity": 1 },
                { "itemId": ObjectId::new(), "name": "Mouse Logitech", "price": "75.00", "quantity": 1_i64 },
            ],
            "total": 2575.0,
        };

        let decoded = decode_document(Collection::Orders, doc).unwrap();
        let order = decoded.as_order().unwrap();

        assert_eq!(order.id, "6564f1a2b8c9d4e5f6789ac4");
        assert_eq!(order.customer_id, "6564f1a2b8c9d4e5f6789abc");
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.items[1].unit_price, 75.0);
        assert_eq!(order.order_date.timestamp_millis(), 1_730_455_200_000);
    }

    #[test]
    fn order_without_total_is_rejected() {
        let doc = doc! {
            "_id": ObjectId::new(),
            "customerId": ObjectId::new(),
            "orderDate": bson::DateTime::now(),
        };
        let err = decode_document(Collection::Orders, doc).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn decodes_customer_and_item() {
        let customer = decode_document(
            Collection::Customers,
            doc! { "_id": "C1", "name": "Maria Santos", "email": "maria@x.com" },
        )
        .unwrap();
        assert_eq!(customer.collection(), Collection::Customers);

        let item = decode_document(
            Collection::Items,
            doc! { "_id": 7, "name": "Monitor 24pol", "price": 800, "quantity": 15 },
        )
        .unwrap();
        match item {
            SourceDocument::Item(item) => {
                assert_eq!(item.id, "7");
                assert_eq!(item.price, 800.0);
            }
            other => panic!("unexpected document {:?}", other),
        }
    }

    #[test]
    fn decodes_lesson_sample_documents() {
        let order = doc! {
            "_id": ObjectId::parse_str("6564f1a2b8c9d4e5f6789ac4").unwrap(),
            "clienteId": ObjectId::parse_str("6564f1a2b8c9d4e5f6789abc").unwrap(),
            "dataPedido": bson::DateTime::from_millis(1_730_455_200_000),
            "itens": [
                { "itemId": ObjectId::new(), "nome": "Notebook Dell", "preco": 2500.0, "quantidade": 1 },
                { "itemId": ObjectId::new(), "nome": "Mouse Logitech", "preco": 75.0, "quantidade": 1 },
            ],
            "total": 2575.0,
        };
        let decoded = decode_document(Collection::Orders, order).unwrap();
        let order = decoded.as_order().unwrap();
        assert_eq!(order.customer_id, "6564f1a2b8c9d4e5f6789abc");
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.items[0].name, "Notebook Dell");
        assert_eq!(order.items[1].unit_price, 75.0);

        let customer = decode_customer(doc! {
            "_id": ObjectId::parse_str("6564f1a2b8c9d4e5f6789abc").unwrap(),
            "nome": "João Silva",
            "email": "joao.silva@email.com",
        })
        .unwrap();
        assert_eq!(customer.name, "João Silva");

        let item = decode_document(
            Collection::Items,
            doc! { "_id": ObjectId::new(), "nome": "Monitor 24pol", "preco": 800.0, "quantidade": 15 },
        )
        .unwrap();
        match item {
            SourceDocument::Item(item) => {
                assert_eq!(item.name, "Monitor 24pol");
                assert_eq!(item.quantity, 15);
            }
            other => panic!("unexpected document {:?}", other),
        }
    }

    #[test]
    fn decimal_prices_are_read() {
        let price: bson::Decimal128 = "2575.50".parse().unwrap();
        assert_eq!(as_f64(&Bson::Decimal128(price)), Some(2575.5));
    }
}
