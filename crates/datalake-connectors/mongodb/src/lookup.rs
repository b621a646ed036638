use async_trait::async_trait;
use datalake_core::{Customer, CustomerLookup, Error, Result};
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::{Collection, Database};
use tracing::debug;

use crate::documents::decode_customer;

/// Point lookup of customers in the customers collection
pub struct MongoCustomerLookup {
    collection: Collection<Document>,
}

impl MongoCustomerLookup {
    pub fn new(database: &Database, collection_name: &str) -> Self {
        Self {
            collection: database.collection(collection_name),
        }
    }

    /// Customer ids are ObjectIds when they parse as one, plain strings otherwise
    fn filter_for(customer_id: &str) -> Document {
        match ObjectId::parse_str(customer_id) {
            Ok(oid) => doc! { "_id": oid },
            Err(_) => doc! { "_id": customer_id },
        }
    }
}

#[async_trait]
impl CustomerLookup for MongoCustomerLookup {
    async fn find_customer(&self, customer_id: &str) -> Result<Option<Customer>> {
        debug!("Looking up customer {}", customer_id);

        let found = self
            .collection
            .find_one(Self::filter_for(customer_id))
            .await
            .map_err(|e| Error::Lookup(format!("Failed to find customer {}: {}", customer_id, e)))?;

        found.map(decode_customer).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_keys_are_matched_as_object_ids() {
        let filter = MongoCustomerLookup::filter_for("6564f1a2b8c9d4e5f6789abc");
        assert!(filter.get_object_id("_id").is_ok());

        let filter = MongoCustomerLookup::filter_for("customer-42");
        assert_eq!(filter.get_str("_id").unwrap(), "customer-42");
    }
}
