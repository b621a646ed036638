use crate::{Customer, Result};
use async_trait::async_trait;

/// Point lookup of customers by identifier
#[async_trait]
pub trait CustomerLookup: Send + Sync {
    /// Returns Ok(None) when no customer has this identifier
    async fn find_customer(&self, customer_id: &str) -> Result<Option<Customer>>;
}
