use std::sync::Arc;
use std::time::Duration;

use crate::error::within;
use crate::{CustomerLookup, CustomerSummary, EnrichedOrderSnapshot, Order, Result};
use tracing::{debug, warn};

/// Builds denormalized order snapshots by resolving the referenced customer.
///
/// Every call performs a fresh lookup, so the snapshot reflects the customer
/// collection at resolution time rather than at the time of the order change.
#[derive(Clone)]
pub struct DenormalizationResolver {
    customers: Arc<dyn CustomerLookup>,
    lookup_timeout: Option<Duration>,
}

impl DenormalizationResolver {
    pub fn new(customers: Arc<dyn CustomerLookup>) -> Self {
        Self {
            customers,
            lookup_timeout: None,
        }
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = Some(timeout);
        self
    }

    /// Resolve the order's customer and build its snapshot.
    ///
    /// A missing customer yields a placeholder summary; only lookup failures
    /// are returned as errors.
    pub async fn resolve(&self, order: &Order) -> Result<EnrichedOrderSnapshot> {
        let customer = within(
            self.lookup_timeout,
            "looking up customer",
            self.customers.find_customer(&order.customer_id),
        )
        .await?;

        let summary = match customer {
            Some(customer) => {
                debug!("Resolved customer {} for order {}", customer.id, order.id);
                CustomerSummary::from(customer)
            }
            None => {
                warn!(
                    "Customer not found: {} (order {})",
                    order.customer_id, order.id
                );
                CustomerSummary::not_found(&order.customer_id)
            }
        };

        Ok(EnrichedOrderSnapshot::new(order, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCustomers;
    use crate::{Customer, Error, LineItem};
    use async_trait::async_trait;
    use chrono::Utc;

    fn order(customer_id: &str) -> Order {
        Order {
            id: "O1".to_string(),
            customer_id: customer_id.to_string(),
            order_date: Utc::now(),
            items: vec![
                LineItem {
                    item_id: "I1".to_string(),
                    name: "Notebook".to_string(),
                    unit_price: 2500.0,
                    quantity: 1,
                },
                LineItem {
                    item_id: "I2".to_string(),
                    name: "Mouse".to_string(),
                    unit_price: 75.0,
                    quantity: 1,
                },
            ],
            total: 2575.0,
        }
    }

    #[tokio::test]
    async fn resolves_existing_customer() {
        let customers = InMemoryCustomers::new();
        customers.upsert(Customer {
            id: "C1".to_string(),
            name: "João Silva".to_string(),
            email: "joao@x.com".to_string(),
        });
        let resolver = DenormalizationResolver::new(Arc::new(customers));

        let snapshot = resolver.resolve(&order("C1")).await.unwrap();

        assert_eq!(snapshot.customer_summary.id, "C1");
        assert_eq!(snapshot.customer_summary.name, "João Silva");
        assert_eq!(snapshot.customer_summary.email, "joao@x.com");
        assert_eq!(snapshot.item_count, 2);
        assert_eq!(snapshot.average_line_value, 1287.5);
    }

    #[tokio::test]
    async fn missing_customer_yields_placeholder() {
        let resolver = DenormalizationResolver::new(Arc::new(InMemoryCustomers::new()));

        let snapshot = resolver.resolve(&order("C99")).await.unwrap();

        assert!(snapshot.customer_summary.is_placeholder());
        assert_eq!(snapshot.customer_summary.id, "C99");
        assert_eq!(snapshot.customer_summary.email, "N/A");
    }

    struct FailingLookup;

    #[async_trait]
    impl CustomerLookup for FailingLookup {
        async fn find_customer(&self, _customer_id: &str) -> Result<Option<Customer>> {
            Err(Error::Lookup("connection reset".to_string()))
        }
    }

    struct SlowLookup;

    #[async_trait]
    impl CustomerLookup for SlowLookup {
        async fn find_customer(&self, _customer_id: &str) -> Result<Option<Customer>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }
    }

    #[tokio::test]
    async fn lookup_failure_is_returned() {
        let resolver = DenormalizationResolver::new(Arc::new(FailingLookup));
        let err = resolver.resolve(&order("C1")).await.unwrap_err();
        assert!(matches!(err, Error::Lookup(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_lookup_times_out() {
        let resolver = DenormalizationResolver::new(Arc::new(SlowLookup))
            .with_lookup_timeout(Duration::from_millis(50));
        let err = resolver.resolve(&order("C1")).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { millis: 50, .. }));
    }
}
