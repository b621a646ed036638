use async_trait::async_trait;
use datalake_core::{Error, ReadinessGate, ReadinessReport, Result};
use mongodb::bson::{doc, Document};
use mongodb::Database;
use tracing::{info, warn};

use crate::CollectionNames;

/// Checks that MongoDB is reachable and deployed with change stream support
pub struct MongoReadiness {
    database: Database,
    names: CollectionNames,
}

impl MongoReadiness {
    pub fn new(database: Database, names: CollectionNames) -> Self {
        Self { database, names }
    }

    /// Change streams are served by replica set members and by mongos routers
    pub(crate) fn topology_of(hello: &Document) -> Result<String> {
        if let Ok(set_name) = hello.get_str("setName") {
            return Ok(format!("replica set '{}'", set_name));
        }
        if matches!(hello.get_str("msg"), Ok("isdbgrid")) {
            return Ok("sharded cluster".to_string());
        }
        Err(Error::Readiness(
            "MongoDB must run as a replica set or sharded cluster to serve change streams"
                .to_string(),
        ))
    }
}

#[async_trait]
impl ReadinessGate for MongoReadiness {
    async fn check(&self) -> Result<ReadinessReport> {
        info!("Validating MongoDB deployment...");

        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| Error::Readiness(format!("Cannot reach MongoDB: {}", e)))?;
        info!("MongoDB connection: OK");

        let hello = self
            .database
            .run_command(doc! { "hello": 1 })
            .await
            .map_err(|e| Error::Readiness(format!("Failed to read topology: {}", e)))?;
        let topology = Self::topology_of(&hello)?;
        info!("Topology: {}", topology);

        let existing = self
            .database
            .list_collection_names()
            .await
            .map_err(|e| Error::Readiness(format!("Failed to list collections: {}", e)))?;

        let mut report = ReadinessReport {
            topology,
            ..ReadinessReport::default()
        };
        for name in self.names.all() {
            if existing.contains(&name) {
                info!("Collection {}: OK", name);
                report.present_collections.push(name);
            } else {
                warn!("Collection {}: not found (created on first write)", name);
                report.missing_collections.push(name);
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replica_set_is_accepted() {
        let hello = doc! { "isWritablePrimary": true, "setName": "rs0" };
        assert_eq!(
            MongoReadiness::topology_of(&hello).unwrap(),
            "replica set 'rs0'"
        );
    }

    #[test]
    fn mongos_is_accepted() {
        let hello = doc! { "isWritablePrimary": true, "msg": "isdbgrid" };
        assert_eq!(MongoReadiness::topology_of(&hello).unwrap(), "sharded cluster");
    }

    #[test]
    fn standalone_is_rejected() {
        let hello = doc! { "isWritablePrimary": true };
        let err = MongoReadiness::topology_of(&hello).unwrap_err();
        assert!(matches!(err, Error::Readiness(_)));
    }
}
