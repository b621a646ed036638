use async_trait::async_trait;
use chrono::{DateTime, Utc};
use datalake_core::{DataLakeEvent, Error, EventLogSink, GroupCount, LakeStatistics, RecentEvent, Result};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct PostgresConfig {
    /// PostgreSQL connection URL (built from individual fields or provided directly)
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Target schema name
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Table receiving the events
    #[serde(default = "default_table")]
    pub table: String,

    /// Create the event table if it doesn't exist
    #[serde(default = "default_auto_create_table")]
    pub auto_create_table: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_table() -> String {
    "datalake_events".to_string()
}

fn default_auto_create_table() -> bool {
    true
}

/// Connection settings as written in the sink config. Either a full `url`,
/// or `host` + `username` with optional `port`, `password` and `database`
#[derive(Deserialize)]
struct RawPostgresConfig {
    url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    database: Option<String>,

    #[serde(default = "default_max_connections")]
    max_connections: u32,
    #[serde(default = "default_schema")]
    schema: String,
    #[serde(default = "default_table")]
    table: String,
    #[serde(default = "default_auto_create_table")]
    auto_create_table: bool,
}

impl RawPostgresConfig {
    /// An explicit url wins over the individual parts
    fn connection_url(&self) -> Option<String> {
        if let Some(url) = &self.url {
            return Some(url.clone());
        }

        let host = self.host.as_deref()?;
        let username = self.username.as_deref()?;
        let port = self.port.unwrap_or(5432);
        let database = self.database.as_deref().unwrap_or("postgres");

        let credentials = match self.password.as_deref() {
            Some(password) if !password.is_empty() => format!("{}:{}", username, password),
            _ => username.to_string(),
        };
        Some(format!(
            "postgresql://{}@{}:{}/{}",
            credentials, host, port, database
        ))
    }
}

impl<'de> Deserialize<'de> for PostgresConfig {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        let raw = RawPostgresConfig::deserialize(deserializer)?;
        let url = raw.connection_url().ok_or_else(|| {
            D::Error::custom("Either 'url' or both 'host' and 'username' must be provided")
        })?;

        Ok(PostgresConfig {
            url,
            max_connections: raw.max_connections,
            schema: raw.schema,
            table: raw.table,
            auto_create_table: raw.auto_create_table,
        })
    }
}

/// Quote identifier if it contains uppercase letters
fn quote_identifier(identifier: &str) -> String {
    if identifier.chars().any(|c| c.is_uppercase()) {
        format!("\"{}\"", identifier)
    } else {
        identifier.to_string()
    }
}

/// Event log stored in a single table, one row per event.
/// The enriched order and the metadata are kept as JSONB documents
pub struct PostgresEventLog {
    pool: PgPool,
    table: String,
}

impl PostgresEventLog {
    pub async fn connect(config: PostgresConfig) -> Result<Self> {
        info!(
            "Connecting to PostgreSQL (schema '{}', table '{}')",
            config.schema, config.table
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| Error::Connection(format!("Failed to connect to PostgreSQL: {}", e)))?;

        let log = Self {
            pool,
            table: qualified_table(&config.schema, &config.table),
        };

        if config.auto_create_table {
            log.ensure_table().await?;
        }

        info!("Connected to PostgreSQL successfully");
        Ok(log)
    }

    async fn ensure_table(&self) -> Result<()> {
        let query = create_table_sql(&self.table);
        debug!("Ensuring event table: {}", query);

        sqlx::query(&query).execute(&self.pool).await.map_err(|e| {
            Error::Generic(anyhow::anyhow!("Failed to create event table: {}", e))
        })?;

        info!("Event table {} ensured", self.table);
        Ok(())
    }

    async fn group_counts(&self, column: &str) -> Result<Vec<GroupCount>> {
        let query = format!(
            "SELECT {col}, COUNT(*) FROM {table} GROUP BY {col} ORDER BY COUNT(*) DESC, {col}",
            col = column,
            table = self.table
        );

        let rows: Vec<(String, i64)> = sqlx::query_as(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Sink(format!("Failed to group events by {}: {}", column, e)))?;

        Ok(rows
            .into_iter()
            .map(|(key, count)| GroupCount {
                key,
                count: count.max(0) as u64,
            })
            .collect())
    }
}

fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(table))
}

fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id UUID PRIMARY KEY,
            event_name TEXT NOT NULL,
            timestamp TIMESTAMPTZ NOT NULL,
            operation TEXT NOT NULL,
            source_collection TEXT NOT NULL,
            document_id TEXT NOT NULL,
            enriched_order JSONB,
            metadata JSONB NOT NULL
        )",
        table
    )
}

#[async_trait]
impl EventLogSink for PostgresEventLog {
    fn kind(&self) -> &str {
        "postgres"
    }

    async fn append(&self, event: &DataLakeEvent) -> Result<()> {
        let query = format!(
            "INSERT INTO {} (id, event_name, timestamp, operation, source_collection, document_id, enriched_order, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            self.table
        );

        let enriched_order = event
            .enriched_order
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let metadata = serde_json::to_value(&event.metadata)?;

        sqlx::query(&query)
            .bind(event.id)
            .bind(&event.event_name)
            .bind(event.timestamp)
            .bind(event.operation.as_str())
            .bind(event.source_collection.as_str())
            .bind(&event.document_id)
            .bind(enriched_order)
            .bind(metadata)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Sink(format!("Failed to insert event: {}", e)))?;

        Ok(())
    }

    async fn statistics(&self) -> Result<LakeStatistics> {
        let (total,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Sink(format!("Failed to count events: {}", e)))?;

        let latest_query = format!(
            "SELECT event_name, timestamp, document_id FROM {} ORDER BY timestamp DESC LIMIT {}",
            self.table,
            LakeStatistics::LATEST_LIMIT
        );
        let latest: Vec<(String, DateTime<Utc>, String)> = sqlx::query_as(&latest_query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Sink(format!("Failed to read latest events: {}", e)))?;

        Ok(LakeStatistics {
            total_events: total.max(0) as u64,
            events_by_name: self.group_counts("event_name").await?,
            events_by_operation: self.group_counts("operation").await?,
            latest_events: latest
                .into_iter()
                .map(|(event_name, timestamp, document_id)| RecentEvent {
                    event_name,
                    timestamp,
                    document_id,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_from_url() {
        let config: PostgresConfig =
            serde_json::from_value(json!({ "url": "postgresql://lake@db/lake" })).unwrap();
        assert_eq!(config.url, "postgresql://lake@db/lake");
        assert_eq!(config.table, "datalake_events");
        assert_eq!(config.schema, "public");
        assert!(config.auto_create_table);
    }

    #[test]
    fn config_from_parts() {
        let config: PostgresConfig = serde_json::from_value(json!({
            "host": "db",
            "username": "lake",
            "password": "secret",
            "database": "analytics",
            "table": "Events"
        }))
        .unwrap();
        assert_eq!(config.url, "postgresql://lake:secret@db:5432/analytics");
        assert_eq!(qualified_table(&config.schema, &config.table), "public.\"Events\"");
    }

    #[test]
    fn config_without_password_or_port() {
        let config: PostgresConfig =
            serde_json::from_value(json!({ "host": "db", "username": "lake" })).unwrap();
        assert_eq!(config.url, "postgresql://lake@db:5432/postgres");
    }

    #[test]
    fn config_without_target_is_rejected() {
        let result: std::result::Result<PostgresConfig, _> =
            serde_json::from_value(json!({ "host": "db" }));
        assert!(result.is_err());
    }

    #[test]
    fn event_table_layout() {
        let sql = create_table_sql("public.datalake_events");
        assert!(sql.contains("id UUID PRIMARY KEY"));
        assert!(sql.contains("enriched_order JSONB,"));
        assert!(sql.contains("metadata JSONB NOT NULL"));
    }
}
