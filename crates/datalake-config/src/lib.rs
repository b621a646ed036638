use datalake_core::{local_hostname, SupervisorSettings, WriterSettings};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

// Re-export connection types from the MongoDB connector
pub use datalake_mongodb_connector::{CollectionNames, MongoConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub mongodb: MongoConfig,
    pub collections: CollectionNames,
    pub datalake: DataLakeConfig,
    pub supervisor: SupervisorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataLakeConfig {
    /// Where events are written
    pub sink: SinkConfig,

    /// Stamped into every event's metadata
    pub schema_version: String,

    /// Defaults to the local host name when unset
    #[serde(default)]
    pub producer_host: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Type/name of the sink (e.g., "mongodb", "postgres", "memory")
    #[serde(rename = "type")]
    pub sink_type: String,

    /// Sink-specific configuration
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Upper bound on opening a change feed, 0 to wait indefinitely
    pub subscribe_timeout_ms: u64,

    /// Upper bound on each lookup and append, 0 to wait indefinitely
    pub io_timeout_ms: u64,

    pub max_consecutive_feed_errors: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON formatted logs
    pub json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mongodb: MongoConfig::default(),
            collections: CollectionNames::default(),
            datalake: DataLakeConfig {
                sink: SinkConfig {
                    sink_type: "mongodb".to_string(),
                    config: Value::Null,
                },
                schema_version: "1.0".to_string(),
                producer_host: None,
            },
            supervisor: SupervisorConfig {
                subscribe_timeout_ms: 10_000,
                io_timeout_ms: 5_000,
                max_consecutive_feed_errors: 5,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
        }
    }
}

fn millis(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_millis(value))
}

impl AppConfig {
    pub fn load(config_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let config_dir = config_dir.as_ref();
        let s = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(
                config::File::with_name(&config_dir.join("default.yaml").to_string_lossy())
                    .required(false),
            )
            // docker.yaml overrides in containers
            .add_source(
                config::File::with_name(&config_dir.join("docker.yaml").to_string_lossy())
                    .required(false),
            )
            // Environment variables (DATALAKE__SUPERVISOR__IO_TIMEOUT_MS=2000)
            .add_source(config::Environment::with_prefix("DATALAKE").separator("__"))
            .build()?;

        let config = s.try_deserialize()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        millis(self.supervisor.io_timeout_ms)
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            subscribe_timeout: millis(self.supervisor.subscribe_timeout_ms),
            max_consecutive_feed_errors: self.supervisor.max_consecutive_feed_errors,
            ..SupervisorSettings::default()
        }
    }

    pub fn writer_settings(&self) -> WriterSettings {
        WriterSettings {
            schema_version: self.datalake.schema_version.clone(),
            producer_host: self
                .datalake
                .producer_host
                .clone()
                .filter(|h| !h.is_empty())
                .unwrap_or_else(local_hostname),
            append_timeout: self.io_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("datalake-config-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn defaults_map_to_settings() {
        let config = AppConfig::default();

        let supervisor = config.supervisor_settings();
        assert_eq!(supervisor.subscribe_timeout, Some(Duration::from_secs(10)));
        assert_eq!(supervisor.max_consecutive_feed_errors, 5);
        assert_eq!(supervisor.collections.len(), 3);

        let writer = config.writer_settings();
        assert_eq!(writer.schema_version, "1.0");
        assert_eq!(writer.append_timeout, Some(Duration::from_secs(5)));
        assert!(!writer.producer_host.is_empty());
    }

    #[test]
    fn zero_timeout_disables_bound() {
        let mut config = AppConfig::default();
        config.supervisor.io_timeout_ms = 0;
        config.supervisor.subscribe_timeout_ms = 0;
        config.datalake.producer_host = Some("worker-7".to_string());

        assert_eq!(config.io_timeout(), None);
        assert_eq!(config.supervisor_settings().subscribe_timeout, None);
        assert_eq!(config.writer_settings().producer_host, "worker-7");
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let dir = scratch_dir("load");
        fs::write(
            dir.join("default.yaml"),
            r#"
collections:
  orders: pedidos
  customers: clientes
  items: itens
datalake:
  sink:
    type: postgres
    config:
      url: postgresql://lake@localhost/lake
  schema_version: "2.0"
"#,
        )
        .unwrap();

        let config = AppConfig::load(&dir).unwrap();
        assert_eq!(config.collections.orders, "pedidos");
        assert_eq!(config.datalake.sink.sink_type, "postgres");
        assert_eq!(
            config.datalake.sink.config["url"],
            "postgresql://lake@localhost/lake"
        );
        assert_eq!(config.datalake.schema_version, "2.0");
        assert_eq!(config.mongodb.database, "datalake_demo");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn file_round_trip() {
        let dir = scratch_dir("file");
        let path = dir.join("app.yaml");

        let mut config = AppConfig::default();
        config.logging.json = true;
        config.to_file(&path).unwrap();

        let loaded = AppConfig::from_file(&path).unwrap();
        assert!(loaded.logging.json);
        assert_eq!(loaded.datalake.sink.sink_type, "mongodb");

        fs::remove_dir_all(&dir).unwrap();
    }
}
