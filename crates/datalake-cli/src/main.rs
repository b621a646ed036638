use datalake_config::{AppConfig, LoggingConfig};
use datalake_core::{
    ChangeStreamSupervisor, CustomerLookup, DenormalizationResolver, EventLogSink,
    EventLogWriter, LakeStatistics, ReadinessGate, Registry,
};
use datalake_mongodb_connector::{MongoChangeFeedSource, MongoCustomerLookup, MongoReadiness};
use datalake_mongodb_destination::MongoSinkFactory;
use datalake_postgres_destination::PostgresSinkFactory;
use clap::{Parser, Subcommand};
use mongodb::Database;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "datalake-cli")]
#[command(about = "Change stream data lake processor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the source collections and write events to the data lake
    Start {
        /// Path to configuration directory
        #[arg(short, long, default_value = "config")]
        config_dir: String,
    },

    /// Validate configuration and check the database can serve change streams
    Validate {
        /// Path to configuration directory
        #[arg(short, long, default_value = "config")]
        config_dir: String,
    },

    /// Print data lake statistics
    Stats {
        /// Path to configuration directory
        #[arg(short, long, default_value = "config")]
        config_dir: String,
    },
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let level = match logging.level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if logging.json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}

fn build_registry(database: &Database) -> Registry {
    // The default registry already carries the in-memory sink
    let mut registry = Registry::default();
    registry.register_sink(Arc::new(MongoSinkFactory::new(database.clone())));
    registry.register_sink(Arc::new(PostgresSinkFactory));

    info!("Available sinks: {:?}", registry.list_sinks());
    registry
}

async fn open_sink(config: &AppConfig, database: &Database) -> anyhow::Result<Arc<dyn EventLogSink>> {
    let registry = build_registry(database);
    let sink = registry
        .create_sink(
            &config.datalake.sink.sink_type,
            config.datalake.sink.config.clone(),
        )
        .await?;
    info!("Writing events to '{}' sink", sink.kind());
    Ok(sink)
}

fn print_statistics(title: &str, stats: &LakeStatistics) -> anyhow::Result<()> {
    println!("\n{}", title);
    println!("{}", serde_json::to_string_pretty(stats)?);
    Ok(())
}

async fn report_statistics(sink: &Arc<dyn EventLogSink>, title: &str) {
    match sink.statistics().await {
        Ok(stats) => {
            if let Err(e) = print_statistics(title, &stats) {
                warn!("Failed to render statistics: {}", e);
            }
        }
        Err(e) => warn!("Failed to read data lake statistics: {}", e),
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let database = config.mongodb.connect().await?;

    let readiness = MongoReadiness::new(database.clone(), config.collections.clone());
    let report = readiness.check().await?;
    info!(
        "Database ready ({}), watching {:?}",
        report.topology, report.present_collections
    );

    let sink = open_sink(&config, &database).await?;
    report_statistics(&sink, "Data lake before processing:").await;

    let customers: Arc<dyn CustomerLookup> = Arc::new(MongoCustomerLookup::new(
        &database,
        &config.collections.customers,
    ));
    let mut resolver = DenormalizationResolver::new(customers);
    if let Some(timeout) = config.io_timeout() {
        resolver = resolver.with_lookup_timeout(timeout);
    }

    let writer = EventLogWriter::new(sink.clone(), resolver, config.writer_settings());
    let source = Arc::new(MongoChangeFeedSource::new(
        database.clone(),
        config.collections.clone(),
    ));
    let supervisor = ChangeStreamSupervisor::new(source, writer, config.supervisor_settings());

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutting down data lake processor..."),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        shutdown.cancel();
    });

    info!("Data lake processor started, press Ctrl+C to stop");
    let result = supervisor.start(cancel).await;

    report_statistics(&sink, "Data lake after processing:").await;

    let report = match result {
        Ok(report) => report,
        Err(e) if e.is_startup_fatal() => {
            error!("Change stream monitoring could not start: {}", e);
            return Err(e.into());
        }
        Err(e) => {
            error!("Change stream monitoring failed: {}", e);
            return Err(e.into());
        }
    };
    for (collection, status) in &report.loops {
        info!(
            "[{}] {:?}: {} event(s), {} handler failure(s)",
            collection, status.state, status.events_processed, status.handler_failures
        );
    }
    info!("Processed {} event(s) in total", report.events_processed());

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config_dir } => {
            let config = AppConfig::load(&config_dir)?;
            init_tracing(&config.logging)?;

            info!("Starting data lake processor with config directory: {}", config_dir);

            run(config).await?;
            info!("Data lake processor stopped");
        }

        Commands::Validate { config_dir } => {
            let config = AppConfig::load(&config_dir)?;
            init_tracing(&config.logging)?;

            println!("✓ Configuration is valid");
            println!("  • MongoDB database: {}", config.mongodb.database);
            println!(
                "  • Collections: {}",
                config.collections.all().join(", ")
            );
            println!("  • Sink: {}", config.datalake.sink.sink_type);

            let database = config.mongodb.connect().await?;
            let report = MongoReadiness::new(database, config.collections.clone())
                .check()
                .await?;

            println!("✓ Topology supports change streams ({})", report.topology);
            for missing in &report.missing_collections {
                println!("  ⚠ Collection '{}' does not exist yet", missing);
            }
        }

        Commands::Stats { config_dir } => {
            let config = AppConfig::load(&config_dir)?;
            init_tracing(&config.logging)?;

            let database = config.mongodb.connect().await?;
            let sink = open_sink(&config, &database).await?;
            let stats = sink.statistics().await?;
            print_statistics("Data lake statistics:", &stats)?;
        }
    }

    Ok(())
}
