//! Order Cache Service
//!
//! Consumes orders from Kafka, persists them in PostgreSQL and serves
//! `/order` lookups from a read-through cache.
//!
//! # Startup
//!
//! ```text
//! migrate schema ─▶ health/metrics up ─▶ warm start ─▶ ready ─▶ lookup + ingestion
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ordercache::adapters::{KafkaConfig, KafkaOrderStream, PostgresConfig, PostgresOrderStore};
use ordercache::cache::{CacheConfig, CacheMode, FingerprintCache};
use ordercache::domain::{OrderStore, OrderStream};
use ordercache::error::Result;
use ordercache::ingest::{IngestConfig, IngestionPipeline};
use ordercache::lookup::{LookupConfig, LookupHandler, LookupService};
use ordercache::metrics::ServiceMetrics;
use ordercache::server::{self, Endpoint, HealthEndpoint, MetricsEndpoint, Readiness};
use ordercache::warmup::{WarmStartConfig, WarmStartLoader};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Order cache - deduplicating Kafka consumer with a PostgreSQL-backed lookup cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// PostgreSQL host
    #[arg(long, env = "DB_HOST", default_value = "localhost")]
    db_host: String,

    /// PostgreSQL port
    #[arg(long, env = "DB_PORT", default_value = "5434")]
    db_port: u16,

    #[arg(long, env = "DB_USER", default_value = "my_user")]
    db_user: String,

    #[arg(long, env = "DB_PASSWORD", default_value = "1", hide_env_values = true)]
    db_password: String,

    #[arg(long, env = "DB_NAME", default_value = "my_database")]
    db_name: String,

    /// Connection pool size
    #[arg(long, env = "DB_MAX_CONNS", default_value = "25")]
    db_max_conns: usize,

    /// Kafka bootstrap servers (comma separated)
    #[arg(long, env = "KAFKA_BROKERS", default_value = "localhost:9092")]
    kafka_brokers: String,

    #[arg(long, env = "KAFKA_TOPIC", default_value = "orders")]
    kafka_topic: String,

    #[arg(long, env = "KAFKA_GROUP_ID", default_value = "order-consumer-group")]
    kafka_group_id: String,

    /// Lookup endpoint bind address
    #[arg(long, env = "LOOKUP_ADDR", default_value = "0.0.0.0:8081")]
    lookup_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8082")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9090")]
    metrics_addr: String,

    /// Cache entry time-to-live in seconds (0 disables expiry)
    #[arg(long, env = "CACHE_TTL_SECONDS", default_value = "1800")]
    cache_ttl_seconds: u64,

    /// Cache value mode
    #[arg(long, env = "CACHE_MODE", value_enum, default_value_t = CacheMode::Payload)]
    cache_mode: CacheMode,

    /// Mirror serialized orders into the order_cache table
    #[arg(long, env = "BLOB_MIRROR")]
    blob_mirror: bool,

    /// Maximum concurrent store fetches during warm start
    #[arg(long, env = "WARM_START_CONCURRENCY", default_value = "5")]
    warm_start_concurrency: usize,

    /// Deadline for each store point operation in milliseconds
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value = "5000")]
    store_timeout_ms: u64,

    /// Bound on each stream read attempt in milliseconds
    #[arg(long, env = "POLL_TIMEOUT_MS", default_value = "500")]
    poll_timeout_ms: u64,

    /// Pause after a transient ingestion failure in milliseconds
    #[arg(long, env = "REDELIVERY_BACKOFF_MS", default_value = "1000")]
    redelivery_backoff_ms: u64,

    /// Time allowed for in-flight work after a shutdown signal
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECONDS", default_value = "30")]
    shutdown_timeout_seconds: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    fn postgres(&self) -> PostgresConfig {
        PostgresConfig {
            host: self.db_host.clone(),
            port: self.db_port,
            user: self.db_user.clone(),
            password: self.db_password.clone(),
            dbname: self.db_name.clone(),
            max_size: self.db_max_conns,
            timeout: self.store_timeout(),
        }
    }

    fn kafka(&self) -> KafkaConfig {
        KafkaConfig {
            brokers: self.kafka_brokers.clone(),
            topic: self.kafka_topic.clone(),
            group_id: self.kafka_group_id.clone(),
            ..Default::default()
        }
    }

    fn cache(&self) -> CacheConfig {
        CacheConfig {
            mode: self.cache_mode,
            ttl: (self.cache_ttl_seconds > 0).then(|| Duration::from_secs(self.cache_ttl_seconds)),
        }
    }

    fn ingest(&self) -> IngestConfig {
        IngestConfig {
            store_timeout: self.store_timeout(),
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            redelivery_backoff: Duration::from_millis(self.redelivery_backoff_ms),
            blob_mirror: self.blob_mirror,
        }
    }

    fn warm_start(&self) -> WarmStartConfig {
        WarmStartConfig {
            concurrency: self.warm_start_concurrency,
            fetch_timeout: self.store_timeout(),
            prefer_blob: self.blob_mirror,
            write_back_blob: self.blob_mirror,
            ..Default::default()
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting order cache service");
    info!("  PostgreSQL: {}:{}/{}", args.db_host, args.db_port, args.db_name);
    info!("  Kafka: {} topic={} group={}", args.kafka_brokers, args.kafka_topic, args.kafka_group_id);
    info!("  Cache: mode={} ttl={}s", args.cache_mode, args.cache_ttl_seconds);
    info!("  Blob mirror: {}", args.blob_mirror);

    let metrics = ServiceMetrics::new()?;
    let cache = FingerprintCache::new(args.cache())?;

    let postgres = PostgresOrderStore::from_config(&args.postgres())?;
    postgres.migrate().await?;
    let store: Arc<dyn OrderStore> = Arc::new(postgres);

    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();
    let readiness = Readiness::new();

    // Health and metrics come up first so probes see the warm-start phase
    spawn_server(
        &tracker,
        &cancel,
        &args.health_addr,
        Arc::new(HealthEndpoint::new(readiness.clone(), store.clone(), args.store_timeout())),
    )
    .await?;
    spawn_server(
        &tracker,
        &cancel,
        &args.metrics_addr,
        Arc::new(MetricsEndpoint::new(metrics.clone(), cache.clone())),
    )
    .await?;

    let loader = WarmStartLoader::new(args.warm_start(), cache.clone(), store.clone(), metrics.clone());
    let report = loader.run().await;
    if report.list_failed {
        warn!("Warm start could not list orders; serving from an empty cache");
    }
    cache.log_content();
    readiness.mark_ready();

    let lookup = LookupService::new(
        LookupConfig {
            store_timeout: args.store_timeout(),
        },
        cache.clone(),
        store.clone(),
        metrics.clone(),
    );
    spawn_server(
        &tracker,
        &cancel,
        &args.lookup_addr,
        Arc::new(LookupHandler::new(lookup)),
    )
    .await?;

    let stream: Arc<dyn OrderStream> = Arc::new(KafkaOrderStream::connect(&args.kafka())?);
    let pipeline = IngestionPipeline::new(args.ingest(), cache.clone(), store.clone(), metrics.clone());
    let ingest_cancel = cancel.clone();
    tracker.spawn(async move {
        if let Err(e) = pipeline.run(stream, ingest_cancel).await {
            error!("Ingestion loop error: {}", e);
        }
    });

    info!("Service ready");
    shutdown_signal().await;

    info!("Shutdown signal received, draining");
    cancel.cancel();
    tracker.close();

    let deadline = Duration::from_secs(args.shutdown_timeout_seconds);
    if tokio::time::timeout(deadline, tracker.wait()).await.is_err() {
        error!(
            timeout_seconds = args.shutdown_timeout_seconds,
            remaining_tasks = tracker.len(),
            "Shutdown deadline exceeded, forcing termination"
        );
    }

    cache.shutdown().await;
    info!("Service shutdown complete");
    Ok(())
}

async fn spawn_server(
    tracker: &TaskTracker,
    cancel: &CancellationToken,
    addr: &str,
    endpoint: Arc<dyn Endpoint>,
) -> Result<()> {
    let listener = server::bind(addr).await?;
    let name = endpoint.name();
    let cancel = cancel.clone();
    let connections = tracker.clone();

    tracker.spawn(async move {
        if let Err(e) = server::serve(listener, endpoint, cancel, connections).await {
            error!("{} server error: {}", name, e);
        }
    });
    Ok(())
}

// =============================================================================
// Signals
// =============================================================================

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "rdkafka=info", "tokio_postgres=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
