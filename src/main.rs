use anyhow::Result;
use lorawan_analyzer::config::Config;
use lorawan_analyzer::ingest::mqtt::MqttConsumer;
use lorawan_analyzer::live::Broadcaster;
use lorawan_analyzer::operators::OperatorMatcher;
use lorawan_analyzer::pipeline::Pipeline;
use lorawan_analyzer::store::writer::BatchWriter;
use lorawan_analyzer::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const MQTT_STOP_TIMEOUT: Duration = Duration::from_secs(5);
const PIPELINE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lorawan_analyzer=info".parse()?),
        )
        .json()
        .init();

    info!("Starting lorawan-analyzer v{}", lorawan_analyzer::VERSION);

    // Load configuration
    let config = Config::from_env()?;
    config.validate()?;

    info!("Configuration loaded successfully");

    // Connect to TimescaleDB and set up the schema
    info!("Connecting to PostgreSQL");
    let store = Store::connect(&config.postgres_url).await?;
    store.init_schema().await?;

    // Operator rules: config entries merged with DB-persisted ones
    let mut custom_operators = config.operators.clone();
    match store.load_custom_operators().await {
        Ok(db_operators) => custom_operators.extend(db_operators),
        Err(e) => warn!("Failed to load custom operators from DB: {}", e),
    }
    let operators = Arc::new(OperatorMatcher::new(&custom_operators)?);
    info!("Operator matcher initialized ({} custom rules)", custom_operators.len());

    // Hide rules: config entries merged with DB-persisted ones; handed
    // to the read APIs by the external HTTP layer.
    let mut hide_rules = config.hide_rules.clone();
    match store.load_hide_rules().await {
        Ok(db_rules) => hide_rules.extend(db_rules),
        Err(e) => warn!("Failed to load hide rules from DB: {}", e),
    }
    info!("Loaded {} hide rules", hide_rules.len());

    // Broadcaster for live subscribers; caches fill from upserts.
    let broadcaster = Arc::new(Broadcaster::new());

    // Writer task: store channel -> batched inserts + upserts
    let (store_tx, store_rx) = mpsc::channel(10_000);
    let writer = BatchWriter::new(store.clone(), broadcaster.clone());
    let writer_handle = tokio::spawn(writer.run(store_rx));

    // Pipeline worker: decoded events -> enrichment -> writer/broadcaster
    let (event_tx, event_rx) = mpsc::channel(1_000);
    let pipeline = Pipeline::new(operators.clone(), broadcaster.clone(), store_tx);
    let pipeline_handle = tokio::spawn(pipeline.run(event_rx));

    // MQTT readers, one per broker
    let shutdown = CancellationToken::new();
    let mut brokers = vec![config.mqtt.clone()];
    brokers.extend(config.mqtt_servers.clone());
    let consumer = MqttConsumer::new(brokers, event_tx, shutdown.clone());
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = consumer.start().await {
            error!("MQTT ingestion error: {}", e);
        }
    });

    info!(
        "lorawan-analyzer started successfully (API layer binds {})",
        config.api_bind
    );

    // Wait for shutdown signal (SIGTERM or SIGINT)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("SIGINT received, shutting down gracefully...");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate()
                ).expect("Failed to register SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("SIGTERM received, shutting down gracefully...");
        }
    }

    // Stop the MQTT readers first; once they exit, the event channel
    // closes and the pipeline drains.
    shutdown.cancel();
    if tokio::time::timeout(MQTT_STOP_TIMEOUT, mqtt_handle)
        .await
        .is_err()
    {
        warn!("MQTT readers did not stop within {:?}", MQTT_STOP_TIMEOUT);
    }

    if tokio::time::timeout(PIPELINE_DRAIN_TIMEOUT, pipeline_handle)
        .await
        .is_err()
    {
        warn!("Pipeline did not drain within {:?}", PIPELINE_DRAIN_TIMEOUT);
    }

    // The pipeline dropped the store channel; the writer flushes both
    // buffers and exits.
    if tokio::time::timeout(WRITER_FLUSH_TIMEOUT, writer_handle)
        .await
        .is_err()
    {
        warn!("Writer did not flush within {:?}", WRITER_FLUSH_TIMEOUT);
    }

    info!("lorawan-analyzer shutdown complete");

    Ok(())
}
