//! Valuation Service - Main entry point
//!
//! # Modes
//! - `consumer` (default): consume listing events, value them and hand off results
//! - `produce`: publish `--count` synthetic listings (seeded with `--seed`)
//! - `replay`: publish listings from the JSON-lines file given by `--file`

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use valuation_service::producer::read_replay_file;
use valuation_service::{
    metrics, Config, ConsumerLoop, DeadLetterMode, DeadLetterSink, EventProcessor,
    FileDeadLetterSink, HttpPredictor, KafkaEventSource, KafkaPublisher, ListingGenerator,
    ListingProducer, LogFormat, LogResultSink, PredictorGateway, ResultMode, ResultSink,
    TopicDeadLetterSink, TopicResultSink,
};

/// Service run mode
#[derive(Debug, Clone, PartialEq)]
enum RunMode {
    Consumer,
    Produce { count: usize, seed: u64, invalid_ratio: f64 },
    Replay { file: PathBuf },
}

impl RunMode {
    fn from_args() -> Result<Self> {
        let args: Vec<String> = env::args().collect();
        let value = |flag: &str| {
            args.iter()
                .position(|a| a == flag)
                .and_then(|i| args.get(i + 1))
                .cloned()
        };

        let mode = match value("--mode").as_deref() {
            None | Some("consumer") => RunMode::Consumer,
            Some("produce") => RunMode::Produce {
                count: value("--count")
                    .map(|v| v.parse::<usize>())
                    .transpose()
                    .context("--count must be a non-negative integer")?
                    .unwrap_or(100),
                seed: value("--seed")
                    .map(|v| v.parse::<u64>())
                    .transpose()
                    .context("--seed must be an unsigned integer")?
                    .unwrap_or_else(rand::random),
                invalid_ratio: value("--invalid-ratio")
                    .map(|v| v.parse::<f64>())
                    .transpose()
                    .context("--invalid-ratio must be a number")?
                    .unwrap_or(0.0),
            },
            Some("replay") => RunMode::Replay {
                file: value("--file")
                    .map(PathBuf::from)
                    .context("--mode replay requires --file PATH")?,
            },
            Some(other) => {
                anyhow::bail!("Unknown mode '{}', expected consumer, produce or replay", other)
            }
        };

        Ok(mode)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("Configuration error")?;

    init_tracing(config.log_format);

    let mode = RunMode::from_args()?;
    info!("Starting Valuation Service in {:?} mode", mode);

    match mode {
        RunMode::Consumer => run_consumer_mode(config).await,
        RunMode::Produce {
            count,
            seed,
            invalid_ratio,
        } => run_produce_mode(config, count, seed, invalid_ratio).await,
        RunMode::Replay { file } => run_replay_mode(config, file).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "valuation_service=debug,rdkafka=warn,info".into());

    let (json, text) = match format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Text => (None, Some(tracing_subscriber::fmt::layer())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .init();
}

/// Consume listing events until ctrl-c, then drain and exit
async fn run_consumer_mode(config: Config) -> Result<()> {
    let publisher = Arc::new(
        KafkaPublisher::new(&config.kafka_brokers).context("Failed to create Kafka producer")?,
    );

    let source = Arc::new(
        KafkaEventSource::new(&config.kafka_consumer_config())
            .context("Failed to create Kafka consumer")?,
    );

    let gateway_config = config
        .gateway_config()
        .context("Failed to load gateway configuration")?;
    let predictor = Arc::new(
        HttpPredictor::new(&config.predictor_url, gateway_config.predictor_timeout)
            .context("Failed to build predictor client")?,
    );
    info!(url = %config.predictor_url, "Predictor client initialized");

    let gateway = Arc::new(PredictorGateway::new(predictor, gateway_config));

    let results: Arc<dyn ResultSink> = match config.result_mode {
        ResultMode::Kafka => Arc::new(TopicResultSink::new(
            publisher.clone(),
            config.results_topic.clone(),
        )),
        ResultMode::Log => Arc::new(LogResultSink),
    };

    let dead_letters: Arc<dyn DeadLetterSink> = match config.dead_letter_mode {
        DeadLetterMode::Kafka => Arc::new(TopicDeadLetterSink::new(
            publisher.clone(),
            config.dead_letter_topic.clone(),
        )),
        DeadLetterMode::File => {
            let sink = FileDeadLetterSink::open(&config.dead_letter_path)
                .await
                .with_context(|| {
                    format!(
                        "Failed to open dead-letter file {}",
                        config.dead_letter_path.display()
                    )
                })?;
            Arc::new(sink)
        }
    };

    info!(
        results = ?config.result_mode,
        dead_letters = ?config.dead_letter_mode,
        "Sinks initialized"
    );

    let consumer_config = config.consumer_config();
    let processor = Arc::new(EventProcessor::new(
        gateway,
        results,
        dead_letters,
        consumer_config.retry.clone(),
        consumer_config.attempt_timeout,
    ));
    let consumer = ConsumerLoop::new(source, processor, consumer_config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    let metrics_task = config.metrics_textfile.clone().map(|path| {
        tokio::spawn(write_metrics_periodically(
            path,
            config.metrics_interval(),
            shutdown_rx.clone(),
        ))
    });

    info!("Listening for listings on topic: {}", config.listings_topic);
    let stats = consumer.run(shutdown_rx).await;

    if let Some(task) = metrics_task {
        if let Err(e) = task.await {
            warn!("Metrics writer task failed: {}", e);
        }
    }
    if let Some(path) = &config.metrics_textfile {
        if let Err(e) = metrics::write_textfile(path).await {
            warn!("Failed to write final metrics snapshot: {}", e);
        }
    }

    info!(
        received = stats.received,
        committed = stats.committed,
        dead_lettered = stats.dead_lettered,
        abandoned = stats.abandoned,
        aborted = stats.aborted,
        "Shutting down Valuation Service"
    );

    Ok(())
}

async fn write_metrics_periodically(
    path: PathBuf,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = metrics::write_textfile(&path).await {
                    warn!(path = %path.display(), "Failed to write metrics: {}", e);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Publish synthetic listings
async fn run_produce_mode(config: Config, count: usize, seed: u64, invalid_ratio: f64) -> Result<()> {
    info!(count, seed, invalid_ratio, "Generating synthetic listings");

    let producer = listing_producer(&config)?;
    let generator = ListingGenerator::new(seed).with_invalid_ratio(invalid_ratio);
    let events = generator
        .take(count)
        .map(event_schema::ListingEvent::new);

    let stats = producer
        .publish_all(events, config.producer_interval())
        .await;

    if stats.failed > 0 {
        anyhow::bail!("{} of {} listings could not be published", stats.failed, count);
    }
    Ok(())
}

/// Publish listings read from a JSON-lines file
async fn run_replay_mode(config: Config, file: PathBuf) -> Result<()> {
    let events = read_replay_file(&file)
        .await
        .with_context(|| format!("Failed to read replay file {}", file.display()))?;
    info!(file = %file.display(), events = events.len(), "Replaying listings");

    let total = events.len();
    let producer = listing_producer(&config)?;
    let stats = producer
        .publish_all(events, config.producer_interval())
        .await;

    if stats.failed > 0 {
        anyhow::bail!("{} of {} listings could not be published", stats.failed, total);
    }
    Ok(())
}

fn listing_producer(config: &Config) -> Result<ListingProducer> {
    let publisher = Arc::new(
        KafkaPublisher::new(&config.kafka_brokers).context("Failed to create Kafka producer")?,
    );

    Ok(ListingProducer::new(
        publisher,
        config.listings_topic.clone(),
        config.producer_retry(),
    ))
}
