//! Complaint Classifier - Main Entry Point
//!
//! Serves predictions and model reloads over NATS request/reply, logging
//! served predictions and checking them for data drift in the background.

use anyhow::{bail, Context, Result};
use complaint_classifier::{
    api::ApiService,
    config::{AppConfig, LoggingConfig},
    feature_extractor::FeatureVectorizer,
    metrics::{MetricsReporter, ServiceMetrics},
    models::{ModelHolder, ModelRegistry},
    monitoring::{
        log_store::load_reference_corpus, DataMonitor, DriftAnalyzer, DriftSettings,
        FsArtifactSink, LogAppender, MonitorWorker, ReferenceDataset,
    },
    server::RequestServer,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("complaint_classifier={}", config.level)))
        .context("Invalid logging.level")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.format.as_str() {
        "json" => builder.json().init(),
        _ => builder.init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging)?;

    info!("Starting Complaint Classifier");
    info!(
        buffer_size = config.monitoring.buffer_size,
        method = ?config.monitoring.method,
        window = ?config.monitoring.window,
        "Configuration loaded successfully"
    );

    let credential = config.security.credential()?;
    let metrics = Arc::new(ServiceMetrics::new());

    // Reference corpus and vectorizer are fixed before any request is served
    let reference = load_reference_corpus(&config.data.reference_path)?;
    if reference.is_empty() {
        bail!(
            "Reference corpus {} has no usable rows",
            config.data.reference_path.display()
        );
    }
    let vectorizer = Arc::new(FeatureVectorizer::fit(
        reference.iter().map(|r| r.narrative.as_str()),
        config.monitoring.max_features,
    ));
    info!(
        features = vectorizer.feature_count(),
        reference_rows = reference.len(),
        "Feature vectorizer fitted"
    );
    let dataset = ReferenceDataset::build(&vectorizer, &reference);
    let analyzer = DriftAnalyzer::new(
        vectorizer,
        dataset,
        DriftSettings::from(&config.monitoring),
    );

    // Startup model
    let registry = ModelRegistry::with_threads(&config.model.registry_dir, config.model.onnx_threads)
        .with_scheme(&config.model.registry);
    let serving_id = config.model.startup_identifier()?;
    let model = registry
        .load(&serving_id)
        .with_context(|| format!("Failed to load startup model {}", serving_id))?;
    let holder = Arc::new(ModelHolder::new(model));

    let (monitor, monitor_handle) = DataMonitor::spawn(
        config.monitoring.buffer_size,
        MonitorWorker {
            appender: Arc::new(LogAppender::with_tail_capacity(
                &config.data.log_path,
                config.monitoring.window_rows,
            )),
            analyzer: Arc::new(analyzer),
            sink: Arc::new(FsArtifactSink::new(&config.monitoring.report_dir)),
            metrics: Arc::clone(&metrics),
            window: config.monitoring.window,
            window_rows: config.monitoring.window_rows,
            retry_delay: Duration::from_millis(config.monitoring.flush_retry_delay_ms),
        },
    );
    let monitor = Arc::new(monitor);

    let api = Arc::new(ApiService::new(
        credential,
        holder,
        registry,
        serving_id,
        Arc::clone(&monitor),
        Arc::clone(&metrics),
    ));

    let client = async_nats::connect(&config.nats.url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats.url))?;
    info!(url = %config.nats.url, "Connected to NATS");

    let reporter = MetricsReporter::new(Arc::clone(&metrics), config.pipeline.metrics_interval_secs);
    tokio::spawn(reporter.start());

    let server = Arc::new(RequestServer::new(
        client,
        api,
        &config.nats,
        config.pipeline.workers,
    ));
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
    };
    server.run(shutdown).await?;

    // Flush the partial buffer and let the worker drain
    info!(buffered = monitor.buffered(), "Closing data monitor");
    monitor.close();
    match monitor_handle.join().await {
        Ok(summary) => info!(
            batches = summary.batches_received,
            rows_logged = summary.rows_logged,
            reports = summary.reports_published,
            "Monitor worker drained"
        ),
        Err(e) => warn!(error = %e, "Monitor worker did not shut down cleanly"),
    }

    info!("Complaint Classifier shutting down...");
    metrics.print_summary();

    Ok(())
}
