//! Prediction monitoring: buffering, durable logging and drift analysis.
//!
//! Requests hand records to [`DataMonitor::collect`]. Once the buffer reaches
//! its threshold the records are detached and queued for a single background
//! worker that appends them to the log, then runs drift analysis and publishes
//! the report. The caller never waits on any of that.

pub mod buffer;
pub mod drift;
pub mod log_store;
pub mod sink;

pub use buffer::{FlushBatch, IngestionBuffer};
pub use drift::{DriftAnalyzer, DriftSettings, ReferenceDataset};
pub use log_store::LogAppender;
pub use sink::{ArtifactSink, FsArtifactSink};

use crate::config::WindowSource;
use crate::error::MonitoringError;
use crate::metrics::ServiceMetrics;
use crate::types::{BufferRecord, DriftReport};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct MonitorState {
    buffer: IngestionBuffer,
    /// `None` once the monitor is closed
    tx: Option<mpsc::UnboundedSender<FlushBatch>>,
}

/// Front of the monitoring pipeline, shared by all request handlers.
pub struct DataMonitor {
    state: Mutex<MonitorState>,
    metrics: Arc<ServiceMetrics>,
}

impl DataMonitor {
    /// Start the background worker and return the collecting side.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(threshold: usize, worker: MonitorWorker) -> (Self, MonitorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let metrics = Arc::clone(&worker.metrics);
        let handle = tokio::spawn(worker.run(rx));

        let monitor = Self {
            state: Mutex::new(MonitorState {
                buffer: IngestionBuffer::new(threshold),
                tx: Some(tx),
            }),
            metrics,
        };
        (monitor, MonitorHandle { handle })
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        // Buffer operations never leave the state half-updated
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record one observed prediction.
    ///
    /// Push, threshold check, detach and hand-off happen under one lock, so
    /// batches reach the worker in the order they were detached.
    pub fn collect(&self, narrative: &str, product: &str) {
        let mut state = self.lock();
        ServiceMetrics::incr(&self.metrics.records_collected);
        if let Some(batch) = state.buffer.push(BufferRecord::new(narrative, product)) {
            self.dispatch(&state, batch);
        }
    }

    /// Flush a partially filled buffer. Returns whether anything was queued.
    pub fn flush_now(&self) -> bool {
        let mut state = self.lock();
        match state.buffer.detach() {
            Some(batch) => {
                self.dispatch(&state, batch);
                true
            }
            None => false,
        }
    }

    /// Flush what is buffered and stop accepting batches. The worker exits
    /// after draining its queue.
    pub fn close(&self) {
        let mut state = self.lock();
        if let Some(batch) = state.buffer.detach() {
            self.dispatch(&state, batch);
        }
        if state.tx.take().is_some() {
            info!("Data monitor closed");
        }
    }

    /// Records currently waiting in the buffer
    pub fn buffered(&self) -> usize {
        self.lock().buffer.len()
    }

    fn dispatch(&self, state: &MonitorState, batch: FlushBatch) {
        ServiceMetrics::incr(&self.metrics.batches_flushed);
        let (sequence, rows) = (batch.sequence, batch.len());

        match &state.tx {
            Some(tx) => match tx.send(batch) {
                Ok(()) => debug!(sequence, rows, "Batch queued for logging"),
                Err(_) => {
                    ServiceMetrics::incr(&self.metrics.flushes_dropped);
                    error!(sequence, rows, "Monitor worker is gone, batch dropped");
                }
            },
            None => {
                ServiceMetrics::incr(&self.metrics.flushes_dropped);
                warn!(sequence, rows, "Data monitor closed, batch dropped");
            }
        }
    }
}

/// Counts reported by the worker when it exits
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerSummary {
    pub batches_received: u64,
    pub batches_logged: u64,
    pub rows_logged: u64,
    pub batches_dropped: u64,
    pub reports_published: u64,
    pub analysis_failures: u64,
}

/// Handle to the running worker
pub struct MonitorHandle {
    handle: JoinHandle<WorkerSummary>,
}

impl MonitorHandle {
    /// Wait for the worker to drain its queue and exit.
    pub async fn join(self) -> Result<WorkerSummary, MonitoringError> {
        self.handle
            .await
            .map_err(|e| MonitoringError::Worker(e.to_string()))
    }
}

/// Background side of the monitor: log append, drift analysis, publication.
pub struct MonitorWorker {
    pub appender: Arc<LogAppender>,
    pub analyzer: Arc<DriftAnalyzer>,
    pub sink: Arc<dyn ArtifactSink>,
    pub metrics: Arc<ServiceMetrics>,
    pub window: WindowSource,
    /// Log rows read back when the window comes from the log
    pub window_rows: usize,
    /// Delay before the single retry of a failed append
    pub retry_delay: Duration,
}

impl MonitorWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<FlushBatch>) -> WorkerSummary {
        let mut summary = WorkerSummary::default();
        info!(window = ?self.window, "Monitor worker started");

        while let Some(batch) = rx.recv().await {
            summary.batches_received += 1;
            self.process(batch, &mut summary).await;
        }

        info!(
            batches = summary.batches_received,
            rows_logged = summary.rows_logged,
            dropped = summary.batches_dropped,
            reports = summary.reports_published,
            "Monitor worker stopped"
        );
        summary
    }

    async fn process(&self, batch: FlushBatch, summary: &mut WorkerSummary) {
        let sequence = batch.sequence;

        let rows = match self.append_with_retry(&batch).await {
            Ok(rows) => rows,
            Err(e) => {
                summary.batches_dropped += 1;
                ServiceMetrics::incr(&self.metrics.flushes_dropped);
                error!(sequence, rows = batch.len(), error = %e, "Log append failed after retry, batch dropped");
                return;
            }
        };
        summary.batches_logged += 1;
        summary.rows_logged += rows as u64;
        self.metrics
            .rows_logged
            .fetch_add(rows as u64, std::sync::atomic::Ordering::Relaxed);
        info!(sequence, rows, "Batch flushed to prediction log");

        // Analysis only starts after the append has completed
        match self.analyze(batch).await {
            Ok(report) => {
                summary.reports_published += 1;
                ServiceMetrics::incr(&self.metrics.drift_runs);
                if report.dataset_drift {
                    ServiceMetrics::incr(&self.metrics.drift_detected);
                    warn!(
                        sequence,
                        run_id = %report.run_id,
                        share = report.share_drifted,
                        features = ?report.drifted_feature_names(),
                        "Data drift detected"
                    );
                } else {
                    info!(
                        sequence,
                        run_id = %report.run_id,
                        drifted = report.drifted_features,
                        "No dataset drift"
                    );
                }
            }
            Err(e) => {
                summary.analysis_failures += 1;
                ServiceMetrics::incr(&self.metrics.analysis_failures);
                error!(sequence, error = %e, "Drift analysis failed");
            }
        }
    }

    async fn append(&self, records: Vec<BufferRecord>) -> Result<usize, MonitoringError> {
        let appender = Arc::clone(&self.appender);
        let rows = tokio::task::spawn_blocking(move || appender.append(&records))
            .await
            .map_err(|e| MonitoringError::Worker(e.to_string()))??;
        Ok(rows)
    }

    async fn append_with_retry(&self, batch: &FlushBatch) -> Result<usize, MonitoringError> {
        match self.append(batch.records.clone()).await {
            Ok(rows) => Ok(rows),
            Err(e) => {
                warn!(
                    sequence = batch.sequence,
                    error = %e,
                    retry_in_ms = self.retry_delay.as_millis() as u64,
                    "Log append failed, retrying"
                );
                tokio::time::sleep(self.retry_delay).await;
                self.append(batch.records.clone()).await
            }
        }
    }

    async fn analyze(&self, batch: FlushBatch) -> Result<DriftReport, MonitoringError> {
        let appender = Arc::clone(&self.appender);
        let analyzer = Arc::clone(&self.analyzer);
        let sink = Arc::clone(&self.sink);
        let window_source = self.window;
        let window_rows = self.window_rows;

        tokio::task::spawn_blocking(move || {
            let window = match window_source {
                WindowSource::Log => appender.read_tail(window_rows)?,
                WindowSource::Batch => batch.records,
            };
            let report = analyzer.run(&window)?;
            sink.publish(&report, &sink::render_html(&report))?;
            Ok::<_, MonitoringError>(report)
        })
        .await
        .map_err(|e| MonitoringError::Worker(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_extractor::FeatureVectorizer;
    use crate::monitoring::log_store::read_records;
    use proptest::prelude::*;
    use std::path::Path;

    fn reference() -> Vec<BufferRecord> {
        vec![
            BufferRecord::new("loan issue with payment", "Loan"),
            BufferRecord::new("card problem with charge", "Credit card"),
            BufferRecord::new("late fee on loan", "Loan"),
            BufferRecord::new("credit card fee", "Credit card"),
        ]
    }

    fn worker(dir: &Path, log: &Path, window: WindowSource) -> MonitorWorker {
        let records = reference();
        let vectorizer = Arc::new(FeatureVectorizer::fit(
            records.iter().map(|r| r.narrative.as_str()),
            100,
        ));
        let reference = ReferenceDataset::build(&vectorizer, &records);
        MonitorWorker {
            appender: Arc::new(LogAppender::new(log)),
            analyzer: Arc::new(DriftAnalyzer::new(
                vectorizer,
                reference,
                DriftSettings::default(),
            )),
            sink: Arc::new(FsArtifactSink::new(dir.join("reports"))),
            metrics: Arc::new(ServiceMetrics::new()),
            window,
            window_rows: 500,
            retry_delay: Duration::from_millis(10),
        }
    }

    fn report_count(dir: &Path) -> usize {
        match std::fs::read_dir(dir.join("reports")) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    #[tokio::test]
    async fn test_threshold_flush_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("prediction_log.csv");
        let (monitor, handle) = DataMonitor::spawn(3, worker(dir.path(), &log, WindowSource::Log));

        monitor.collect("loan issue", "Loan");
        monitor.collect("card problem", "Credit card");
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Below the threshold nothing is flushed
        assert_eq!(monitor.buffered(), 2);
        assert!(!log.exists());
        assert_eq!(report_count(dir.path()), 0);

        monitor.collect("late fee", "Loan");
        assert_eq!(monitor.buffered(), 0);

        monitor.close();
        let summary = handle.join().await.unwrap();
        assert_eq!(summary.batches_logged, 1);
        assert_eq!(summary.rows_logged, 3);
        assert_eq!(summary.reports_published, 1);

        assert_eq!(
            read_records(&log).unwrap(),
            vec![
                BufferRecord::new("loan issue", "Loan"),
                BufferRecord::new("card problem", "Credit card"),
                BufferRecord::new("late fee", "Loan"),
            ]
        );
        assert_eq!(report_count(dir.path()), 1);
    }

    #[tokio::test]
    async fn test_close_flushes_partial_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log.csv");
        let (monitor, handle) = DataMonitor::spawn(10, worker(dir.path(), &log, WindowSource::Batch));

        monitor.collect("loan issue", "Loan");
        monitor.close();
        // Collected after close: stays buffered, never reaches the worker
        monitor.collect("late fee", "Loan");
        assert_eq!(monitor.buffered(), 1);

        let summary = handle.join().await.unwrap();
        assert_eq!(summary.batches_received, 1);
        assert_eq!(summary.rows_logged, 1);
        assert_eq!(read_records(&log).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_append_drops_batch_after_retry() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let log = blocker.join("log.csv");

        let w = worker(dir.path(), &log, WindowSource::Log);
        let metrics = Arc::clone(&w.metrics);
        let (monitor, handle) = DataMonitor::spawn(2, w);

        monitor.collect("loan issue", "Loan");
        monitor.collect("card problem", "Credit card");
        monitor.close();

        let summary = handle.join().await.unwrap();
        assert_eq!(summary.batches_dropped, 1);
        assert_eq!(summary.reports_published, 0);
        assert_eq!(ServiceMetrics::get(&metrics.flushes_dropped), 1);
        assert_eq!(report_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_concurrent_collectors_flush_every_record_once() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 50;

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log.csv");
        let (monitor, handle) = DataMonitor::spawn(7, worker(dir.path(), &log, WindowSource::Batch));

        std::thread::scope(|scope| {
            for t in 0..THREADS {
                let monitor = &monitor;
                scope.spawn(move || {
                    for i in 0..PER_THREAD {
                        monitor.collect(&format!("thread {} complaint {}", t, i), "Loan");
                    }
                });
            }
        });
        monitor.close();

        let summary = handle.join().await.unwrap();
        assert_eq!(summary.rows_logged, (THREADS * PER_THREAD) as u64);
        assert_eq!(summary.batches_dropped, 0);

        let records = read_records(&log).unwrap();
        assert_eq!(records.len(), THREADS * PER_THREAD);

        // Each thread's records appear exactly once and in submission order
        for t in 0..THREADS {
            let prefix = format!("thread {} ", t);
            let mine: Vec<&str> = records
                .iter()
                .filter(|r| r.narrative.starts_with(&prefix))
                .map(|r| r.narrative.as_str())
                .collect();
            let expected: Vec<String> = (0..PER_THREAD)
                .map(|i| format!("thread {} complaint {}", t, i))
                .collect();
            assert_eq!(mine, expected);
        }
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_collect_below_threshold_leaves_log_untouched(
            (threshold, k) in (2usize..16).prop_flat_map(|t| (Just(t), 0..t)),
            seeded in 1usize..5,
        ) {
            let dir = tempfile::tempdir().unwrap();
            let log = dir.path().join("prediction_log.csv");
            let earlier: Vec<_> = (0..seeded)
                .map(|i| BufferRecord::new(format!("earlier {}", i), "Loan"))
                .collect();
            LogAppender::new(&log).append(&earlier).unwrap();
            let before = std::fs::read(&log).unwrap();

            let summary = runtime().block_on(async {
                let (monitor, handle) =
                    DataMonitor::spawn(threshold, worker(dir.path(), &log, WindowSource::Log));
                for i in 0..k {
                    monitor.collect(&format!("complaint {}", i), "Loan");
                }
                assert_eq!(monitor.buffered(), k);
                tokio::task::yield_now().await;

                // Dropped without close: the partial buffer is never flushed
                drop(monitor);
                handle.join().await.unwrap()
            });

            prop_assert_eq!(summary.batches_received, 0);
            prop_assert_eq!(std::fs::read(&log).unwrap(), before);
            prop_assert_eq!(report_count(dir.path()), 0);
        }

        #[test]
        fn prop_each_full_buffer_flushes_once(
            (threshold, k) in (1usize..8).prop_flat_map(|t| (Just(t), t..4 * t)),
        ) {
            let dir = tempfile::tempdir().unwrap();
            let log = dir.path().join("prediction_log.csv");

            let summary = runtime().block_on(async {
                let (monitor, handle) =
                    DataMonitor::spawn(threshold, worker(dir.path(), &log, WindowSource::Batch));
                for i in 0..k {
                    monitor.collect(&format!("complaint {}", i), "Loan");
                    assert!(monitor.buffered() < threshold);
                }
                assert_eq!(monitor.buffered(), k % threshold);
                drop(monitor);
                handle.join().await.unwrap()
            });

            let full = k / threshold;
            prop_assert_eq!(summary.batches_received, full as u64);
            prop_assert_eq!(summary.rows_logged, (full * threshold) as u64);
            prop_assert_eq!(read_records(&log).unwrap().len(), full * threshold);
        }
    }
}
