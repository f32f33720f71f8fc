//! # Application State Management
//!
//! Shared state handed to every HTTP handler through `web::Data<AppState>`.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: every actix worker holds a reference to the same state
//! - **RwLock**: many readers (requests) or one writer (config update)
//! - **Clone**: cloning `AppState` clones the `Arc`s, never the data
//!
//! ### Swap-on-update
//! The analyzer and the analysis semaphore are stored as
//! `Arc<RwLock<Arc<T>>>`. A request clones the inner `Arc` and releases the
//! lock immediately; a config update swaps in a new value without waiting
//! for running analyses to finish.
//!
//! ### Lock poisoning
//! A panic while holding one of these locks leaves plain counters and
//! config values in a usable state, so poisoned locks are recovered with
//! `into_inner` instead of propagating the panic to every later request.

use crate::analysis::SnoreAnalyzer;
use crate::classifier::ClassifierEngine;
use crate::config::AppConfig;
use crate::storage::{InMemoryRecordingStore, RecordingStore};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// The main application state shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// HTTP and analysis counters, updated by middleware and handlers
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,

    /// Owner of the active snore classifier
    pub engine: Arc<ClassifierEngine>,

    /// Where analysis results are persisted
    pub store: Arc<dyn RecordingStore>,

    /// Pipeline built from the `analysis` config section
    analyzer: Arc<RwLock<Arc<SnoreAnalyzer>>>,

    /// One permit per analysis allowed to run at once
    analysis_slots: Arc<RwLock<Arc<Semaphore>>>,
}

/// Counters collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of error responses since server start
    pub error_count: u64,

    /// Analyses currently running
    pub active_analyses: u32,

    /// Analyses turned away because every slot was busy
    pub rejected_analyses: u64,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    /// Number of requests to this specific endpoint
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    /// Number of errors that occurred for this endpoint
    pub error_count: u64,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AppState {
    /// Create state with an in-memory recording store.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        Self::with_store(config, Arc::new(InMemoryRecordingStore::new()))
    }

    /// Create state around a given recording store.
    ///
    /// Fails when the `analysis` section does not describe a valid pipeline.
    pub fn with_store(config: AppConfig, store: Arc<dyn RecordingStore>) -> anyhow::Result<Self> {
        let analyzer = config.analyzer()?;
        let slots = Semaphore::new(config.performance.max_concurrent_analyses);
        let engine = ClassifierEngine::new(config.performance.serialize_inference);

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            engine: Arc::new(engine),
            store,
            analyzer: Arc::new(RwLock::new(Arc::new(analyzer))),
            analysis_slots: Arc::new(RwLock::new(Arc::new(slots))),
        })
    }

    /// Get a copy of the current configuration.
    pub fn get_config(&self) -> AppConfig {
        read(&self.config).clone()
    }

    /// Validate and apply a new configuration.
    ///
    /// ## What changes immediately:
    /// - The analyzer is rebuilt when the `analysis` section changed
    /// - A new semaphore replaces the old one when the concurrency limit
    ///   changed; running analyses keep their old permits
    /// - `serialize_inference` applies to the next model load
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        let old_config = self.get_config();

        if new_config.analysis != old_config.analysis {
            let analyzer = new_config.analyzer().map_err(|e| e.to_string())?;
            *write(&self.analyzer) = Arc::new(analyzer);
            tracing::info!("Analysis pipeline rebuilt from updated configuration");
        }

        let limit = new_config.performance.max_concurrent_analyses;
        if limit != old_config.performance.max_concurrent_analyses {
            *write(&self.analysis_slots) = Arc::new(Semaphore::new(limit));
            tracing::info!("Concurrent analysis limit set to {}", limit);
        }

        self.engine
            .set_serialize_inference(new_config.performance.serialize_inference);

        *write(&self.config) = new_config;
        Ok(())
    }

    /// The analyzer to use for one request.
    pub fn analyzer(&self) -> Arc<SnoreAnalyzer> {
        Arc::clone(&read(&self.analyzer))
    }

    /// Take an analysis slot without waiting. `None` means the service is
    /// at capacity.
    pub fn try_acquire_analysis_slot(&self) -> Option<OwnedSemaphorePermit> {
        let slots = Arc::clone(&read(&self.analysis_slots));
        slots.try_acquire_owned().ok()
    }

    /// Increment the total request counter (called by middleware).
    pub fn increment_request_count(&self) {
        write(&self.metrics).request_count += 1;
    }

    /// Increment the total error counter.
    pub fn increment_error_count(&self) {
        write(&self.metrics).error_count += 1;
    }

    /// Record duration and outcome for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = write(&self.metrics);
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Count one running analysis until the returned guard is dropped.
    ///
    /// The guard also decrements when the request future is cancelled or
    /// the blocking task panics.
    pub fn begin_analysis(&self) -> ActiveAnalysis {
        write(&self.metrics).active_analyses += 1;
        ActiveAnalysis {
            metrics: Arc::clone(&self.metrics),
        }
    }

    pub fn record_rejected_analysis(&self) {
        write(&self.metrics).rejected_analyses += 1;
    }

    /// Consistent copy of the counters (used by `/metrics` and `/health`).
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        read(&self.metrics).clone()
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Keeps `active_analyses` raised while alive.
#[must_use = "the analysis stops counting as active when the guard is dropped"]
pub struct ActiveAnalysis {
    metrics: Arc<RwLock<AppMetrics>>,
}

impl Drop for ActiveAnalysis {
    fn drop(&mut self) {
        let mut metrics = write(&self.metrics);
        metrics.active_analyses = metrics.active_analyses.saturating_sub(1);
    }
}

impl EndpointMetric {
    /// Average response time for this endpoint.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_are_bounded() {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_analyses = 1;
        let state = AppState::new(config).unwrap();

        let first = state.try_acquire_analysis_slot();
        assert!(first.is_some());
        assert!(state.try_acquire_analysis_slot().is_none());
        drop(first);
        assert!(state.try_acquire_analysis_slot().is_some());
    }

    #[test]
    fn test_update_config_rebuilds_analyzer() {
        let state = AppState::new(AppConfig::default()).unwrap();
        let mut config = state.get_config();
        config.analysis.min_silence_windows = 7;
        config.performance.max_concurrent_analyses = 2;

        state.update_config(config).unwrap();
        assert_eq!(state.analyzer().settings().min_silence_windows, 7);

        let _a = state.try_acquire_analysis_slot().unwrap();
        let _b = state.try_acquire_analysis_slot().unwrap();
        assert!(state.try_acquire_analysis_slot().is_none());
    }

    #[test]
    fn test_invalid_update_is_rejected() {
        let state = AppState::new(AppConfig::default()).unwrap();
        let mut config = state.get_config();
        config.analysis.chunk_seconds = 0.0;

        assert!(state.update_config(config).is_err());
        assert_eq!(state.analyzer().settings().chunk_seconds, 4.0);
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = AppState::new(AppConfig::default()).unwrap();
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["GET /health"];
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
    }

    #[test]
    fn test_active_analysis_guard() {
        let state = AppState::new(AppConfig::default()).unwrap();
        let first = state.begin_analysis();
        let second = state.begin_analysis();
        assert_eq!(state.get_metrics_snapshot().active_analyses, 2);

        drop(first);
        assert_eq!(state.get_metrics_snapshot().active_analyses, 1);
        drop(second);
        assert_eq!(state.get_metrics_snapshot().active_analyses, 0);
    }

    #[test]
    fn test_active_analysis_released_on_panic() {
        let state = AppState::new(AppConfig::default()).unwrap();
        let guard = state.begin_analysis();

        let outcome = std::thread::spawn(move || {
            let _guard = guard;
            panic!("analysis blew up");
        })
        .join();

        assert!(outcome.is_err());
        assert_eq!(state.get_metrics_snapshot().active_analyses, 0);
    }
}
