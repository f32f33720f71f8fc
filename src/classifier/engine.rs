//! # Classifier Engine
//!
//! Owns the snore classifier the service is currently using. Handlers never
//! hold the model directly: they take a snapshot (`Arc`) at the start of a
//! request, so loading or unloading a model never disturbs an analysis that
//! is already running.
//!
//! ## Key Responsibilities:
//! - **Model lifecycle**: load from disk, install, unload
//! - **Snapshotting**: hand out `Arc<dyn SnoreClassifier>` per request
//! - **Performance monitoring**: track analyses, audio time and failures

use crate::analysis::{AnalysisError, AnalysisResult};
use crate::classifier::{CnnSnoreClassifier, SerializedClassifier, SnoreClassifier};
use anyhow::{anyhow, Result};
use candle_core::Device;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Description of the installed classifier, returned by the model endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct LoadedModelInfo {
    pub description: String,
    pub source: Option<String>,
    pub loaded_at: DateTime<Utc>,
    pub load_time_ms: u64,
    /// Whether inference calls are funneled through a mutex
    pub serialized: bool,
}

struct LoadedModel {
    classifier: Arc<dyn SnoreClassifier>,
    info: LoadedModelInfo,
}

/// Performance tracking for the classifier engine.
#[derive(Debug, Default)]
struct EngineMetrics {
    /// Analyses that reached the classifier
    total_analyses: u64,
    /// Analyses that ended in an error
    failed_analyses: u64,
    /// Total audio duration analyzed (seconds)
    total_audio_duration: f64,
    /// Total processing time (milliseconds)
    total_processing_time: u64,
    /// Snore events detected across all analyses
    total_snore_events: u64,
    /// Apnea events detected across all analyses
    total_apnea_events: u64,
}

/// Performance statistics for the classifier engine.
#[derive(Debug, Clone, Serialize)]
pub struct EnginePerformanceStats {
    pub total_analyses: u64,
    pub failed_analyses: u64,
    pub total_audio_hours: f64,
    pub average_processing_time_ms: u64,
    pub success_rate: f32,
    pub total_snore_events: u64,
    pub total_apnea_events: u64,
    /// Ratio of audio time to processing time (>1.0 = faster than real time)
    pub throughput_factor: f64,
}

/// High-level owner of the active snore classifier.
///
/// ## Thread Safety:
/// `RwLock` lets many requests read the current model at once; loading and
/// unloading take the write lock only for the pointer swap.
pub struct ClassifierEngine {
    model: Arc<RwLock<Option<LoadedModel>>>,
    metrics: Arc<RwLock<EngineMetrics>>,
    /// Read at install time; changing it affects the next load only
    serialize_inference: AtomicBool,
}

impl ClassifierEngine {
    /// Create an engine with no model installed.
    pub fn new(serialize_inference: bool) -> Self {
        Self {
            model: Arc::new(RwLock::new(None)),
            metrics: Arc::new(RwLock::new(EngineMetrics::default())),
            serialize_inference: AtomicBool::new(serialize_inference),
        }
    }

    pub fn set_serialize_inference(&self, serialize: bool) {
        self.serialize_inference.store(serialize, Ordering::Relaxed);
    }

    /// Load a CNN from a safetensors file and make it the active model.
    ///
    /// The previous model (if any) stays active until the new one is
    /// fully loaded, and keeps serving requests that already hold it.
    pub async fn load_model(&self, path: &Path, device: Device) -> Result<LoadedModelInfo> {
        tracing::info!("Loading classifier from {}", path.display());
        let start_time = Instant::now();

        let owned: PathBuf = path.to_path_buf();
        let model = tokio::task::spawn_blocking(move || CnnSnoreClassifier::load(&owned, device))
            .await
            .map_err(|e| anyhow!("Model loading task failed: {}", e))??;

        let source = Some(model.info().source.clone());
        let info = self
            .install(Arc::new(model), source, start_time.elapsed().as_millis() as u64)
            .await;

        tracing::info!("Classifier ready in {}ms: {}", info.load_time_ms, info.description);
        Ok(info)
    }

    /// Make an already constructed classifier the active model.
    pub async fn install(
        &self,
        classifier: Arc<dyn SnoreClassifier>,
        source: Option<String>,
        load_time_ms: u64,
    ) -> LoadedModelInfo {
        let serialized = self.serialize_inference.load(Ordering::Relaxed);
        let classifier: Arc<dyn SnoreClassifier> = if serialized {
            Arc::new(SerializedClassifier::new(classifier))
        } else {
            classifier
        };

        let info = LoadedModelInfo {
            description: classifier.describe(),
            source,
            loaded_at: Utc::now(),
            load_time_ms,
            serialized,
        };

        let mut model_guard = self.model.write().await;
        *model_guard = Some(LoadedModel {
            classifier,
            info: info.clone(),
        });
        info
    }

    /// Unload the current model. Returns whether one was loaded.
    pub async fn unload_model(&self) -> bool {
        tracing::info!("Unloading snore classifier");
        let mut model_guard = self.model.write().await;
        model_guard.take().is_some()
    }

    /// Check if a model is currently loaded and ready.
    pub async fn is_model_loaded(&self) -> bool {
        self.model.read().await.is_some()
    }

    /// Snapshot of the active classifier for one analysis.
    pub async fn current(&self) -> Option<Arc<dyn SnoreClassifier>> {
        self.model
            .read()
            .await
            .as_ref()
            .map(|loaded| Arc::clone(&loaded.classifier))
    }

    /// Like [`current`](Self::current), but a missing model is an error.
    pub async fn classifier(&self) -> Result<Arc<dyn SnoreClassifier>, AnalysisError> {
        self.current()
            .await
            .ok_or_else(|| AnalysisError::ModelUnavailable("no snore classifier is loaded".to_string()))
    }

    /// Information about the currently loaded model.
    pub async fn get_current_model_info(&self) -> Option<LoadedModelInfo> {
        self.model.read().await.as_ref().map(|loaded| loaded.info.clone())
    }

    /// Record one finished analysis.
    pub async fn record_analysis(&self, result: &AnalysisResult, processing_time_ms: u64) {
        let mut metrics = self.metrics.write().await;
        metrics.total_analyses += 1;
        metrics.total_audio_duration += result.duration_seconds;
        metrics.total_processing_time += processing_time_ms;
        metrics.total_snore_events += result.snoring_count as u64;
        metrics.total_apnea_events += result.apnea_events_count as u64;
    }

    /// Record one analysis that failed after reaching the engine.
    pub async fn record_failure(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.total_analyses += 1;
        metrics.failed_analyses += 1;
    }

    /// Get performance statistics for the classifier engine.
    pub async fn get_performance_stats(&self) -> EnginePerformanceStats {
        let metrics = self.metrics.read().await;
        let succeeded = metrics.total_analyses - metrics.failed_analyses;

        EnginePerformanceStats {
            total_analyses: metrics.total_analyses,
            failed_analyses: metrics.failed_analyses,
            total_audio_hours: metrics.total_audio_duration / 3600.0,
            average_processing_time_ms: if succeeded > 0 {
                metrics.total_processing_time / succeeded
            } else {
                0
            },
            success_rate: if metrics.total_analyses > 0 {
                succeeded as f32 / metrics.total_analyses as f32
            } else {
                0.0
            },
            total_snore_events: metrics.total_snore_events,
            total_apnea_events: metrics.total_apnea_events,
            throughput_factor: if metrics.total_processing_time > 0 {
                (metrics.total_audio_duration * 1000.0) / metrics.total_processing_time as f64
            } else {
                0.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::apnea::ApneaEvent;
    use crate::analysis::events::SnoreEvent;
    use crate::analysis::result::{AssemblyInput, ResultAssembler};
    use crate::classifier::testing::ConstantClassifier;

    #[tokio::test]
    async fn test_install_and_unload() {
        let engine = ClassifierEngine::new(false);
        assert!(!engine.is_model_loaded().await);
        assert!(engine.current().await.is_none());
        assert!(matches!(
            engine.classifier().await,
            Err(AnalysisError::ModelUnavailable(_))
        ));

        let info = engine.install(Arc::new(ConstantClassifier(0.3)), None, 0).await;
        assert_eq!(info.description, "constant(0.3)");
        assert!(engine.is_model_loaded().await);

        assert!(engine.unload_model().await);
        assert!(!engine.is_model_loaded().await);
        assert!(!engine.unload_model().await);
    }

    #[tokio::test]
    async fn test_snapshot_survives_unload() {
        let engine = ClassifierEngine::new(false);
        engine.install(Arc::new(ConstantClassifier(0.9)), None, 0).await;

        let snapshot = engine.current().await.unwrap();
        engine.unload_model().await;
        assert_eq!(snapshot.predict(&[]).unwrap(), Vec::<f32>::new());
        assert_eq!(snapshot.describe(), "constant(0.9)");
    }

    #[tokio::test]
    async fn test_serialized_engine_wraps_models() {
        let engine = ClassifierEngine::new(true);
        let info = engine.install(Arc::new(ConstantClassifier(0.1)), None, 5).await;
        assert!(info.serialized);
        assert!(info.description.ends_with("(serialized)"));
    }

    #[tokio::test]
    async fn test_load_missing_file_keeps_previous_model() {
        let engine = ClassifierEngine::new(false);
        engine.install(Arc::new(ConstantClassifier(0.2)), None, 0).await;

        let result = engine
            .load_model(Path::new("/nonexistent/snore.safetensors"), Device::Cpu)
            .await;
        assert!(result.is_err());
        assert!(engine.is_model_loaded().await);
    }

    #[tokio::test]
    async fn test_performance_stats() {
        let engine = ClassifierEngine::new(false);
        let result = ResultAssembler::new().assemble(
            Utc::now(),
            AssemblyInput {
                events: (0..4)
                    .map(|i| SnoreEvent {
                        chunk_index: i,
                        relative_seconds: i as f64 * 4.0,
                        probability: 0.9,
                        loudness_db: None,
                    })
                    .collect(),
                apnea_events: vec![ApneaEvent { window_index: 9 }],
                duration_seconds: 3600.0,
                ..AssemblyInput::default()
            },
        );
        engine.record_analysis(&result, 1000).await;
        engine.record_failure().await;

        let stats = engine.get_performance_stats().await;
        assert_eq!(stats.total_analyses, 2);
        assert_eq!(stats.failed_analyses, 1);
        assert_eq!(stats.total_snore_events, 4);
        assert_eq!(stats.total_apnea_events, 1);
        assert!((stats.total_audio_hours - 1.0).abs() < 1e-9);
        assert!((stats.success_rate - 0.5).abs() < 1e-6);
        assert_eq!(stats.average_processing_time_ms, 1000);
    }
}
