//! # Snore Classifier Module
//!
//! The classifier decides, per feature tensor, how likely the chunk is to be
//! a snore. The analysis core only knows the [`SnoreClassifier`] trait; the
//! concrete model is constructed at startup (or at runtime through the model
//! endpoints) and injected into each analysis call.
//!
//! ## Key Components:
//! - **SnoreClassifier**: the batch inference contract
//! - **CnnSnoreClassifier**: small convolutional network running on candle
//! - **ClassifierEngine**: owns the currently loaded model and its metrics
//! - **SerializedClassifier**: wrapper allowing one inference at a time
//!
//! ## Contract:
//! - Input: N tensors of shape `(n_mels, max_frames, 1)`
//! - Output: N probabilities in `[0, 1]`, same order as the input
//! - Implementations are `Send + Sync` and read-only during inference

pub mod engine;   // Runtime model ownership and metrics
pub mod model;    // Candle CNN implementation

pub use engine::ClassifierEngine;
pub use model::CnnSnoreClassifier;

use crate::analysis::features::FeatureTensor;
use crate::analysis::AnalysisError;
use std::sync::{Arc, Mutex};

/// Batch snore classifier.
///
/// ## Rust Concepts:
/// - **Send + Sync supertraits**: one loaded model is shared by concurrent
///   requests through `Arc<dyn SnoreClassifier>`
/// - **&self**: inference never mutates the model
pub trait SnoreClassifier: Send + Sync {
    /// One probability per tensor, in input order.
    fn predict(&self, batch: &[FeatureTensor]) -> Result<Vec<f32>, AnalysisError>;

    /// Human-readable model description for logs and status endpoints.
    fn describe(&self) -> String;
}

/// Runs the wrapped classifier under a mutex.
///
/// Used when the inference backend must not see concurrent calls; feature
/// extraction and aggregation of other requests keep running in parallel.
pub struct SerializedClassifier {
    inner: Arc<dyn SnoreClassifier>,
    gate: Mutex<()>,
}

impl SerializedClassifier {
    pub fn new(inner: Arc<dyn SnoreClassifier>) -> Self {
        Self {
            inner,
            gate: Mutex::new(()),
        }
    }
}

impl SnoreClassifier for SerializedClassifier {
    fn predict(&self, batch: &[FeatureTensor]) -> Result<Vec<f32>, AnalysisError> {
        let _guard = self
            .gate
            .lock()
            .map_err(|_| AnalysisError::ModelUnavailable("inference lock poisoned".to_string()))?;
        self.inner.predict(batch)
    }

    fn describe(&self) -> String {
        format!("{} (serialized)", self.inner.describe())
    }
}

/// Check a classifier's output against the batch it was given.
pub fn validate_probabilities(expected: usize, probabilities: &[f32]) -> Result<(), AnalysisError> {
    if probabilities.len() != expected {
        return Err(AnalysisError::ModelUnavailable(format!(
            "classifier returned {} probabilities for {} inputs",
            probabilities.len(),
            expected
        )));
    }
    if let Some(bad) = probabilities
        .iter()
        .find(|p| !p.is_finite() || **p < 0.0 || **p > 1.0)
    {
        return Err(AnalysisError::ModelUnavailable(format!(
            "classifier returned an invalid probability: {}",
            bad
        )));
    }
    Ok(())
}

#[cfg(test)]
pub mod testing {
    //! Stub classifiers shared by tests across the crate.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns scripted probabilities in call order, one per input tensor.
    pub struct ScriptedClassifier {
        probabilities: Vec<f32>,
        cursor: AtomicUsize,
    }

    impl ScriptedClassifier {
        pub fn new(probabilities: Vec<f32>) -> Self {
            Self {
                probabilities,
                cursor: AtomicUsize::new(0),
            }
        }
    }

    impl SnoreClassifier for ScriptedClassifier {
        fn predict(&self, batch: &[FeatureTensor]) -> Result<Vec<f32>, AnalysisError> {
            let start = self.cursor.fetch_add(batch.len(), Ordering::SeqCst);
            Ok((start..start + batch.len())
                .map(|i| self.probabilities.get(i).copied().unwrap_or(0.0))
                .collect())
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    /// Always returns the same probability.
    pub struct ConstantClassifier(pub f32);

    impl SnoreClassifier for ConstantClassifier {
        fn predict(&self, batch: &[FeatureTensor]) -> Result<Vec<f32>, AnalysisError> {
            Ok(vec![self.0; batch.len()])
        }

        fn describe(&self) -> String {
            format!("constant({})", self.0)
        }
    }

    /// Always fails.
    pub struct BrokenClassifier;

    impl SnoreClassifier for BrokenClassifier {
        fn predict(&self, _batch: &[FeatureTensor]) -> Result<Vec<f32>, AnalysisError> {
            Err(AnalysisError::ModelUnavailable("runtime crashed".to_string()))
        }

        fn describe(&self) -> String {
            "broken".to_string()
        }
    }

    /// Returns one probability too few.
    pub struct ShortClassifier;

    impl SnoreClassifier for ShortClassifier {
        fn predict(&self, batch: &[FeatureTensor]) -> Result<Vec<f32>, AnalysisError> {
            Ok(vec![0.9; batch.len().saturating_sub(1)])
        }

        fn describe(&self) -> String {
            "short".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ConstantClassifier;
    use super::*;
    use crate::analysis::features::{FeatureConfig, FeatureExtractor};

    #[test]
    fn test_validate_probabilities() {
        assert!(validate_probabilities(2, &[0.0, 1.0]).is_ok());
        assert!(validate_probabilities(3, &[0.0, 1.0]).is_err());
        assert!(validate_probabilities(1, &[1.5]).is_err());
        assert!(validate_probabilities(1, &[f32::NAN]).is_err());
    }

    #[test]
    fn test_serialized_classifier_delegates() {
        let extractor = FeatureExtractor::new(FeatureConfig::default()).unwrap();
        let tensor = extractor.extract(0, &[0.1; 2048]).unwrap();
        let classifier = SerializedClassifier::new(Arc::new(ConstantClassifier(0.7)));

        assert_eq!(classifier.predict(&[tensor.clone(), tensor]).unwrap(), vec![0.7, 0.7]);
        assert!(classifier.describe().contains("serialized"));
    }
}
