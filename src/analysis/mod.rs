//! # Snore Analysis Module
//!
//! The core analysis pipeline: everything between a decoded clip and the
//! summary that gets stored and returned to the client.
//!
//! ## Key Components:
//! - **Feature extraction**: fixed-shape log-mel spectrograms per chunk
//! - **Loudness meter**: RMS and decibel-like score per one-second window
//! - **Apnea detector**: silence-run state machine over the loudness series
//! - **Event aggregator**: classifier probabilities → timestamped snore events
//! - **Result assembler**: relative event times → absolute timestamps
//! - **Pipeline**: the `SnoreAnalyzer` that wires them together
//!
//! ## Error Taxonomy:
//! Every failure of the core is an [`AnalysisError`]. Chunk-level feature
//! failures are recovered inside the pipeline (the chunk is skipped); all
//! other kinds abort the analysis and are handed to the caller.

pub mod apnea;       // Silence-run apnea detection
pub mod events;      // Probability thresholding and event aggregation
pub mod features;    // Mel spectrogram feature extraction
pub mod loudness;    // RMS loudness measurement
pub mod pipeline;    // Pipeline orchestration
pub mod result;      // Final result assembly

pub use apnea::ApneaPolicy;
pub use pipeline::{AnalysisSettings, SnoreAnalyzer};
pub use result::AnalysisResult;

use std::fmt;

/// Failure kinds of the analysis core.
///
/// ## Propagation Policy:
/// - **FeatureExtraction**: recovered per chunk, never reaches the caller
///   from [`SnoreAnalyzer::analyze`]
/// - **Format / ClipTooShort / ModelUnavailable / InvalidConfig**: fatal,
///   no partial result is produced
/// - **Persistence**: raised by the storage collaborator after the result
///   already exists; it never invalidates that result
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// The uploaded bytes could not be decoded into PCM samples
    Format(String),

    /// The clip is shorter than one classification chunk
    ClipTooShort {
        duration_seconds: f64,
        chunk_seconds: f64,
    },

    /// One chunk produced an empty or non-finite feature tensor
    FeatureExtraction { chunk_index: usize, reason: String },

    /// The classifier is not loaded, failed, or broke its output contract
    ModelUnavailable(String),

    /// Storing the finished analysis failed
    Persistence(String),

    /// Analysis parameters violate their constraints
    InvalidConfig(String),
}

impl AnalysisError {
    /// Short machine-readable name, used in logs and API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::Format(_) => "format_error",
            AnalysisError::ClipTooShort { .. } => "clip_too_short",
            AnalysisError::FeatureExtraction { .. } => "feature_extraction_error",
            AnalysisError::ModelUnavailable(_) => "model_unavailable",
            AnalysisError::Persistence(_) => "persistence_error",
            AnalysisError::InvalidConfig(_) => "invalid_config",
        }
    }
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisError::Format(msg) => write!(f, "Audio format error: {}", msg),
            AnalysisError::ClipTooShort {
                duration_seconds,
                chunk_seconds,
            } => write!(
                f,
                "Audio is too short for analysis: {:.2}s (one chunk needs {:.2}s)",
                duration_seconds, chunk_seconds
            ),
            AnalysisError::FeatureExtraction { chunk_index, reason } => {
                write!(f, "Feature extraction failed for chunk {}: {}", chunk_index, reason)
            }
            AnalysisError::ModelUnavailable(msg) => write!(f, "Classifier unavailable: {}", msg),
            AnalysisError::Persistence(msg) => write!(f, "Failed to store analysis: {}", msg),
            AnalysisError::InvalidConfig(msg) => write!(f, "Invalid analysis settings: {}", msg),
        }
    }
}

impl std::error::Error for AnalysisError {}
