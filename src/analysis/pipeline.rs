//! # Analysis Pipeline
//!
//! `SnoreAnalyzer` runs one decoded clip through every stage of the core and
//! returns the final [`AnalysisResult`]. It owns no per-request state, so a
//! single analyzer is built at startup and shared by all requests.
//!
//! ## Stages:
//! 1. Split the clip into fixed-length chunks (partial tail dropped)
//! 2. Extract one feature tensor per chunk; failed chunks are skipped
//! 3. Classify the tensors in bounded batches
//! 4. Measure loudness over one-second windows
//! 5. Fold the windows into the loudest score and the apnea events
//! 6. Turn probabilities into snore events and anchor them in time
//!
//! ## Key Rust Concepts:
//! - **&dyn SnoreClassifier**: the model is injected per call, the analyzer
//!   never knows which implementation it talks to
//! - **Borrowed chunks**: chunk and window slices point into the clip, only
//!   the feature tensors of the current batch are allocated

use crate::analysis::apnea::{ApneaDetector, ApneaPolicy};
use crate::analysis::events::{EventAggregator, DEFAULT_SNORE_THRESHOLD};
use crate::analysis::features::{FeatureConfig, FeatureExtractor};
use crate::analysis::loudness::{LoudestTracker, LoudnessMeter};
use crate::analysis::result::{AnalysisResult, AssemblyInput, ResultAssembler};
use crate::analysis::AnalysisError;
use crate::audio::clip::TARGET_SAMPLE_RATE;
use crate::audio::windower::{self, ChunkSpan};
use crate::audio::AudioClip;
use crate::classifier::{validate_probabilities, SnoreClassifier};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

/// Tunable parameters of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisSettings {
    /// Rate the clip must already be at
    pub sample_rate: u32,
    /// Classification chunk length
    pub chunk_seconds: f64,
    /// Loudness window length
    pub window_seconds: f64,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub max_frames: usize,
    /// A chunk snores when its probability is strictly above this
    pub snore_threshold: f32,
    /// RMS level below which a window counts as silent
    pub silence_threshold: f64,
    /// Silent windows in a row that make one apnea event
    pub min_silence_windows: usize,
    pub apnea_policy: ApneaPolicy,
    /// Feature tensors handed to the classifier per call
    pub inference_batch_size: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        let features = FeatureConfig::default();
        Self {
            sample_rate: TARGET_SAMPLE_RATE,
            chunk_seconds: 4.0,
            window_seconds: 1.0,
            n_fft: features.n_fft,
            hop_length: features.hop_length,
            n_mels: features.n_mels,
            max_frames: features.max_frames,
            snore_threshold: DEFAULT_SNORE_THRESHOLD,
            silence_threshold: 0.01,
            min_silence_windows: 5,
            apnea_policy: ApneaPolicy::default(),
            inference_batch_size: 32,
        }
    }
}

impl AnalysisSettings {
    pub fn feature_config(&self) -> FeatureConfig {
        FeatureConfig {
            sample_rate: self.sample_rate,
            n_fft: self.n_fft,
            hop_length: self.hop_length,
            n_mels: self.n_mels,
            max_frames: self.max_frames,
        }
    }

    /// Check the settings that no individual stage validates itself.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.sample_rate == 0 {
            return Err(AnalysisError::InvalidConfig("sample_rate must be positive".to_string()));
        }
        if !(self.chunk_seconds.is_finite() && self.chunk_seconds > 0.0) {
            return Err(AnalysisError::InvalidConfig(format!(
                "chunk_seconds must be positive, got {}",
                self.chunk_seconds
            )));
        }
        if !(self.window_seconds.is_finite() && self.window_seconds > 0.0) {
            return Err(AnalysisError::InvalidConfig(format!(
                "window_seconds must be positive, got {}",
                self.window_seconds
            )));
        }
        if !(0.0..=1.0).contains(&self.snore_threshold) {
            return Err(AnalysisError::InvalidConfig(format!(
                "snore_threshold must be within [0, 1], got {}",
                self.snore_threshold
            )));
        }
        if self.inference_batch_size == 0 {
            return Err(AnalysisError::InvalidConfig(
                "inference_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// The full snore/apnea pipeline.
#[derive(Debug)]
pub struct SnoreAnalyzer {
    settings: AnalysisSettings,
    extractor: FeatureExtractor,
    meter: LoudnessMeter,
    apnea: ApneaDetector,
    aggregator: EventAggregator,
    assembler: ResultAssembler,
}

impl SnoreAnalyzer {
    /// Build every stage from the settings; fails with `InvalidConfig`.
    pub fn new(settings: AnalysisSettings) -> Result<Self, AnalysisError> {
        settings.validate()?;
        let extractor = FeatureExtractor::new(settings.feature_config())?;
        let apnea = ApneaDetector::new(
            settings.silence_threshold,
            settings.min_silence_windows,
            settings.apnea_policy,
        )?;
        let aggregator = EventAggregator::new(settings.snore_threshold, settings.window_seconds);

        Ok(Self {
            settings,
            extractor,
            meter: LoudnessMeter::new(),
            apnea,
            aggregator,
            assembler: ResultAssembler::new(),
        })
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    /// Analyze one clip.
    ///
    /// ## Parameters:
    /// - **clip**: mono samples at `settings.sample_rate`
    /// - **classifier**: the model to score chunks with
    /// - **started_at**: instant that relative event times are added to
    ///
    /// ## Errors:
    /// - `ClipTooShort` when not even one full chunk fits
    /// - `Format` when the clip is at a different sample rate
    /// - `ModelUnavailable` when the classifier fails or returns bad output
    ///
    /// A chunk whose features cannot be computed is logged and skipped; if
    /// every chunk is skipped the result simply has no snore events.
    pub fn analyze(
        &self,
        clip: &AudioClip,
        classifier: &dyn SnoreClassifier,
        started_at: DateTime<Utc>,
    ) -> Result<AnalysisResult, AnalysisError> {
        let timer = Instant::now();

        if clip.sample_rate() != self.settings.sample_rate {
            return Err(AnalysisError::Format(format!(
                "clip is at {} Hz, analysis expects {} Hz",
                clip.sample_rate(),
                self.settings.sample_rate
            )));
        }

        let chunks = windower::chunks(clip, self.settings.chunk_seconds)?;
        if chunks.is_empty() {
            return Err(AnalysisError::ClipTooShort {
                duration_seconds: clip.duration_seconds(),
                chunk_seconds: self.settings.chunk_seconds,
            });
        }

        let mut spans: Vec<ChunkSpan> = Vec::with_capacity(chunks.len());
        let mut probabilities: Vec<f32> = Vec::with_capacity(chunks.len());
        let mut skipped_chunks = 0usize;

        for batch in chunks.chunks(self.settings.inference_batch_size) {
            let mut batch_spans = Vec::with_capacity(batch.len());
            let mut tensors = Vec::with_capacity(batch.len());

            for chunk in batch {
                match self.extractor.extract(chunk.index, chunk.samples) {
                    Ok(tensor) => {
                        batch_spans.push(chunk.span());
                        tensors.push(tensor);
                    }
                    Err(e) => {
                        tracing::warn!("Skipping chunk {}: {}", chunk.index, e);
                        skipped_chunks += 1;
                    }
                }
            }

            if tensors.is_empty() {
                continue;
            }

            let batch_probabilities = classifier.predict(&tensors)?;
            validate_probabilities(tensors.len(), &batch_probabilities)?;
            tracing::debug!(
                "Classified chunks {}..={} ({} tensors)",
                batch[0].index,
                batch[batch.len() - 1].index,
                tensors.len()
            );

            spans.extend(batch_spans);
            probabilities.extend(batch_probabilities);
        }

        let loudness = self
            .meter
            .measure_all(windower::windows(clip, self.settings.window_seconds)?);
        let loudest_db = LoudestTracker::over(&loudness);
        let apnea_events = self.apnea.detect(&loudness);
        let events = self.aggregator.aggregate(&spans, &probabilities, &loudness);

        let result = self.assembler.assemble(
            started_at,
            AssemblyInput {
                events,
                loudest_db,
                apnea_events,
                duration_seconds: clip.duration_seconds(),
                analyzed_chunks: spans.len(),
                skipped_chunks,
            },
        );

        tracing::info!(
            "Analyzed {:.1}s clip in {:.2}s: {} snores, {} apnea events, {} chunks skipped",
            result.duration_seconds,
            timer.elapsed().as_secs_f64(),
            result.snoring_count,
            result.apnea_events_count,
            result.skipped_chunks
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::testing::{
        BrokenClassifier, ConstantClassifier, ScriptedClassifier, ShortClassifier,
    };
    use chrono::TimeZone;

    fn silent(seconds: usize) -> AudioClip {
        AudioClip::new(vec![0.0; seconds * 16_000], 16_000)
    }

    /// Sine tone loud enough to never count as silence.
    fn tone(seconds: usize) -> AudioClip {
        let samples = (0..seconds * 16_000)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 16_000.0).sin())
            .collect();
        AudioClip::new(samples, 16_000)
    }

    fn analyzer() -> SnoreAnalyzer {
        SnoreAnalyzer::new(AnalysisSettings::default()).unwrap()
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 23, 0, 0).unwrap()
    }

    #[test]
    fn test_silent_clip_counts_two_apneas() {
        let result = analyzer()
            .analyze(&silent(12), &ConstantClassifier(0.1), start())
            .unwrap();

        assert_eq!(result.apnea_events_count, 2);
        assert_eq!(result.snoring_count, 0);
        assert!(result.snoring_absolute_timestamps.is_empty());
        assert_eq!(result.loudest_snore_db, 0.0);
        assert_eq!(result.analyzed_chunks, 3);
        assert_eq!(result.duration_millis, 12_000);
    }

    #[test]
    fn test_short_clip_is_rejected() {
        let err = analyzer()
            .analyze(&silent(3), &ConstantClassifier(0.9), start())
            .unwrap_err();
        assert!(matches!(err, AnalysisError::ClipTooShort { .. }));
    }

    #[test]
    fn test_snore_count_follows_probabilities() {
        let classifier = ScriptedClassifier::new(vec![0.9, 0.2, 0.7, 0.5]);
        let result = analyzer().analyze(&tone(16), &classifier, start()).unwrap();

        assert_eq!(result.snoring_count, 2);
        assert_eq!(result.snoring_absolute_timestamps, vec![
            start(),
            start() + chrono::Duration::seconds(8),
        ]);
        assert!(result.loudest_snore_db > 0.0);
        assert_eq!(result.apnea_events_count, 0);
    }

    #[test]
    fn test_batches_preserve_chunk_order() {
        let settings = AnalysisSettings {
            inference_batch_size: 2,
            ..AnalysisSettings::default()
        };
        let classifier = ScriptedClassifier::new(vec![0.1, 0.1, 0.1, 0.1, 0.95]);
        let result = SnoreAnalyzer::new(settings)
            .unwrap()
            .analyze(&tone(20), &classifier, start())
            .unwrap();

        assert_eq!(result.snoring_count, 1);
        assert_eq!(result.snore_events[0].chunk_index, 4);
        assert_eq!(result.snore_events[0].relative_seconds, 16.0);
    }

    #[test]
    fn test_analysis_is_idempotent() {
        let analyzer = analyzer();
        let clip = tone(8);
        let first = analyzer.analyze(&clip, &ConstantClassifier(0.8), start()).unwrap();
        let second = analyzer.analyze(&clip, &ConstantClassifier(0.8), start()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unreadable_chunk_is_skipped() {
        let mut samples = vec![0.1f32; 12 * 16_000];
        samples[5 * 16_000] = f32::NAN; // inside chunk 1
        let clip = AudioClip::new(samples, 16_000);

        let result = analyzer()
            .analyze(&clip, &ConstantClassifier(0.9), start())
            .unwrap();

        assert_eq!(result.skipped_chunks, 1);
        assert_eq!(result.analyzed_chunks, 2);
        let chunks: Vec<usize> = result.snore_events.iter().map(|e| e.chunk_index).collect();
        assert_eq!(chunks, vec![0, 2]);
    }

    #[test]
    fn test_classifier_failure_is_fatal() {
        let err = analyzer()
            .analyze(&tone(8), &BrokenClassifier, start())
            .unwrap_err();
        assert_eq!(err.kind(), "model_unavailable");

        let err = analyzer()
            .analyze(&tone(8), &ShortClassifier, start())
            .unwrap_err();
        assert_eq!(err.kind(), "model_unavailable");
    }

    #[test]
    fn test_wrong_sample_rate_is_a_format_error() {
        let clip = AudioClip::new(vec![0.0; 8 * 8_000], 8_000);
        let err = analyzer().analyze(&clip, &ConstantClassifier(0.1), start()).unwrap_err();
        assert_eq!(err.kind(), "format_error");
    }

    #[test]
    fn test_invalid_settings() {
        let bad = AnalysisSettings {
            inference_batch_size: 0,
            ..AnalysisSettings::default()
        };
        assert!(SnoreAnalyzer::new(bad).is_err());

        let bad = AnalysisSettings {
            snore_threshold: 1.5,
            ..AnalysisSettings::default()
        };
        assert!(SnoreAnalyzer::new(bad).is_err());
    }
}
