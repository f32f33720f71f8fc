//! # Result Assembly
//!
//! Anchors the relative snore times to the moment the analysis started and
//! packs everything into the immutable summary handed to storage and to the
//! HTTP client.

use crate::analysis::apnea::ApneaEvent;
use crate::analysis::events::SnoreEvent;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Final summary of one analyzed clip.
///
/// ## Invariants:
/// - `snoring_absolute_timestamps.len() == snoring_count`
/// - timestamps never decrease
/// - `loudest_snore_db >= 0.0`
///
/// Timestamps serialize as ISO-8601 / RFC 3339 strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub snoring_count: usize,
    pub loudest_snore_db: f64,
    pub apnea_events_count: usize,
    pub snoring_absolute_timestamps: Vec<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub duration_millis: u64,
    /// Moment relative times are measured from
    pub analysis_started_at: DateTime<Utc>,
    /// Per-event detail behind the timestamps
    pub snore_events: Vec<SnoreEvent>,
    /// Windows on which each apnea run reached the threshold
    pub apnea_events: Vec<ApneaEvent>,
    /// Chunks that reached the classifier
    pub analyzed_chunks: usize,
    /// Chunks dropped because feature extraction failed
    pub skipped_chunks: usize,
}

/// Everything the assembler needs besides the start time.
#[derive(Debug, Clone, Default)]
pub struct AssemblyInput {
    pub events: Vec<SnoreEvent>,
    pub loudest_db: f64,
    pub apnea_events: Vec<ApneaEvent>,
    pub duration_seconds: f64,
    pub analyzed_chunks: usize,
    pub skipped_chunks: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAssembler;

impl ResultAssembler {
    pub fn new() -> Self {
        Self
    }

    /// `absolute_i = analysis_start + relative_seconds_i`
    pub fn assemble(&self, analysis_start: DateTime<Utc>, input: AssemblyInput) -> AnalysisResult {
        let snoring_absolute_timestamps = input
            .events
            .iter()
            .map(|event| analysis_start + seconds_to_duration(event.relative_seconds))
            .collect();

        AnalysisResult {
            snoring_count: input.events.len(),
            loudest_snore_db: input.loudest_db.max(0.0),
            apnea_events_count: input.apnea_events.len(),
            snoring_absolute_timestamps,
            duration_seconds: input.duration_seconds,
            duration_millis: (input.duration_seconds * 1000.0).round() as u64,
            analysis_started_at: analysis_start,
            snore_events: input.events,
            apnea_events: input.apnea_events,
            analyzed_chunks: input.analyzed_chunks,
            skipped_chunks: input.skipped_chunks,
        }
    }
}

/// Millisecond-resolution offset.
fn seconds_to_duration(seconds: f64) -> Duration {
    Duration::milliseconds((seconds * 1000.0).round() as i64)
}
