//! # Event Aggregation
//!
//! Pairs every analyzed chunk with its classifier probability and keeps the
//! chunks above the snore threshold as discrete, timestamped events. Each
//! event also records the loudest one-second window overlapping its chunk.

use crate::analysis::loudness::LoudnessWindow;
use crate::audio::windower::ChunkSpan;
use serde::Serialize;

/// Default decision threshold; a chunk snores when `p > 0.5`.
pub const DEFAULT_SNORE_THRESHOLD: f32 = 0.5;

/// One detected snore.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SnoreEvent {
    /// Chunk the event came from
    pub chunk_index: usize,
    /// Seconds from the start of the clip (the chunk start)
    pub relative_seconds: f64,
    /// Classifier output that triggered the event
    pub probability: f32,
    /// Loudest score among the windows overlapping the chunk
    pub loudness_db: Option<f64>,
}

/// Threshold-based probability → event converter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventAggregator {
    threshold: f32,
    window_seconds: f64,
}

impl Default for EventAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_SNORE_THRESHOLD, 1.0)
    }
}

impl EventAggregator {
    pub fn new(threshold: f32, window_seconds: f64) -> Self {
        Self {
            threshold,
            window_seconds,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Build the event list.
    ///
    /// `chunks[i]` is paired with `probabilities[i]`; the caller guarantees
    /// both have the same length (extra entries on either side are ignored).
    /// Events come out in chunk order, so their times never decrease.
    pub fn aggregate(
        &self,
        chunks: &[ChunkSpan],
        probabilities: &[f32],
        loudness: &[LoudnessWindow],
    ) -> Vec<SnoreEvent> {
        debug_assert_eq!(chunks.len(), probabilities.len());

        chunks
            .iter()
            .zip(probabilities)
            .filter(|(_, &p)| p > self.threshold)
            .map(|(chunk, &probability)| SnoreEvent {
                chunk_index: chunk.index,
                relative_seconds: chunk.start_seconds,
                probability,
                loudness_db: self.loudest_overlapping(chunk, loudness),
            })
            .collect()
    }

    /// Max score of the windows intersecting `[start, end)` of a chunk.
    fn loudest_overlapping(&self, chunk: &ChunkSpan, loudness: &[LoudnessWindow]) -> Option<f64> {
        if loudness.is_empty() || !(self.window_seconds > 0.0) {
            return None;
        }
        let first = (chunk.start_seconds / self.window_seconds).floor() as usize;
        let last = (chunk.end_seconds() / self.window_seconds).ceil() as usize;
        let last = last.min(loudness.len());
        if first >= last {
            return None;
        }

        loudness[first..last]
            .iter()
            .map(|w| w.score_db)
            .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))))
    }
}
