//! # Windower
//!
//! Splits a clip into the two partitions the pipeline needs:
//!
//! - **Classification chunks**: `chunk_seconds` long, fed to the feature
//!   extractor and the classifier
//! - **Loudness windows**: `window_seconds` long (1 s by default), fed to the
//!   loudness meter and the apnea detector
//!
//! Both partitions are computed independently from the same buffer, are
//! gapless and non-overlapping, and drop the trailing partial piece. Nothing
//! is padded.

use crate::analysis::AnalysisError;
use crate::audio::clip::AudioClip;

/// One classification chunk borrowed from a clip.
///
/// ## Rust Concepts:
/// - **Lifetime `'a`**: the chunk cannot outlive the clip it slices, so no
///   sample is ever copied just to be windowed
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    /// Position of the chunk in the clip (0-based)
    pub index: usize,
    /// Offset of the first sample, `index * chunk_samples / sample_rate`
    pub start_seconds: f64,
    /// `chunk_seconds * sample_rate` samples, rounded to a whole sample
    pub samples: &'a [f32],
    sample_rate: u32,
}

impl<'a> Chunk<'a> {
    /// Length of the chunk as actually sliced.
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Owned timing information, kept once the samples are no longer needed.
    pub fn span(&self) -> ChunkSpan {
        ChunkSpan {
            index: self.index,
            start_seconds: self.start_seconds,
            duration_seconds: self.duration_seconds(),
        }
    }
}

/// Time span of a chunk without its samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkSpan {
    pub index: usize,
    pub start_seconds: f64,
    pub duration_seconds: f64,
}

impl ChunkSpan {
    pub fn end_seconds(&self) -> f64 {
        self.start_seconds + self.duration_seconds
    }
}

/// Number of samples covering `seconds` at `sample_rate`.
fn samples_per(seconds: f64, sample_rate: u32, what: &str) -> Result<usize, AnalysisError> {
    if !(seconds.is_finite() && seconds > 0.0) {
        return Err(AnalysisError::InvalidConfig(format!(
            "{} must be a positive number of seconds, got {}",
            what, seconds
        )));
    }
    let count = (seconds * sample_rate as f64).round() as usize;
    if count == 0 {
        return Err(AnalysisError::InvalidConfig(format!(
            "{} of {}s covers no samples at {} Hz",
            what, seconds, sample_rate
        )));
    }
    Ok(count)
}

/// Partition a clip into full classification chunks.
///
/// The chunk count is `floor(len / chunk_samples)`; the remainder is dropped.
pub fn chunks(clip: &AudioClip, chunk_seconds: f64) -> Result<Vec<Chunk<'_>>, AnalysisError> {
    let sample_rate = clip.sample_rate();
    let chunk_samples = samples_per(chunk_seconds, sample_rate, "chunk duration")?;

    Ok(clip
        .samples()
        .chunks_exact(chunk_samples)
        .enumerate()
        .map(|(index, samples)| Chunk {
            index,
            start_seconds: (index * chunk_samples) as f64 / sample_rate as f64,
            samples,
            sample_rate,
        })
        .collect())
}

/// Partition a clip into full loudness windows.
///
/// Returned in chronological order; the i-th slice is window `i`.
pub fn windows(clip: &AudioClip, window_seconds: f64) -> Result<Vec<&[f32]>, AnalysisError> {
    let window_samples = samples_per(window_seconds, clip.sample_rate(), "window duration")?;
    Ok(clip.samples().chunks_exact(window_samples).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> AudioClip {
        AudioClip::new((0..len).map(|i| i as f32).collect(), 10)
    }

    #[test]
    fn test_chunks_drop_partial_tail() {
        // 10 Hz, 4 s chunks => 40 samples per chunk; 95 samples => 2 chunks
        let clip = ramp(95);
        let chunks = chunks(&clip, 4.0).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].start_seconds, 0.0);
        assert_eq!(chunks[1].start_seconds, 4.0);
        assert_eq!(chunks[1].index, 1);
        assert!(chunks.iter().all(|c| c.samples.len() == 40));
    }

    #[test]
    fn test_chunks_are_gapless() {
        let clip = ramp(80);
        let chunks = chunks(&clip, 4.0).unwrap();

        assert_eq!(chunks[0].samples.last(), Some(&39.0));
        assert_eq!(chunks[1].samples.first(), Some(&40.0));
    }

    #[test]
    fn test_windows_are_independent_of_chunks() {
        // 95 samples at 10 Hz => 9 full one-second windows, 2 full chunks
        let clip = ramp(95);
        let windows = windows(&clip, 1.0).unwrap();

        assert_eq!(windows.len(), 9);
        assert_eq!(windows[8][0], 80.0);
    }

    #[test]
    fn test_short_clip_has_no_chunks() {
        let clip = ramp(39);
        assert!(chunks(&clip, 4.0).unwrap().is_empty());
    }

    #[test]
    fn test_non_positive_durations_are_rejected() {
        let clip = ramp(100);
        assert!(matches!(chunks(&clip, 0.0), Err(AnalysisError::InvalidConfig(_))));
        assert!(matches!(windows(&clip, -1.0), Err(AnalysisError::InvalidConfig(_))));
        assert!(matches!(chunks(&clip, f64::NAN), Err(AnalysisError::InvalidConfig(_))));
    }

    #[test]
    fn test_span_end() {
        let clip = ramp(80);
        let chunks = chunks(&clip, 4.0).unwrap();
        let span = chunks[1].span();
        assert_eq!(span.end_seconds(), 8.0);
    }

    #[test]
    fn test_start_follows_whole_samples() {
        // 0.25 s at 10 Hz rounds to 3 samples, so chunks are 0.3 s apart
        let clip = ramp(10);
        let chunks = chunks(&clip, 0.25).unwrap();

        assert_eq!(chunks.len(), 3);
        assert!((chunks[2].start_seconds - 0.6).abs() < 1e-12);
        assert!((chunks[2].duration_seconds() - 0.3).abs() < 1e-12);
        assert_eq!(chunks[2].samples[0], 6.0);
        assert!((chunks[1].span().end_seconds() - chunks[2].start_seconds).abs() < 1e-12);
    }
}
