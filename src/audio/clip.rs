//! # Audio Clip
//!
//! The decoded, mono, fixed-rate waveform that one analysis call works on.
//! A clip is created once by the decoder and only ever borrowed afterwards:
//! the windower hands out slices of it, nothing mutates it.

/// Target sample rate every clip is resampled to before analysis.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// A decoded mono waveform.
///
/// ## Rust Concepts:
/// - **Private fields + accessors**: once built, the samples cannot be changed,
///   which keeps two analysis runs over the same clip bit-identical
/// - **&[f32]**: callers borrow the buffer instead of copying it
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioClip {
    /// Wrap already-decoded samples.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Clip duration in seconds (`len / sample_rate`).
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Clip duration in whole milliseconds, as stored with a recording.
    pub fn duration_millis(&self) -> u64 {
        (self.duration_seconds() * 1000.0).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_is_derived_from_length() {
        let clip = AudioClip::new(vec![0.0; 24_000], TARGET_SAMPLE_RATE);
        assert_eq!(clip.duration_seconds(), 1.5);
        assert_eq!(clip.duration_millis(), 1500);
        assert_eq!(clip.len(), 24_000);
    }

    #[test]
    fn test_zero_rate_has_no_duration() {
        let clip = AudioClip::new(vec![0.1; 10], 0);
        assert_eq!(clip.duration_seconds(), 0.0);
    }
}
