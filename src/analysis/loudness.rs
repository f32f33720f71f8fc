//! # Loudness Meter
//!
//! Measures each one-second window of a clip and keeps the running maximum
//! score. The score is `100 + 20*log10(rms + 1e-6)`: full-scale noise lands
//! near 100, digital silence at -20.
//!
//! The running maximum starts at `0.0`, not `-inf`, so a clip that never
//! rises above the floor reports `0.0` as its loudest level.

use serde::Serialize;

/// Added to the RMS before taking the logarithm so silence stays finite.
pub const RMS_EPSILON: f64 = 1e-6;

/// Offset that moves the dBFS value into a positive display range.
pub const SCORE_OFFSET_DB: f64 = 100.0;

/// Loudness of one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoudnessWindow {
    /// Position of the window in the clip (0-based, one per `window_seconds`)
    pub index: usize,
    /// Root-mean-square amplitude, always >= 0
    pub rms: f64,
    /// `100 + 20*log10(rms + 1e-6)`
    pub score_db: f64,
}

/// Stateless RMS → score converter.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoudnessMeter;

impl LoudnessMeter {
    pub fn new() -> Self {
        Self
    }

    /// Measure one window of samples.
    ///
    /// An empty slice measures as silence.
    pub fn measure(&self, index: usize, samples: &[f32]) -> LoudnessWindow {
        let rms = rms(samples);
        LoudnessWindow {
            index,
            rms,
            score_db: score_db(rms),
        }
    }

    /// Measure every window in order.
    pub fn measure_all<'a, I>(&self, windows: I) -> Vec<LoudnessWindow>
    where
        I: IntoIterator<Item = &'a [f32]>,
    {
        windows
            .into_iter()
            .enumerate()
            .map(|(index, samples)| self.measure(index, samples))
            .collect()
    }
}

/// `sqrt(mean(samples^2))`, accumulated in f64.
pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// Decibel-like score of an RMS value.
pub fn score_db(rms: f64) -> f64 {
    SCORE_OFFSET_DB + 20.0 * (rms + RMS_EPSILON).log10()
}

/// Reducer tracking the loudest score seen so far.
///
/// ## Rust Concepts:
/// - **Copy state + pure step**: `fold` over a window series gives the clip
///   maximum without any shared counter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudestTracker {
    loudest_db: f64,
}

impl Default for LoudestTracker {
    fn default() -> Self {
        Self { loudest_db: 0.0 }
    }
}

impl LoudestTracker {
    pub fn step(self, window: &LoudnessWindow) -> Self {
        // f64::max ignores a NaN operand, so the tracker never becomes NaN
        Self {
            loudest_db: self.loudest_db.max(window.score_db),
        }
    }

    pub fn loudest_db(&self) -> f64 {
        self.loudest_db
    }

    /// Loudest score over a whole series, floored at 0.0.
    pub fn over<'a, I>(windows: I) -> f64
    where
        I: IntoIterator<Item = &'a LoudnessWindow>,
    {
        windows
            .into_iter()
            .fold(Self::default(), Self::step)
            .loudest_db()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_of_constant_signal() {
        let samples = vec![0.5f32; 100];
        assert!((rms(&samples) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_silence_is_finite() {
        let window = LoudnessMeter::new().measure(0, &[0.0; 16_000]);
        assert_eq!(window.rms, 0.0);
        assert!(window.score_db.is_finite());
        // 100 + 20*log10(1e-6) = -20
        assert!((window.score_db + 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_full_scale_scores_near_hundred() {
        let window = LoudnessMeter::new().measure(3, &[1.0, -1.0, 1.0, -1.0]);
        assert_eq!(window.index, 3);
        assert!((window.score_db - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_empty_window_measures_as_silence() {
        let window = LoudnessMeter::new().measure(0, &[]);
        assert_eq!(window.rms, 0.0);
    }

    #[test]
    fn test_loudest_never_negative() {
        let meter = LoudnessMeter::new();
        let quiet = vec![1e-4f32; 10];
        let windows = meter.measure_all(vec![&quiet[..], &quiet[..]]);
        // 100 + 20*log10(1e-4) = 20 > 0, silence stays at the 0.0 floor
        assert!(LoudestTracker::over(&windows) > 0.0);

        let silent = meter.measure_all(vec![&[0.0f32; 10][..]]);
        assert_eq!(LoudestTracker::over(&silent), 0.0);
        assert_eq!(LoudestTracker::over(&Vec::<LoudnessWindow>::new()), 0.0);
    }

    #[test]
    fn test_loudest_picks_maximum() {
        let meter = LoudnessMeter::new();
        let a = vec![0.01f32; 10];
        let b = vec![0.1f32; 10];
        let windows = meter.measure_all(vec![&a[..], &b[..], &a[..]]);
        assert_eq!(LoudestTracker::over(&windows), windows[1].score_db);
    }
}
