//! # Feature Extraction
//!
//! Turns one classification chunk into the fixed-shape log-mel spectrogram
//! the classifier was trained on.
//!
//! ## Processing Steps:
//! 1. **STFT**: centered frames (`n_fft/2` zeros on both sides), periodic
//!    Hann window, `hop_length` stride, power spectrum `|X|^2`
//! 2. **Mel projection**: Slaney mel scale with Slaney area normalization,
//!    `fmin = 0`, `fmax = sample_rate / 2`
//! 3. **Log scale**: `10*log10(S)` referenced to the chunk's own peak power,
//!    floored at `amin` and clipped to `top_db` below the peak
//! 4. **Frame normalization**: zero-pad at the end, or keep only the first
//!    `max_frames` frames
//!
//! The output shape is `(n_mels, max_frames, 1)` for every chunk.
//!
//! ## Defaults:
//! `n_fft = 2048`, `hop_length = 512`, `n_mels = 128`, `max_frames = 128`.
//! A 4 s chunk at 16 kHz yields 126 frames, padded to 128.

use crate::analysis::AnalysisError;
use rustfft::{num_complex::Complex32, Fft, FftPlanner};
use std::f64::consts::PI;
use std::sync::Arc;

/// Smallest power accepted before taking the logarithm.
pub const AMIN: f64 = 1e-10;

/// Dynamic range kept below the peak, in dB.
pub const TOP_DB: f64 = 80.0;

/// Spectrogram parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureConfig {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub max_frames: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            max_frames: 128,
        }
    }
}

/// Fixed-shape log-mel spectrogram of one chunk.
///
/// ## Layout:
/// Row-major `(n_mels, max_frames)` with an implicit trailing channel axis
/// of size 1. Element `(mel, frame)` lives at `mel * max_frames + frame`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTensor {
    data: Vec<f32>,
    n_mels: usize,
    n_frames: usize,
}

impl FeatureTensor {
    /// `(n_mels, max_frames, 1)`
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.n_mels, self.n_frames, 1)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    pub fn get(&self, mel: usize, frame: usize) -> Option<f32> {
        if mel >= self.n_mels || frame >= self.n_frames {
            return None;
        }
        self.data.get(mel * self.n_frames + frame).copied()
    }
}

/// Reusable extractor holding the window, mel filters and FFT plan.
///
/// ## Thread Safety:
/// Everything inside is read-only after construction, so one extractor can
/// be shared by concurrent analyses behind an `Arc`.
pub struct FeatureExtractor {
    config: FeatureConfig,
    window: Vec<f32>,
    /// `n_mels` rows of `n_fft/2 + 1` weights
    mel_filters: Vec<Vec<f64>>,
    fft: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for FeatureExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureExtractor")
            .field("config", &self.config)
            .finish()
    }
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Result<Self, AnalysisError> {
        if config.sample_rate == 0 {
            return Err(AnalysisError::InvalidConfig("sample_rate must be > 0".to_string()));
        }
        if config.n_fft < 2 {
            return Err(AnalysisError::InvalidConfig("n_fft must be >= 2".to_string()));
        }
        if config.hop_length == 0 || config.n_mels == 0 || config.max_frames == 0 {
            return Err(AnalysisError::InvalidConfig(
                "hop_length, n_mels and max_frames must be > 0".to_string(),
            ));
        }

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(config.n_fft);

        Ok(Self {
            window: hann_window(config.n_fft),
            mel_filters: mel_filter_bank(config.sample_rate, config.n_fft, config.n_mels),
            fft,
            config,
        })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Extract the feature tensor of one chunk.
    ///
    /// `chunk_index` is only used to label a failure.
    pub fn extract(&self, chunk_index: usize, samples: &[f32]) -> Result<FeatureTensor, AnalysisError> {
        let fail = |reason: &str| AnalysisError::FeatureExtraction {
            chunk_index,
            reason: reason.to_string(),
        };

        if samples.is_empty() {
            return Err(fail("chunk is empty"));
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(fail("chunk contains non-finite samples"));
        }

        let power = self.power_spectrogram(samples);
        let mel = self.mel_project(&power);
        let db = power_to_db(&mel);
        let n_frames = power.len();

        let max_frames = self.config.max_frames;
        let n_mels = self.config.n_mels;
        let kept = n_frames.min(max_frames);
        let mut data = vec![0.0f32; n_mels * max_frames];
        for m in 0..n_mels {
            let src = &db[m * n_frames..m * n_frames + kept];
            let dst = &mut data[m * max_frames..m * max_frames + kept];
            for (d, &s) in dst.iter_mut().zip(src) {
                *d = s as f32;
            }
        }

        if data.iter().any(|v| !v.is_finite()) {
            return Err(fail("spectrogram contains non-finite values"));
        }

        Ok(FeatureTensor {
            data,
            n_mels,
            n_frames: max_frames,
        })
    }

    /// Power spectrum per frame: `n_frames` rows of `n_fft/2 + 1` bins.
    fn power_spectrogram(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let pad = n_fft / 2;

        let mut padded = vec![0.0f32; samples.len() + 2 * pad];
        padded[pad..pad + samples.len()].copy_from_slice(samples);

        let n_frames = 1 + (padded.len() - n_fft) / hop;
        let n_bins = n_fft / 2 + 1;
        let mut scratch = vec![Complex32::default(); n_fft];
        let mut frames = Vec::with_capacity(n_frames);

        for t in 0..n_frames {
            let start = t * hop;
            for (i, slot) in scratch.iter_mut().enumerate() {
                *slot = Complex32::new(padded[start + i] * self.window[i], 0.0);
            }
            self.fft.process(&mut scratch);
            frames.push(scratch[..n_bins].iter().map(|c| c.norm_sqr()).collect());
        }

        frames
    }

    /// Apply the mel filters; output is row-major `(n_mels, n_frames)`.
    fn mel_project(&self, power: &[Vec<f32>]) -> Vec<f64> {
        let n_frames = power.len();
        let mut mel = vec![0.0f64; self.config.n_mels * n_frames];
        for (m, filter) in self.mel_filters.iter().enumerate() {
            for (t, frame) in power.iter().enumerate() {
                mel[m * n_frames + t] = filter
                    .iter()
                    .zip(frame)
                    .map(|(&w, &p)| w * p as f64)
                    .sum();
            }
        }
        mel
    }
}

/// One-shot extraction with default FFT/hop sizes.
pub fn extract(
    samples: &[f32],
    sample_rate: u32,
    n_mels: usize,
    max_frames: usize,
) -> Result<FeatureTensor, AnalysisError> {
    let extractor = FeatureExtractor::new(FeatureConfig {
        sample_rate,
        n_mels,
        max_frames,
        ..FeatureConfig::default()
    })?;
    extractor.extract(0, samples)
}

/// `10*log10(S / max(S))` with the `amin` floor and `top_db` clipping.
fn power_to_db(power: &[f64]) -> Vec<f64> {
    let reference = power.iter().copied().fold(0.0f64, f64::max);
    let ref_db = 10.0 * reference.max(AMIN).log10();

    let mut db: Vec<f64> = power
        .iter()
        .map(|&p| 10.0 * p.max(AMIN).log10() - ref_db)
        .collect();

    let peak = db.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let floor = peak - TOP_DB;
    for v in &mut db {
        *v = v.max(floor);
    }
    db
}

/// Periodic Hann window of length `n`.
fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| (0.5 - 0.5 * (2.0 * PI * i as f64 / n as f64).cos()) as f32)
        .collect()
}

const MEL_F_SP: f64 = 200.0 / 3.0;
const MEL_MIN_LOG_HZ: f64 = 1000.0;
const MEL_MIN_LOG_MEL: f64 = MEL_MIN_LOG_HZ / MEL_F_SP;

fn mel_logstep() -> f64 {
    6.4f64.ln() / 27.0
}

/// Slaney mel scale: linear below 1 kHz, logarithmic above.
fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MEL_MIN_LOG_HZ {
        MEL_MIN_LOG_MEL + (hz / MEL_MIN_LOG_HZ).ln() / mel_logstep()
    } else {
        hz / MEL_F_SP
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MEL_MIN_LOG_MEL {
        MEL_MIN_LOG_HZ * (mel_logstep() * (mel - MEL_MIN_LOG_MEL)).exp()
    } else {
        mel * MEL_F_SP
    }
}

/// Triangular mel filters with Slaney area normalization.
fn mel_filter_bank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Vec<Vec<f64>> {
    let n_bins = n_fft / 2 + 1;
    let fft_freqs: Vec<f64> = (0..n_bins)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect();

    let mel_min = hz_to_mel(0.0);
    let mel_max = hz_to_mel(sample_rate as f64 / 2.0);
    let mel_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (lower, center, upper) = (mel_points[m], mel_points[m + 1], mel_points[m + 2]);
            let enorm = 2.0 / (upper - lower);
            fft_freqs
                .iter()
                .map(|&f| {
                    let rising = (f - lower) / (center - lower);
                    let falling = (upper - f) / (upper - center);
                    rising.min(falling).max(0.0) * enorm
                })
                .collect()
        })
        .collect()
}
