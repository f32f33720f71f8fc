//! # Resampling
//!
//! Band-limited sample rate conversion for decoded mono audio, backed by
//! rubato's FFT resampler. Content above the output Nyquist frequency is
//! filtered out instead of folding back into the analysis band.

use crate::analysis::AnalysisError;
use rubato::{FftFixedInOut, Resampler as RubatoResampler};

/// Preferred input chunk; rubato rounds it to a multiple the rate ratio allows.
const CHUNK_FRAMES: usize = 1024;

/// Number of output samples for `len` input samples, `round(len * to / from)`.
pub fn output_len(len: usize, from_rate: u32, to_rate: u32) -> usize {
    let (from, to) = (from_rate as u128, to_rate as u128);
    ((len as u128 * to + from / 2) / from) as usize
}

/// Convert mono `samples` from `from_rate` to `to_rate`.
///
/// The filter delay is removed, so output sample `i` lines up with input
/// time `i / to_rate`, and the result is exactly [`output_len`] long. Equal
/// rates return the input unchanged.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, AnalysisError> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if from_rate == 0 || to_rate == 0 {
        return Err(AnalysisError::Format(format!(
            "cannot resample from {} Hz to {} Hz",
            from_rate, to_rate
        )));
    }

    let mut resampler =
        FftFixedInOut::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_FRAMES, 1)
            .map_err(|e| AnalysisError::Format(format!("unsupported resampling ratio: {}", e)))?;

    let expected = output_len(samples.len(), from_rate, to_rate);
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected + delay + resampler.output_frames_max());
    let mut input = vec![Vec::with_capacity(resampler.input_frames_max())];
    let mut position = 0usize;

    // Past the end of the clip the input is zero-padded to flush the filter.
    while output.len() < expected + delay {
        let needed = resampler.input_frames_next();
        let end = (position + needed).min(samples.len());
        let channel = &mut input[0];
        channel.clear();
        if position < end {
            channel.extend_from_slice(&samples[position..end]);
        }
        channel.resize(needed, 0.0);
        position += needed;

        let processed = resampler
            .process(&input, None)
            .map_err(|e| AnalysisError::Format(format!("resampling failed: {}", e)))?;
        output.extend_from_slice(&processed[0]);
    }

    output.drain(..delay);
    output.truncate(expected);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, rate: u32, seconds: f32, amplitude: f32) -> Vec<f32> {
        let len = (rate as f32 * seconds) as usize;
        (0..len)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_output_len() {
        assert_eq!(output_len(44_100, 44_100, 16_000), 16_000);
        assert_eq!(output_len(4, 8_000, 16_000), 8);
        assert_eq!(output_len(3, 48_000, 16_000), 1);
    }

    #[test]
    fn test_equal_rates_are_untouched() {
        assert_eq!(resample(&[1.0, 2.0], 16_000, 16_000).unwrap(), vec![1.0, 2.0]);
        assert!(resample(&[], 44_100, 16_000).unwrap().is_empty());
    }

    #[test]
    fn test_lengths_match_the_rate_ratio() {
        assert_eq!(resample(&[0.0; 48_000], 48_000, 16_000).unwrap().len(), 16_000);
        assert_eq!(resample(&[0.0; 8_000], 8_000, 16_000).unwrap().len(), 16_000);
        assert_eq!(resample(&[0.0; 22_050], 22_050, 16_000).unwrap().len(), 16_000);
    }

    #[test]
    fn test_in_band_tone_keeps_its_level() {
        let input = tone(1_000.0, 44_100, 1.0, 0.5);
        let output = resample(&input, 44_100, 16_000).unwrap();

        // 0.5 amplitude sine => rms 0.354
        let level = rms(&output[2_000..14_000]);
        assert!((level - 0.5 / 2f32.sqrt()).abs() < 0.02, "rms {}", level);
    }

    #[test]
    fn test_tone_above_nyquist_is_removed() {
        // 12 kHz cannot be represented at 16 kHz; a linear interpolator
        // folds it back to 4 kHz at roughly half its level
        let input = tone(12_000.0, 44_100, 1.0, 0.5);
        let output = resample(&input, 44_100, 16_000).unwrap();

        let level = rms(&output[2_000..14_000]);
        assert!(level < 0.05, "rms {}", level);
    }

    #[test]
    fn test_delay_is_compensated() {
        // Silence then a step at 0.5 s; the edge must stay near 0.5 s
        let mut input = vec![0.0f32; 24_000];
        input.extend(std::iter::repeat(0.5).take(24_000));
        let output = resample(&input, 48_000, 16_000).unwrap();

        assert!(output[7_900].abs() < 0.05);
        assert!((output[8_100] - 0.5).abs() < 0.05);
    }
}
