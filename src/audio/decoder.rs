//! # Audio Decoding
//!
//! Turns the bytes a client uploads into an [`AudioClip`] at the analysis
//! rate (16 kHz mono f32).
//!
//! ## Supported Inputs:
//! - **WAV** (`RIFF/WAVE` magic): 8/16/24-bit PCM and 32-bit float, read
//!   with the `wav` crate
//! - **Raw PCM** (`format = "pcm_s16le"`): headerless little-endian 16-bit
//!   samples at a declared rate
//! - **Everything else**: probed with symphonia (mp3, aac/m4a, flac, ogg)
//!
//! ## Normalization:
//! 1. Interleaved channels are averaged to mono
//! 2. Any other sample rate is resampled to the target rate (see
//!    [`resample`](crate::audio::resample))
//!
//! ## Limits:
//! - Source rates outside [`MIN_SAMPLE_RATE`]..=[`MAX_SAMPLE_RATE`] are refused
//! - The decoded clip may not exceed `max_clip_seconds`; the check runs
//!   before resampling allocates the output
//!
//! Every failure is an [`AnalysisError::Format`].

use crate::analysis::AnalysisError;
use crate::audio::clip::{AudioClip, TARGET_SAMPLE_RATE};
use crate::audio::resample::{output_len, resample};
use base64::Engine;
use byteorder::{LittleEndian, ReadBytesExt};
use serde::Deserialize;
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// What the client told us about the payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DecodeHint {
    /// Container or codec name ("wav", "mp3", "pcm_s16le", ...)
    pub format: Option<String>,
    /// Required for raw PCM, ignored for self-describing containers
    pub sample_rate: Option<u32>,
    /// Raw PCM only; defaults to mono
    pub channels: Option<u16>,
}

impl DecodeHint {
    pub fn with_format(format: &str) -> Self {
        Self {
            format: Some(format.to_string()),
            ..Self::default()
        }
    }

    fn is_raw_pcm(&self) -> bool {
        matches!(
            self.format.as_deref().map(str::to_lowercase).as_deref(),
            Some("pcm_s16le") | Some("pcm") | Some("raw")
        )
    }
}

/// Lowest source sample rate accepted.
pub const MIN_SAMPLE_RATE: u32 = 4_000;
/// Highest source sample rate accepted.
pub const MAX_SAMPLE_RATE: u32 = 384_000;
/// Default ceiling on decoded clip length (one night).
pub const DEFAULT_MAX_CLIP_SECONDS: u64 = 12 * 60 * 60;

/// Byte-level audio decoder.
#[derive(Debug, Clone, Copy)]
pub struct AudioDecoder {
    target_sample_rate: u32,
    max_clip_seconds: u64,
}

impl Default for AudioDecoder {
    fn default() -> Self {
        Self::new(TARGET_SAMPLE_RATE)
    }
}

impl AudioDecoder {
    pub fn new(target_sample_rate: u32) -> Self {
        Self {
            target_sample_rate,
            max_clip_seconds: DEFAULT_MAX_CLIP_SECONDS,
        }
    }

    pub fn with_max_clip_seconds(mut self, max_clip_seconds: u64) -> Self {
        self.max_clip_seconds = max_clip_seconds;
        self
    }

    /// Decode a base64 payload, with or without a `data:...;base64,` prefix.
    pub fn decode_base64(&self, text: &str, hint: &DecodeHint) -> Result<AudioClip, AnalysisError> {
        let payload = strip_data_url(text.trim());
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| AnalysisError::Format(format!("audio_data is not valid base64: {}", e)))?;
        self.decode(&bytes, hint)
    }

    /// Decode raw bytes into a mono clip at the target rate.
    pub fn decode(&self, bytes: &[u8], hint: &DecodeHint) -> Result<AudioClip, AnalysisError> {
        if bytes.is_empty() {
            return Err(AnalysisError::Format("audio payload is empty".to_string()));
        }

        let (samples, sample_rate, channels) = if hint.is_raw_pcm() {
            decode_pcm_s16le(bytes, hint)?
        } else if is_wav(bytes) {
            decode_wav(bytes)?
        } else {
            decode_with_symphonia(bytes, hint, self.max_clip_seconds)?
        };

        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
            return Err(AnalysisError::Format(format!(
                "unsupported sample rate {} Hz (expected {}..={} Hz)",
                sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
            )));
        }
        let mono = downmix(&samples, channels);
        if mono.is_empty() {
            return Err(AnalysisError::Format("audio contains no samples".to_string()));
        }

        let out_len = output_len(mono.len(), sample_rate, self.target_sample_rate);
        let max_samples = self.max_clip_seconds.saturating_mul(self.target_sample_rate as u64);
        if out_len as u64 > max_samples {
            return Err(AnalysisError::Format(format!(
                "audio is {:.0}s long (max: {}s)",
                mono.len() as f64 / sample_rate as f64,
                self.max_clip_seconds
            )));
        }

        let samples = resample(&mono, sample_rate, self.target_sample_rate)?;
        tracing::debug!(
            "Decoded {} samples @ {}Hz x{} into {} samples @ {}Hz",
            mono.len(),
            sample_rate,
            channels,
            samples.len(),
            self.target_sample_rate
        );
        Ok(AudioClip::new(samples, self.target_sample_rate))
    }
}

fn strip_data_url(text: &str) -> &str {
    if text.starts_with("data:") {
        if let Some(pos) = text.find(";base64,") {
            return &text[pos + ";base64,".len()..];
        }
    }
    text
}

fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Convert 16-bit PCM samples to f32 in [-1.0, 1.0).
pub fn pcm_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&sample| sample as f32 / 32768.0).collect()
}

fn decode_pcm_s16le(bytes: &[u8], hint: &DecodeHint) -> Result<(Vec<f32>, u32, usize), AnalysisError> {
    let sample_rate = hint.sample_rate.ok_or_else(|| {
        AnalysisError::Format("raw PCM requires a declared sample_rate".to_string())
    })?;
    if bytes.len() % 2 != 0 {
        return Err(AnalysisError::Format(
            "PCM data length must be even for 16-bit samples".to_string(),
        ));
    }

    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }
    let channels = hint.channels.unwrap_or(1).max(1) as usize;
    Ok((pcm_to_float(&samples), sample_rate, channels))
}

fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32, usize), AnalysisError> {
    let mut cursor = Cursor::new(bytes);
    let (header, data) = wav::read(&mut cursor)
        .map_err(|e| AnalysisError::Format(format!("invalid WAV file: {}", e)))?;

    let samples = match data {
        wav::BitDepth::Eight(raw) => raw.iter().map(|&s| (s as f32 - 128.0) / 128.0).collect(),
        wav::BitDepth::Sixteen(raw) => pcm_to_float(&raw),
        wav::BitDepth::TwentyFour(raw) => raw.iter().map(|&s| s as f32 / 8_388_608.0).collect(),
        wav::BitDepth::ThirtyTwoFloat(raw) => raw,
        wav::BitDepth::Empty => {
            return Err(AnalysisError::Format("WAV file has no audio data".to_string()))
        }
    };
    Ok((samples, header.sampling_rate, header.channel_count.max(1) as usize))
}

fn decode_with_symphonia(
    bytes: &[u8],
    hint: &DecodeHint,
    max_clip_seconds: u64,
) -> Result<(Vec<f32>, u32, usize), AnalysisError> {
    let mss = MediaSourceStream::new(
        Box::new(Cursor::new(bytes.to_vec())),
        MediaSourceStreamOptions::default(),
    );

    let mut probe_hint = Hint::new();
    if let Some(format) = hint.format.as_deref() {
        probe_hint.with_extension(format);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &probe_hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AnalysisError::Format(format!("unrecognized audio container: {}", e)))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| AnalysisError::Format("no audio track found".to_string()))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map_or(0, symphonia::core::audio::Channels::count);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AnalysisError::Format(format!("unsupported codec: {}", e)))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut max_frames = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                tracing::warn!("Audio decode packet error: {}", e);
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::warn!("Skipping undecodable audio frame: {}", e);
                continue;
            }
            Err(e) => {
                return Err(AnalysisError::Format(format!("audio decoding failed: {}", e)));
            }
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count();

        let num_frames = decoded.capacity();
        if sample_buf.is_none() || num_frames > max_frames {
            sample_buf = Some(SampleBuffer::<f32>::new(num_frames as u64, spec));
            max_frames = num_frames;
        }
        if let Some(buf) = sample_buf.as_mut() {
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());
        }

        // Compressed input can expand far beyond its byte size.
        let limit = max_clip_seconds
            .saturating_mul(sample_rate as u64)
            .saturating_mul(channels as u64);
        if samples.len() as u64 > limit {
            return Err(AnalysisError::Format(format!(
                "audio is longer than {}s",
                max_clip_seconds
            )));
        }
    }

    Ok((samples, sample_rate, channels.max(1)))
}

/// Average interleaved channels into one.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
