//! # Audio Module
//!
//! Everything that happens to audio before analysis: decoding uploaded
//! bytes, holding the decoded samples, and slicing them into chunks and
//! windows.
//!
//! ## Key Components:
//! - **AudioDecoder**: WAV / raw PCM / compressed formats → mono 16 kHz clip
//! - **AudioClip**: immutable decoded samples with their rate
//! - **resample**: rubato-backed conversion to the analysis rate
//! - **Windower**: non-overlapping chunk and window views into a clip
//!
//! ## Audio Format After Decoding:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Channels**: Mono (1 channel)
//! - **Samples**: f32 in [-1.0, 1.0]

pub mod clip;       // Decoded sample container
pub mod decoder;    // Byte-level decoding
pub mod resample;   // Band-limited sample rate conversion
pub mod windower;   // Chunk and window slicing

pub use clip::AudioClip;
pub use decoder::{AudioDecoder, DecodeHint};
