//! # Configuration Management
//!
//! Loads and manages application configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: the same structs are read from TOML/env and written as JSON
//!   by the `/config` endpoint
//! - **Result<T, E>**: every loading and validation step can fail
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_ANALYSIS__CHUNK_SECONDS`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys use a double underscore so that field names containing `_`
//! (like `chunk_seconds`) survive the mapping.

use crate::analysis::{AnalysisSettings, ApneaPolicy, SnoreAnalyzer};
use crate::audio::decoder::DEFAULT_MAX_CLIP_SECONDS;
use crate::device::DevicePreference;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration.
///
/// ## Why separate config structs:
/// Each section maps to one concern (HTTP server, model, pipeline tuning,
/// resource limits) and can be updated independently at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub analysis: AnalysisConfig,
    pub performance: PerformanceConfig,
    pub storage: StorageConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Snore classifier configuration.
///
/// ## Fields:
/// - `classifier_path`: safetensors file with the CNN weights
/// - `device`: "auto", "cpu", "cuda" or "metal"
/// - `load_on_startup`: load the model before the server starts accepting
///   requests; a missing file is logged and the service starts unloaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub classifier_path: String,
    pub device: String,
    pub load_on_startup: bool,
}

/// Analysis pipeline tuning.
///
/// Mirrors [`AnalysisSettings`]; the apnea policy is kept as a string here
/// so it can be set from an environment variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub sample_rate: u32,
    pub chunk_seconds: f64,
    pub window_seconds: f64,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub max_frames: usize,
    pub snore_threshold: f32,
    pub silence_threshold: f64,
    pub min_silence_windows: usize,
    pub apnea_policy: String,
    pub inference_batch_size: usize,
}

/// Resource limits.
///
/// ## Fields:
/// - `max_concurrent_analyses`: analyses running at once; extra requests
///   are rejected with 503 instead of queueing
/// - `max_audio_bytes`: largest accepted request body; read once when the
///   server starts, so it cannot be changed through `PUT /config`
/// - `max_clip_seconds`: longest decoded recording
/// - `serialize_inference`: allow only one classifier call at a time
///   (applies to the next model load)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_analyses: usize,
    pub max_audio_bytes: usize,
    pub max_clip_seconds: u64,
    pub serialize_inference: bool,
}

/// Where analyzed recordings are kept as WAV files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub uploads_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        let settings = AnalysisSettings::default();
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            models: ModelsConfig {
                classifier_path: "models/snore_cnn.safetensors".to_string(),
                device: "auto".to_string(),
                load_on_startup: true,
            },
            analysis: AnalysisConfig {
                sample_rate: settings.sample_rate,
                chunk_seconds: settings.chunk_seconds,
                window_seconds: settings.window_seconds,
                n_fft: settings.n_fft,
                hop_length: settings.hop_length,
                n_mels: settings.n_mels,
                max_frames: settings.max_frames,
                snore_threshold: settings.snore_threshold,
                silence_threshold: settings.silence_threshold,
                min_silence_windows: settings.min_silence_windows,
                apnea_policy: settings.apnea_policy.to_string(),
                inference_batch_size: settings.inference_batch_size,
            },
            performance: PerformanceConfig {
                max_concurrent_analyses: 4,
                max_audio_bytes: 64 * 1024 * 1024, // about an hour of 16 kHz PCM as base64
                max_clip_seconds: DEFAULT_MAX_CLIP_SECONDS,
                serialize_inference: false,
            },
            storage: StorageConfig {
                uploads_dir: "uploads".to_string(),
            },
        }
    }
}

impl AnalysisConfig {
    /// Convert to pipeline settings.
    pub fn to_settings(&self) -> Result<AnalysisSettings> {
        let apnea_policy: ApneaPolicy = self.apnea_policy.parse().map_err(|e: String| anyhow!(e))?;
        Ok(AnalysisSettings {
            sample_rate: self.sample_rate,
            chunk_seconds: self.chunk_seconds,
            window_seconds: self.window_seconds,
            n_fft: self.n_fft,
            hop_length: self.hop_length,
            n_mels: self.n_mels,
            max_frames: self.max_frames,
            snore_threshold: self.snore_threshold,
            silence_threshold: self.silence_threshold,
            min_silence_windows: self.min_silence_windows,
            apnea_policy,
            inference_batch_size: self.inference_batch_size,
        })
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_MODELS__DEVICE=cpu`: Force CPU inference
    /// - `APP_ANALYSIS__APNEA_POLICY=once_per_run`: Change apnea counting
    /// - `HOST=0.0.0.0` / `PORT=3000`: Deployment platform conventions
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Device name is known
    /// - The analysis section builds a working pipeline (positive sizes,
    ///   thresholds in range, known apnea policy)
    /// - Resource limits are positive
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }

        self.models
            .device
            .parse::<DevicePreference>()
            .map_err(|e| anyhow!(e))?;

        self.analyzer()?;

        if self.performance.max_concurrent_analyses == 0 {
            return Err(anyhow!("Max concurrent analyses must be greater than 0"));
        }

        if self.performance.max_audio_bytes == 0 {
            return Err(anyhow!("Max audio bytes must be greater than 0"));
        }

        if self.performance.max_clip_seconds == 0 {
            return Err(anyhow!("Max clip seconds must be greater than 0"));
        }

        if self.storage.uploads_dir.trim().is_empty() {
            return Err(anyhow!("Uploads directory cannot be empty"));
        }

        Ok(())
    }

    /// Build the analyzer described by the `analysis` section.
    pub fn analyzer(&self) -> Result<SnoreAnalyzer> {
        let settings = self.analysis.to_settings()?;
        SnoreAnalyzer::new(settings).map_err(|e| anyhow!("Invalid analysis settings: {}", e))
    }

    /// Apply a partial JSON update, then validate.
    ///
    /// Only keys that already exist can be set, so a typo is reported
    /// instead of silently ignored. `performance.max_audio_bytes` sizes the
    /// request extractor at startup and is refused here. On error `self` is
    /// left unchanged.
    ///
    /// ## Example:
    /// `{"analysis": {"min_silence_windows": 8}}` changes only that field.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let patch: serde_json::Value = serde_json::from_str(json_str)?;
        let mut current = serde_json::to_value(&*self)?;
        merge_json(&mut current, &patch, "")?;

        let updated: AppConfig = serde_json::from_value(current)?;
        if updated.performance.max_audio_bytes != self.performance.max_audio_bytes {
            return Err(anyhow!(
                "performance.max_audio_bytes only changes on restart (config.toml or APP_PERFORMANCE__MAX_AUDIO_BYTES)"
            ));
        }
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

/// Recursively overwrite `target` with the values in `patch`.
fn merge_json(target: &mut serde_json::Value, patch: &serde_json::Value, path: &str) -> Result<()> {
    let patch_map = match patch.as_object() {
        Some(map) => map,
        None => return Err(anyhow!("Expected a JSON object at '{}'", display_path(path))),
    };
    let target_map = match target.as_object_mut() {
        Some(map) => map,
        None => return Err(anyhow!("'{}' is not a section", display_path(path))),
    };

    for (key, value) in patch_map {
        let key_path = if path.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", path, key)
        };
        let slot = target_map
            .get_mut(key)
            .ok_or_else(|| anyhow!("Unknown configuration key '{}'", key_path))?;

        if slot.is_object() {
            merge_json(slot, value, &key_path)?;
        } else {
            *slot = value.clone();
        }
    }
    Ok(())
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<root>"
    } else {
        path
    }
}
