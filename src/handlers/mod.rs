pub mod analysis;
pub mod config;
pub mod models;
pub mod recordings;
pub mod uploads;

pub use analysis::*;
pub use config::*;
pub use models::*;
pub use recordings::*;
pub use uploads::*;

use crate::error::AppError;
use actix_web::error::JsonPayloadError;
use actix_web::web;

/// JSON extractor settings shared by every route.
///
/// The limit leaves room for the non-audio fields on top of
/// `max_audio_bytes`; extractor failures render as the usual error body.
pub fn json_config(max_audio_bytes: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(max_audio_bytes + 64 * 1024)
        .error_handler(|err, _req| {
            let app_error = match err {
                JsonPayloadError::Overflow { limit } => {
                    AppError::PayloadTooLarge(format!("request body exceeds {} bytes", limit))
                }
                JsonPayloadError::OverflowKnownLength { length, limit } => AppError::PayloadTooLarge(
                    format!("request body is {} bytes (max: {} bytes)", length, limit),
                ),
                other => AppError::BadRequest(other.to_string()),
            };
            app_error.into()
        })
}

#[cfg(test)]
pub mod testing {
    use crate::config::AppConfig;
    use crate::state::AppState;
    use crate::storage::RecordingStore;
    use base64::Engine;
    use std::path::Path;
    use std::sync::Arc;

    /// Base64 of `seconds` of silent 16 kHz mono s16le PCM.
    pub fn silent_pcm_base64(seconds: usize) -> String {
        base64::engine::general_purpose::STANDARD.encode(vec![0u8; seconds * 16_000 * 2])
    }

    /// Default config that keeps audio under `dir`.
    pub fn uploads_config(dir: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.uploads_dir = dir.display().to_string();
        config
    }

    pub fn state_with_store(config: AppConfig, store: Arc<dyn RecordingStore>) -> AppState {
        AppState::with_store(config, store).unwrap()
    }
}
