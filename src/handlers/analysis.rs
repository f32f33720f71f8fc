//! # Audio Analysis Endpoint
//!
//! `POST /api/v1/analyze-audio` takes a base64 recording, runs the snore
//! pipeline on it and stores the summary for the user.
//!
//! ## Request Flow:
//! 1. Validate the body (user, payload size)
//! 2. Take an analysis slot; at capacity the request is rejected with 503
//! 3. Snapshot the loaded classifier and the current analyzer
//! 4. Decode and analyze on the blocking pool (`web::block`)
//! 5. Keep the decoded audio as `{id}.wav` in `storage.uploads_dir`
//! 6. Persist the summary and return it with the new record id
//!
//! A storage failure still returns the analysis, under a 500 status, so a
//! client never loses a result it waited for. Failing to keep the audio
//! file only drops `file_url`.

use crate::analysis::{AnalysisError, AnalysisResult};
use crate::audio::{AudioDecoder, DecodeHint};
use crate::error::{analysis_status, error_body, AppError, AppResult};
use crate::state::AppState;
use crate::storage::uploads::file_url;
use crate::storage::{AudioArchive, NewRecording};
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

const DEFAULT_RECORDING_NAME: &str = "Unnamed Recording";

/// Request body for `POST /analyze-audio`.
#[derive(Debug, Deserialize)]
pub struct AnalyzeAudioRequest {
    /// Base64 audio, optionally as a `data:` URL
    pub audio_data: String,
    pub name: Option<String>,
    #[serde(default)]
    pub user_uid: String,
    /// Client-measured duration; replaces the decoded one in storage
    pub duration_millis: Option<u64>,
    /// Container or codec hint ("wav", "mp3", "pcm_s16le", ...)
    pub format: Option<String>,
    /// Required when `format` is raw PCM
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    /// When the recording began; defaults to the time of the request
    pub started_at: Option<DateTime<Utc>>,
}

/// Successful analysis response: the summary plus the stored record.
#[derive(Debug, Serialize)]
pub struct AnalyzeAudioResponse {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub message: String,
    pub file_url: Option<String>,
    #[serde(flatten)]
    pub analysis: AnalysisResult,
}

/// Analyze one uploaded recording.
///
/// ## Endpoint: `POST /api/v1/analyze-audio`
///
/// ## Request Body:
/// ```json
/// {
///   "audio_data": "UklGRiQA...",
///   "user_uid": "user-123",
///   "name": "Tuesday night",
///   "format": "wav",
///   "started_at": "2025-01-01T23:00:00Z"
/// }
/// ```
///
/// ## Status Codes:
/// - **200**: analysis stored
/// - **400**: invalid body, undecodable audio, clip shorter than one chunk
/// - **413**: `audio_data` above `performance.max_audio_bytes`
/// - **503**: no classifier loaded, or every analysis slot is busy
/// - **500**: the analysis succeeded but could not be stored
pub async fn analyze_audio(
    state: web::Data<AppState>,
    body: web::Json<AnalyzeAudioRequest>,
) -> AppResult<HttpResponse> {
    let request = body.into_inner();
    let config = state.get_config();

    let user_uid = request.user_uid.trim().to_string();
    if user_uid.is_empty() {
        return Err(AppError::ValidationError("user_uid is required".to_string()));
    }
    if request.audio_data.is_empty() {
        return Err(AppError::ValidationError("audio_data is required".to_string()));
    }
    if request.audio_data.len() > config.performance.max_audio_bytes {
        return Err(AppError::PayloadTooLarge(format!(
            "audio_data is {} bytes (max: {} bytes)",
            request.audio_data.len(),
            config.performance.max_audio_bytes
        )));
    }

    let _permit = match state.try_acquire_analysis_slot() {
        Some(permit) => permit,
        None => {
            state.record_rejected_analysis();
            warn!("Rejecting analysis for {}: all analysis slots busy", user_uid);
            return Err(AppError::ServiceUnavailable(format!(
                "Server is busy ({} analyses running), retry later",
                config.performance.max_concurrent_analyses
            )));
        }
    };

    let classifier = state.engine.classifier().await?;

    let analyzer = state.analyzer();
    let decoder = AudioDecoder::new(analyzer.settings().sample_rate)
        .with_max_clip_seconds(config.performance.max_clip_seconds);
    let hint = DecodeHint {
        format: request.format,
        sample_rate: request.sample_rate,
        channels: request.channels,
    };
    let started_at = request.started_at.unwrap_or_else(Utc::now);
    let audio_data = request.audio_data;

    let active = state.begin_analysis();
    let timer = Instant::now();
    let outcome = web::block(move || {
        let clip = decoder.decode_base64(&audio_data, &hint)?;
        let result = analyzer.analyze(&clip, classifier.as_ref(), started_at)?;
        Ok::<_, AnalysisError>((clip, result))
    })
    .await;
    drop(active);

    let (clip, result) = match outcome {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => {
            if matches!(err, AnalysisError::ModelUnavailable(_)) {
                state.engine.record_failure().await;
            }
            warn!("Analysis for {} failed: {}", user_uid, err);
            return Err(err.into());
        }
        Err(e) => {
            state.engine.record_failure().await;
            return Err(AppError::Internal(format!("Analysis task failed: {}", e)));
        }
    };
    let processing_ms = timer.elapsed().as_millis() as u64;
    state.engine.record_analysis(&result, processing_ms).await;

    let name = request
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_RECORDING_NAME.to_string());
    let mut recording = NewRecording::from_result(&user_uid, &name, request.duration_millis, &result);

    let archive = AudioArchive::new(&config.storage.uploads_dir);
    let store = Arc::clone(&state.store);
    let saved = web::block(move || {
        let kept = match archive.write_clip(recording.id, &clip) {
            Ok(file_name) => Some(file_name),
            Err(e) => {
                warn!("Audio for recording {} not kept: {}", recording.id, e);
                None
            }
        };
        recording.file_url = kept.as_deref().map(file_url);

        let saved = store.save(recording);
        if let (Err(_), Some(file_name)) = (&saved, &kept) {
            archive.remove(file_name);
        }
        saved
    })
    .await
        .map_err(|e| AnalysisError::Persistence(format!("storage task failed: {}", e)))
        .and_then(|saved| saved);

    match saved {
        Ok(record) => {
            info!(
                "Stored recording {} for {}: {} snores, {} apnea events, analyzed in {}ms",
                record.id, user_uid, result.snoring_count, result.apnea_events_count, processing_ms
            );
            Ok(HttpResponse::Ok().json(AnalyzeAudioResponse {
                id: record.id,
                name: record.name,
                created_at: record.created_at,
                message: "Analysis complete and data saved".to_string(),
                file_url: record.file_url,
                analysis: result,
            }))
        }
        Err(err) => {
            error!("Analysis for {} could not be stored: {}", user_uid, err);
            let body = error_body(err.kind(), &err.to_string());
            Ok(HttpResponse::build(analysis_status(&err)).json(json!({
                "error": body["error"],
                "analysis": result,
            })))
        }
    }
}
