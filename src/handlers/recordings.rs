//! # Recording History Endpoints
//!
//! - `GET /recordings/{user_uid}` - stored recordings, newest first
//! - `GET /recording-stats/{user_uid}` - aggregate over all of them

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::sync::Arc;

fn require_user(user_uid: &str) -> AppResult<String> {
    let user_uid = user_uid.trim();
    if user_uid.is_empty() {
        return Err(AppError::ValidationError("user_uid is required".to_string()));
    }
    Ok(user_uid.to_string())
}

/// List a user's recordings.
///
/// ## Endpoint: `GET /api/v1/recordings/{user_uid}`
///
/// ## Response:
/// ```json
/// {
///   "user_uid": "user-123",
///   "count": 1,
///   "recordings": [
///     { "id": "...", "name": "Tuesday night", "snoring_count": 12, ... }
///   ]
/// }
/// ```
pub async fn list_recordings(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let user_uid = require_user(&path.into_inner())?;
    let store = Arc::clone(&state.store);
    let lookup = user_uid.clone();
    let recordings = web::block(move || store.list_for_user(&lookup))
        .await
        .map_err(|e| AppError::Internal(format!("Storage task failed: {}", e)))??;

    Ok(HttpResponse::Ok().json(json!({
        "user_uid": user_uid,
        "count": recordings.len(),
        "recordings": recordings
    })))
}

/// Sleep statistics for a user.
///
/// ## Endpoint: `GET /api/v1/recording-stats/{user_uid}`
///
/// ## Response:
/// ```json
/// {
///   "total_days": 3,
///   "avg_duration": 412.5,
///   "avg_apnea_count": 1.33,
///   "max_snore_db": 61.2
/// }
/// ```
pub async fn recording_stats(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let user_uid = require_user(&path.into_inner())?;
    let store = Arc::clone(&state.store);
    let stats = web::block(move || store.stats_for_user(&user_uid))
        .await
        .map_err(|e| AppError::Internal(format!("Storage task failed: {}", e)))??;

    Ok(HttpResponse::Ok().json(stats))
}
