//! # Runtime Configuration Endpoints
//!
//! - `GET /config` - the active configuration
//! - `PUT /config` - partial JSON update, validated before it is applied
//!
//! `server` changes are stored but only take effect after a restart.
//! `performance.max_audio_bytes` sizes the JSON extractor when the server
//! starts, so an update that changes it is rejected with 400.

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": state.get_config()
    })))
}

/// Apply a partial configuration update.
///
/// ## Request Body:
/// ```json
/// { "analysis": { "min_silence_windows": 8 }, "performance": { "max_concurrent_analyses": 2 } }
/// ```
///
/// Unknown keys, wrong types and out-of-range values are rejected with 400
/// and leave the running configuration untouched.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> AppResult<HttpResponse> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut updated = state.get_config();
    updated
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(updated.clone())
        .map_err(AppError::ValidationError)?;
    tracing::info!("Configuration updated at runtime");

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": updated
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_get_and_update_config() {
        let state = AppState::new(AppConfig::default()).unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/config", web::get().to(get_config))
                .route("/config", web::put().to(update_config)),
        )
        .await;

        let req = test::TestRequest::get().uri("/config").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["config"]["analysis"]["chunk_seconds"], 4.0);

        let req = test::TestRequest::put()
            .uri("/config")
            .set_json(json!({"analysis": {"snore_threshold": 0.7}}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "success");
        assert!((state.analyzer().settings().snore_threshold - 0.7).abs() < 1e-6);
    }

    #[actix_web::test]
    async fn test_invalid_update_is_rejected() {
        let state = AppState::new(AppConfig::default()).unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/config", web::put().to(update_config)),
        )
        .await;

        let req = test::TestRequest::put()
            .uri("/config")
            .set_json(json!({"analysis": {"window_seconds": -1.0}}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.get_config(), AppConfig::default());

        let req = test::TestRequest::put()
            .uri("/config")
            .set_json(json!({"performance": {"max_audio_bytes": 256 * 1024 * 1024}}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["error"]["message"].as_str().unwrap().contains("restart"));
        assert_eq!(state.get_config(), AppConfig::default());
    }
}
