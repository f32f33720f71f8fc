//! # Model Management REST API Handlers
//!
//! Loading, unloading and inspecting the snore classifier at runtime.
//!
//! ## Available Endpoints:
//! - `GET /models/classifier` - current model and device status
//! - `POST /models/classifier/load` - load a safetensors model
//! - `POST /models/classifier/unload` - unload the current model

use crate::device::DeviceManager;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;

/// Request body for loading a model. Both fields fall back to the
/// `models` config section.
#[derive(Debug, Default, Deserialize)]
pub struct LoadModelRequest {
    pub model_path: Option<String>,
    /// "auto", "cpu", "cuda" or "metal"
    pub device: Option<String>,
}

/// Current classifier status.
///
/// ## Endpoint: `GET /api/v1/models/classifier`
///
/// ## Response:
/// ```json
/// {
///   "loaded": true,
///   "model": {
///     "description": "cnn conv16-32-64 + linear head (models/snore_cnn.safetensors, CPU)",
///     "source": "models/snore_cnn.safetensors",
///     "loaded_at": "2025-01-01T12:00:00Z",
///     "load_time_ms": 42,
///     "serialized": false
///   },
///   "configured_path": "models/snore_cnn.safetensors",
///   "configured_device": "auto",
///   "devices": { "cuda_available": false, "metal_available": false, ... }
/// }
/// ```
pub async fn get_classifier_status(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = state.get_config();
    let model = state.engine.get_current_model_info().await;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "loaded": model.is_some(),
        "model": model,
        "configured_path": config.models.classifier_path,
        "configured_device": config.models.device,
        "devices": DeviceManager::get_device_summary(),
        "performance": state.engine.get_performance_stats().await
    })))
}

/// Load a classifier from disk, replacing the current one on success.
///
/// ## Endpoint: `POST /api/v1/models/classifier/load`
///
/// ## Request Body:
/// ```json
/// { "model_path": "models/snore_cnn.safetensors", "device": "cpu" }
/// ```
///
/// An empty body loads the configured model. A failed load keeps the
/// previous model active.
pub async fn load_classifier(
    state: web::Data<AppState>,
    body: Option<web::Json<LoadModelRequest>>,
) -> AppResult<HttpResponse> {
    let request = body.map(|b| b.into_inner()).unwrap_or_default();
    let config = state.get_config();

    let path = PathBuf::from(request.model_path.unwrap_or(config.models.classifier_path));
    let device_name = request.device.unwrap_or(config.models.device);
    let device = DeviceManager::resolve(&device_name)
        .map_err(|e| AppError::ValidationError(format!("Invalid device: {}", e)))?;

    let info = state
        .engine
        .load_model(&path, device)
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to load model: {}", e)))?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Snore classifier loaded successfully",
        "model": info,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// Unload the current classifier. Analyses already running keep their
/// snapshot and finish normally.
///
/// ## Endpoint: `POST /api/v1/models/classifier/unload`
pub async fn unload_classifier(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    if !state.engine.unload_model().await {
        return Err(AppError::BadRequest("No model is currently loaded".to_string()));
    }

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Snore classifier unloaded",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::testing::ConstantClassifier;
    use crate::config::AppConfig;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use std::sync::Arc;

    macro_rules! model_app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .route("/models/classifier", web::get().to(get_classifier_status))
                    .route("/models/classifier/load", web::post().to(load_classifier))
                    .route("/models/classifier/unload", web::post().to(unload_classifier)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_status_reports_unloaded() {
        let app = model_app!(AppState::new(AppConfig::default()).unwrap());
        let req = test::TestRequest::get().uri("/models/classifier").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["loaded"], false);
        assert!(body["model"].is_null());
        assert_eq!(body["configured_device"], "auto");
    }

    #[actix_web::test]
    async fn test_load_missing_file_is_rejected() {
        let state = AppState::new(AppConfig::default()).unwrap();
        let app = model_app!(state.clone());
        let req = test::TestRequest::post()
            .uri("/models/classifier/load")
            .set_json(json!({"model_path": "/nonexistent/model.safetensors", "device": "cpu"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(!state.engine.is_model_loaded().await);
    }

    #[actix_web::test]
    async fn test_load_unknown_device_is_rejected() {
        let app = model_app!(AppState::new(AppConfig::default()).unwrap());
        let req = test::TestRequest::post()
            .uri("/models/classifier/load")
            .set_json(json!({"device": "tpu"}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["error"]["type"], "validation_error");
    }

    #[actix_web::test]
    async fn test_unload() {
        let state = AppState::new(AppConfig::default()).unwrap();
        state
            .engine
            .install(Arc::new(ConstantClassifier(0.5)), None, 0)
            .await;
        let app = model_app!(state.clone());

        let req = test::TestRequest::post().uri("/models/classifier/unload").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        assert!(!state.engine.is_model_loaded().await);

        let req = test::TestRequest::post().uri("/models/classifier/unload").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }
}
