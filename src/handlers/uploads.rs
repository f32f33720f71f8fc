//! # Kept Audio Download
//!
//! `GET /api/v1/uploads/{file}` returns a recording kept by the analysis
//! endpoint. The `file_url` of a stored recording points here.

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::storage::uploads::is_archive_name;
use crate::storage::AudioArchive;
use actix_web::{web, HttpResponse};

/// Serve one kept WAV file.
///
/// ## Status Codes:
/// - **200**: `audio/wav` body
/// - **400**: the name is not a `{uuid}.wav` file name
/// - **404**: no such file
pub async fn download_upload(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let file_name = path.into_inner();
    if !is_archive_name(&file_name) {
        return Err(AppError::ValidationError(format!(
            "'{}' is not a recording file name",
            file_name
        )));
    }

    let archive = AudioArchive::new(&state.get_config().storage.uploads_dir);
    let lookup = file_name.clone();
    let bytes = web::block(move || archive.read(&lookup))
        .await
        .map_err(|e| AppError::Internal(format!("Upload read task failed: {}", e)))??;

    match bytes {
        Some(bytes) => Ok(HttpResponse::Ok().content_type("audio/wav").body(bytes)),
        None => Err(AppError::NotFound(format!("recording file {}", file_name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioClip;
    use crate::handlers::testing::uploads_config;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use uuid::Uuid;

    #[actix_web::test]
    async fn test_download_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(uploads_config(dir.path())).unwrap();
        let id = Uuid::new_v4();
        AudioArchive::new(dir.path())
            .write_clip(id, &AudioClip::new(vec![0.25; 160], 16_000))
            .unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/uploads/{file}", web::get().to(download_upload)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri(&format!("/uploads/{}.wav", id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(*resp.headers().get("content-type").unwrap(), "audio/wav");
        let body = test::read_body(resp).await;
        assert_eq!(&body[0..4], b"RIFF");

        let req = test::TestRequest::get()
            .uri(&format!("/uploads/{}.wav", Uuid::new_v4()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "not_found");
    }

    #[actix_web::test]
    async fn test_rejects_names_outside_the_archive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("secret.wav"), b"RIFF").unwrap();
        let state = AppState::new(uploads_config(&dir.path().join("uploads"))).unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/uploads/{file}", web::get().to(download_upload)),
        )
        .await;

        for uri in ["/uploads/..%2Fsecret.wav", "/uploads/secret.wav", "/uploads/config.toml"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", uri);
        }
    }
}
