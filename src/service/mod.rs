//service/mod.rs
pub mod manifest_service;
pub mod retry;
pub mod stripe_service;
pub mod upload;
pub mod download;
pub mod delete;
pub mod deletion_worker;


use actix_multipart::Multipart;
use actix_web::http::{header, StatusCode};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use log::{debug, info};
use log_mdc;
use serde::Serialize;
use std::fmt;

use crate::app_state::AppState;
use crate::error::StripeError;
use crate::metadata::FileManifest;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub file_id: String,
    pub chunk_count: u64,
    pub total_size: u64,
}

impl From<&FileManifest> for UploadResponse {
    fn from(manifest: &FileManifest) -> Self {
        Self {
            file_id: manifest.file_id.clone(),
            chunk_count: manifest.chunk_count,
            total_size: manifest.total_size,
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    backends: Vec<String>,
}

/// Form field holding the file in a multipart upload
pub const UPLOAD_FIELD: &str = "file";

fn is_multipart(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false)
}

// web::Payload is not covered by PayloadConfig, so the limit is enforced here
fn limited<S, E>(source: S, limit: usize) -> impl Stream<Item = Result<Bytes, String>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: fmt::Display,
{
    let mut received = 0usize;
    source.map(move |chunk| {
        let chunk = chunk.map_err(|e| e.to_string())?;
        received += chunk.len();
        if received > limit {
            return Err(format!("payload exceeds {} bytes", limit));
        }
        Ok(chunk)
    })
}

/// Store the `file` field of a multipart form, or the raw body for any other content type
pub async fn upload_service(
    req: HttpRequest,
    payload: web::Payload,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    // Worker threads are reused; drop whatever id the previous request left
    log_mdc::remove("file_id");
    let cancel = app_state.operation_token();
    let _deadline = cancel.clone().drop_guard();
    let limit = app_state.config.server.max_payload_size;

    let manifest = if is_multipart(&req) {
        let mut form = Multipart::new(req.headers(), payload);
        let field = loop {
            match form.next().await {
                Some(Ok(field)) if field.name() == Some(UPLOAD_FIELD) => break field,
                Some(Ok(mut other)) => {
                    debug!("Skipping form field {:?}", other.name());
                    while let Some(chunk) = other.next().await {
                        chunk.map_err(|e| StripeError::Source(e.to_string()))?;
                    }
                }
                Some(Err(e)) => return Err(StripeError::Source(e.to_string()).into()),
                None => {
                    return Err(StripeError::Source(format!("multipart body has no `{}` field", UPLOAD_FIELD)).into())
                }
            }
        };
        debug!("Starting multipart upload");
        app_state.stripe_service.upload(limited(field, limit), &cancel).await?
    } else {
        debug!("Starting upload");
        app_state.stripe_service.upload(limited(payload, limit), &cancel).await?
    };

    info!("Upload stored as {} ({} bytes)", manifest.file_id, manifest.total_size);
    Ok(HttpResponse::Ok().json(UploadResponse::from(&manifest)))
}

pub async fn download_service(file_id: String, app_state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    log_mdc::insert("file_id", &file_id);
    let cancel = app_state.operation_token();
    let deadline = cancel.clone().drop_guard();

    let (manifest, chunks) = app_state.stripe_service.download(&file_id, cancel)?;
    info!("Streaming {} ({} bytes in {} chunks)", file_id, manifest.total_size, manifest.chunk_count);

    // The deadline lives as long as the body stream
    let body = chunks.map(move |chunk| {
        let _deadline = &deadline;
        chunk
    });

    Ok(HttpResponse::Ok()
        .content_type("application/octet-stream")
        .insert_header(("Content-Disposition", format!("attachment; filename=\"{}.merged\"", file_id)))
        .no_chunking(manifest.total_size)
        .streaming(body))
}

pub async fn delete_service(file_id: String, app_state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    log_mdc::insert("file_id", &file_id);
    let cancel = app_state.operation_token();
    let _deadline = cancel.clone().drop_guard();

    let result = app_state.stripe_service.delete(&file_id, &cancel).await?;
    let status = if result.is_complete() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok(HttpResponse::build(status).json(result))
}

pub async fn manifest_service(file_id: String, app_state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    log_mdc::insert("file_id", &file_id);
    let manifest = app_state.stripe_service.manifest(&file_id)?;
    Ok(HttpResponse::Ok().json(manifest))
}

pub async fn health_service(app_state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        backends: app_state.stripe_service.backend_ids(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::MessageBody;

    fn state() -> web::Data<AppState> {
        web::Data::new(AppState::new_for_testing().unwrap())
    }

    #[actix_web::test]
    async fn test_health_lists_backends() {
        let resp = health_service(state()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = resp.into_body().try_into_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["backends"], serde_json::json!(["b0", "b1"]));
    }

    #[actix_web::test]
    async fn test_unknown_file_is_an_error_before_streaming() {
        let err = download_service("missing".to_string(), state()).await.unwrap_err();
        assert_eq!(err.as_response_error().status_code(), StatusCode::NOT_FOUND);

        let err = manifest_service("missing".to_string(), state()).await.unwrap_err();
        assert_eq!(err.as_response_error().status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_multipart_detection() {
        let form = actix_web::test::TestRequest::default()
            .insert_header((header::CONTENT_TYPE, "Multipart/Form-Data; boundary=X"))
            .to_http_request();
        assert!(is_multipart(&form));

        let raw = actix_web::test::TestRequest::default()
            .insert_header((header::CONTENT_TYPE, "application/octet-stream"))
            .to_http_request();
        assert!(!is_multipart(&raw));
        assert!(!is_multipart(&actix_web::test::TestRequest::default().to_http_request()));
    }

    #[test]
    fn test_upload_response_from_manifest() {
        let manifest = crate::metadata::ManifestBuilder::new("f1", 8).build().unwrap();
        let response = UploadResponse::from(&manifest);
        assert_eq!(response.file_id, "f1");
        assert_eq!(response.chunk_count, 0);
        assert_eq!(response.total_size, 0);
    }
}
