// src/api.rs
use actix_web::{delete as delete_route, get, post, web, Error, HttpRequest, HttpResponse};

use crate::app_state::AppState;
use crate::service::{delete_service, download_service, health_service, manifest_service, upload_service};

#[post("/upload")]
pub async fn upload(
    req: HttpRequest,
    payload: web::Payload,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    upload_service(req, payload, app_state).await
}

#[get("/download/{file_id}")]
pub async fn download(file_id: web::Path<String>, app_state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    download_service(file_id.into_inner(), app_state).await
}

#[delete_route("/delete/{file_id}")]
pub async fn delete(file_id: web::Path<String>, app_state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    delete_service(file_id.into_inner(), app_state).await
}

#[get("/manifest/{file_id}")]
pub async fn manifest(file_id: web::Path<String>, app_state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    manifest_service(file_id.into_inner(), app_state).await
}

#[get("/health")]
pub async fn health(app_state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    health_service(app_state).await
}

/// Register every route on an app or scope
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(upload)
        .service(download)
        .service(delete)
        .service(manifest)
        .service(health);
}
