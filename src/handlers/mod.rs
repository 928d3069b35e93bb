pub mod auth_handlers;
pub mod blob_handlers;
pub mod feed_handlers;
pub mod upload_handlers;

use std::sync::Arc;

use actix_web::{web, HttpResponse};

use crate::dtos::ApiResponse;
use crate::errors::{ActionError, ValidationFailure};
use crate::services::app::PhotoShareApp;
use crate::services::memory::MemoryBackend;

#[derive(Clone)]
pub struct AppState {
    pub app: Arc<PhotoShareApp>,
    /// Set when running on the in-memory backend, whose blobs are served here.
    pub memory: Option<Arc<MemoryBackend>>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .service(auth_handlers::sign_in)
            .service(auth_handlers::sign_up)
            .service(auth_handlers::sign_out),
    )
    .service(
        web::scope("/api")
            .service(auth_handlers::get_session)
            .service(upload_handlers::get_upload)
            .service(upload_handlers::select_file)
            .service(upload_handlers::submit_upload)
            .service(feed_handlers::get_feed)
            .service(blob_handlers::serve_blob),
    );
}

/// Maps a failed panel action onto a response carrying the panel message.
pub(crate) fn action_failed(err: &ActionError) -> HttpResponse {
    let body = ApiResponse::error(err.to_string());
    match err {
        ActionError::Validation(ValidationFailure::RequestInProgress)
        | ActionError::Validation(ValidationFailure::UploadInProgress) => {
            HttpResponse::Conflict().json(body)
        }
        ActionError::Validation(_) => HttpResponse::BadRequest().json(body),
        _ => HttpResponse::BadGateway().json(body),
    }
}
