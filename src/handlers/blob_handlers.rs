use actix_web::{get, web, HttpResponse, Responder};

use crate::dtos::ApiResponse;
use crate::handlers::AppState;

/// GET /api/blobs/{key}
/// Serves blobs of the in-memory backend; hosted backends serve their own.
#[get("/blobs/{key:.*}")]
pub async fn serve_blob(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    // Keys are issued percent-encoded as one segment; `/` may or may not
    // have been decoded by the router already.
    let raw = path.into_inner();
    let key = urlencoding::decode(&raw)
        .map(|key| key.into_owned())
        .unwrap_or_else(|_| raw.clone());
    let found = state.memory.as_ref().and_then(|memory| memory.blob(&key));

    match found {
        Some((bytes, content_type)) => HttpResponse::Ok().content_type(content_type).body(bytes),
        None => HttpResponse::NotFound().json(ApiResponse::error("Blob not found")),
    }
}
