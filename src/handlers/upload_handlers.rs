use std::path::Path;

use actix_web::{get, post, web, HttpResponse, Responder};
use base64::{engine::general_purpose, Engine as _};
use log::{debug, warn};

use crate::dtos::upload_dtos::{SelectFileRequest, SubmitUploadRequest};
use crate::dtos::ApiResponse;
use crate::handlers::{action_failed, AppState};
use crate::services::upload_panel::SelectedFile;

/// Strips a `data:<type>;base64,` prefix if the client sent a data URL.
fn base64_payload(image_data: &str) -> &str {
    match image_data.split_once(',') {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => image_data,
    }
}

/// Content type from the file extension when the client did not send one.
pub(crate) fn guess_content_type(file_name: &str) -> String {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => mime::IMAGE_JPEG.to_string(),
        Some("png") => mime::IMAGE_PNG.to_string(),
        Some("gif") => mime::IMAGE_GIF.to_string(),
        Some("bmp") => mime::IMAGE_BMP.to_string(),
        Some("svg") => mime::IMAGE_SVG.to_string(),
        Some("webp") => "image/webp".to_string(),
        _ => mime::APPLICATION_OCTET_STREAM.to_string(),
    }
}

/// GET /api/upload
#[get("/upload")]
pub async fn get_upload(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(ApiResponse::success("Upload panel", state.app.upload().view()))
}

/// POST /api/upload/file
/// Replaces the selected file.
#[post("/upload/file")]
pub async fn select_file(state: web::Data<AppState>, body: web::Json<SelectFileRequest>) -> impl Responder {
    let body = body.into_inner();
    let bytes = match general_purpose::STANDARD.decode(base64_payload(&body.image_data)) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Rejected file {}: {}", body.file_name, e);
            return HttpResponse::BadRequest().json(ApiResponse::error("Invalid base64 image data"));
        }
    };

    let content_type = body
        .content_type
        .filter(|ct| !ct.trim().is_empty())
        .unwrap_or_else(|| guess_content_type(&body.file_name));
    debug!("Selected {} ({}, {} bytes)", body.file_name, content_type, bytes.len());

    let upload = state.app.upload();
    upload.select_file(SelectedFile {
        name: body.file_name,
        content_type,
        bytes,
    });
    HttpResponse::Ok().json(ApiResponse::success("File selected", upload.view()))
}

/// POST /api/upload/submit
#[post("/upload/submit")]
pub async fn submit_upload(state: web::Data<AppState>, body: web::Json<SubmitUploadRequest>) -> impl Responder {
    let upload = state.app.upload();
    match state.app.submit_upload_captioned(body.into_inner().caption).await {
        Ok(()) => HttpResponse::Created().json(ApiResponse::success(
            upload.view().message.unwrap_or_default(),
            upload.view(),
        )),
        Err(e) => action_failed(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_prefix_is_stripped() {
        assert_eq!(base64_payload("data:image/png;base64,iVBORw0"), "iVBORw0");
        assert_eq!(base64_payload("iVBORw0"), "iVBORw0");
    }

    #[test]
    fn content_type_from_extension() {
        assert_eq!(guess_content_type("cat.PNG"), "image/png");
        assert_eq!(guess_content_type("dog.jpeg"), "image/jpeg");
        assert_eq!(guess_content_type("x.webp"), "image/webp");
        assert_eq!(guess_content_type("notes"), "application/octet-stream");
    }
}
