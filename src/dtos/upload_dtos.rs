use serde::Deserialize;

#[derive(Deserialize)]
pub struct SelectFileRequest {
    /// Base64 image bytes, optionally as a `data:` URL.
    pub image_data: String,
    pub file_name: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Deserialize)]
pub struct SubmitUploadRequest {
    #[serde(default)]
    pub caption: Option<String>,
}
