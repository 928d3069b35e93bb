use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;
use tokio::sync::Mutex as SubmitSlot;

use crate::errors::{ActionError, ValidationFailure};
use crate::models::identity::Identity;
use crate::models::post::NewPost;
use crate::repositories::post_repository::PostRepository;
use crate::services::backend::Backend;

pub const UPLOADING: &str = "uploading...";
pub const UPLOADED: &str = "post uploaded";

/// A local image picked for upload. Type and size are not checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// What the panel currently shows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadPanelView {
    pub file_name: Option<String>,
    pub caption: String,
    pub uploading: bool,
    pub message: Option<String>,
}

#[derive(Default)]
struct Form {
    file: Option<SelectedFile>,
    caption: String,
    uploading: bool,
    message: Option<String>,
}

/// Blob key for an upload: namespaced by upload time and original name.
/// Same-named uploads within one millisecond collide.
pub fn blob_key(uploaded_at_ms: i64, file_name: &str) -> String {
    format!("images/{}_{}", uploaded_at_ms, file_name)
}

pub struct UploadPanel {
    backend: Backend,
    form: Mutex<Form>,
    slot: SubmitSlot<()>,
}

/// Clears the `uploading` flag however `submit` exits.
struct UploadingFlag<'a> {
    form: &'a Mutex<Form>,
}

impl Drop for UploadingFlag<'_> {
    fn drop(&mut self) {
        lock(self.form).uploading = false;
    }
}

fn lock(form: &Mutex<Form>) -> MutexGuard<'_, Form> {
    form.lock().unwrap_or_else(PoisonError::into_inner)
}

impl UploadPanel {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            form: Mutex::new(Form::default()),
            slot: SubmitSlot::new(()),
        }
    }

    pub fn select_file(&self, file: SelectedFile) {
        lock(&self.form).file = Some(file);
    }

    pub fn set_caption(&self, caption: impl Into<String>) {
        lock(&self.form).caption = caption.into();
    }

    pub fn caption(&self) -> String {
        lock(&self.form).caption.clone()
    }

    pub fn is_uploading(&self) -> bool {
        lock(&self.form).uploading
    }

    pub fn view(&self) -> UploadPanelView {
        let form = lock(&self.form);
        UploadPanelView {
            file_name: form.file.as_ref().map(|f| f.name.clone()),
            caption: form.caption.clone(),
            uploading: form.uploading,
            message: form.message.clone(),
        }
    }

    /// Uploads the selected file with the current caption as `identity`.
    pub async fn submit(&self, identity: Option<&Identity>) -> Result<(), ActionError> {
        self.submit_captioned(identity, None).await
    }

    /// Like `submit`, but first replaces the caption. The caption is only
    /// applied once the upload slot is ours, so a rejected submission never
    /// touches the form of the one in flight.
    pub async fn submit_captioned(
        &self,
        identity: Option<&Identity>,
        caption: Option<String>,
    ) -> Result<(), ActionError> {
        // A second submission keeps the in-flight status message on screen.
        let _slot = self
            .slot
            .try_lock()
            .map_err(|_| ActionError::from(ValidationFailure::UploadInProgress))?;

        let (identity, file, caption) = {
            let mut form = lock(&self.form);
            if let Some(caption) = caption {
                form.caption = caption;
            }
            let checked = match (form.file.clone(), identity) {
                (None, _) => Err(ValidationFailure::NoFileSelected),
                (Some(_), None) => Err(ValidationFailure::NotSignedIn),
                (Some(file), Some(identity)) => Ok((identity, file)),
            };
            let (identity, file) = match checked {
                Ok(ready) => ready,
                Err(failure) => {
                    form.message = Some(failure.to_string());
                    return Err(failure.into());
                }
            };
            form.uploading = true;
            form.message = Some(UPLOADING.to_string());
            (identity, file, form.caption.clone())
        };
        let _flag = UploadingFlag { form: &self.form };

        let outcome = self.publish(identity, file, caption).await;

        {
            let mut form = lock(&self.form);
            match &outcome {
                Ok(()) => {
                    form.caption.clear();
                    form.file = None;
                    form.message = Some(UPLOADED.to_string());
                }
                Err(e) => {
                    error!("{}", e);
                    form.message = Some(e.to_string());
                }
            }
        }
        outcome
    }

    async fn publish(&self, identity: &Identity, file: SelectedFile, caption: String) -> Result<(), ActionError> {
        let key = blob_key(Utc::now().timestamp_millis(), &file.name);

        let blob = self
            .backend
            .blobs
            .write(&key, file.bytes, &file.content_type)
            .await
            .map_err(ActionError::Upload)?;

        let post = async {
            let image_url = self.backend.blobs.resolve_url(&blob).await?;
            PostRepository::create_post(
                self.backend.documents.as_ref(),
                NewPost {
                    author_id: identity.id.clone(),
                    display_name: identity.author_name().to_string(),
                    image_url,
                    caption,
                },
            )
            .await
        };

        match post.await {
            Ok(()) => {
                info!("Post by {} stored with image {}", identity.id, key);
                Ok(())
            }
            Err(source) => {
                warn!("Blob {} left orphaned", key);
                Err(ActionError::OrphanedBlob { key, source })
            }
        }
    }
}
