use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::BackendError;
use crate::models::document::{Document, Fields, OrderBy};
use crate::models::identity::Identity;
use crate::services::subscription::Subscription;

/// Handle to a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub key: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, BackendError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, BackendError>;

    async fn update_display_name(&self, identity: &Identity, name: &str) -> Result<(), BackendError>;

    /// Always succeeds locally; a failed remote logout is only logged.
    async fn sign_out(&self);

    /// Whether a signed-in session is held. A sign-up that still awaits email
    /// confirmation creates an account without one.
    fn has_session(&self) -> bool;

    /// Current identity (or its absence) is delivered first, then every change.
    fn on_change(&self) -> Subscription<Option<Identity>>;
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn write(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<BlobRef, BackendError>;

    async fn resolve_url(&self, blob: &BlobRef) -> Result<String, BackendError>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn append(&self, collection: &str, fields: Fields) -> Result<(), BackendError>;

    /// The current contents of the collection are delivered first, then the
    /// full set again after every change.
    async fn subscribe(
        &self,
        collection: &str,
        order: Option<OrderBy>,
    ) -> Result<Subscription<Vec<Document>>, BackendError>;
}

/// The three backend capabilities the client is built on. Constructed once
/// at startup and passed to every component that needs it.
#[derive(Clone)]
pub struct Backend {
    pub identity: Arc<dyn IdentityProvider>,
    pub blobs: Arc<dyn BlobStorage>,
    pub documents: Arc<dyn DocumentStore>,
}

impl Backend {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        blobs: Arc<dyn BlobStorage>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            identity,
            blobs,
            documents,
        }
    }

    /// Uses one service for all three capabilities.
    pub fn from_service<S>(service: Arc<S>) -> Self
    where
        S: IdentityProvider + BlobStorage + DocumentStore + 'static,
    {
        Self {
            identity: service.clone(),
            blobs: service.clone(),
            documents: service,
        }
    }
}
