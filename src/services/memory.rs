//! In-process backend used for local runs (`PHOTOSHARE_BACKEND=memory`) and
//! as the substitute backend in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use log::{debug, info};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::BackendError;
use crate::models::document::{Document, FieldValue, Fields, OrderBy};
use crate::models::identity::Identity;
use crate::services::backend::{BlobRef, BlobStorage, DocumentStore, IdentityProvider};
use crate::services::subscription::{Broadcaster, Subscription};

/// Path the HTTP layer serves in-memory blobs from.
pub const BLOB_URL_PREFIX: &str = "/api/blobs/";

/// Backend operations that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SignIn,
    SignUp,
    UpdateDisplayName,
    BlobWrite,
    ResolveUrl,
    Append,
    Subscribe,
}

#[derive(Debug, Default)]
pub struct CallCounts {
    pub sign_in: AtomicUsize,
    pub sign_up: AtomicUsize,
    pub update_display_name: AtomicUsize,
    pub blob_write: AtomicUsize,
    pub append: AtomicUsize,
}

impl CallCounts {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Total calls that reached the identity provider.
    pub fn identity_calls(&self) -> usize {
        Self::get(&self.sign_in) + Self::get(&self.sign_up) + Self::get(&self.update_display_name)
    }
}

struct Account {
    identity: Identity,
    password: String,
}

struct Collection {
    documents: Vec<Document>,
    changes: Broadcaster<Vec<Document>>,
}

impl Collection {
    fn new() -> Self {
        Self {
            documents: Vec::new(),
            changes: Broadcaster::new(Some(Vec::new())),
        }
    }
}

pub struct MemoryBackend {
    accounts: Mutex<HashMap<String, Account>>,
    current: Broadcaster<Option<Identity>>,
    blobs: Mutex<HashMap<String, (Vec<u8>, String)>>,
    collections: Mutex<HashMap<String, Collection>>,
    last_server_time: Mutex<Option<DateTime<Utc>>>,
    failures: Mutex<HashMap<Operation, String>>,
    latency_compensation: bool,
    email_confirmation: bool,
    pub calls: CallCounts,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            current: Broadcaster::new(Some(None)),
            blobs: Mutex::new(HashMap::new()),
            collections: Mutex::new(HashMap::new()),
            last_server_time: Mutex::new(None),
            failures: Mutex::new(HashMap::new()),
            latency_compensation: false,
            email_confirmation: false,
            calls: CallCounts::default(),
        }
    }

    /// Every append first publishes the new document with a null creation
    /// time, then again once the server time is assigned.
    pub fn with_latency_compensation(mut self) -> Self {
        self.latency_compensation = true;
        self
    }

    /// Sign-up creates the account but no session, as a provider that
    /// requires email confirmation does.
    pub fn with_email_confirmation(mut self) -> Self {
        self.email_confirmation = true;
        self
    }

    /// Makes the next call of `op` fail with `message`.
    pub fn fail_next(&self, op: Operation, message: impl Into<String>) {
        lock(&self.failures).insert(op, message.into());
    }

    fn check(&self, op: Operation) -> Result<(), BackendError> {
        match lock(&self.failures).remove(&op) {
            Some(message) => Err(BackendError::Rejected(message)),
            None => Ok(()),
        }
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.current.latest().flatten()
    }

    pub fn blob(&self, key: &str) -> Option<(Vec<u8>, String)> {
        lock(&self.blobs).get(key).cloned()
    }

    pub fn blob_count(&self) -> usize {
        lock(&self.blobs).len()
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        lock(&self.collections)
            .get(collection)
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, collection: &str) -> usize {
        lock(&self.collections)
            .get(collection)
            .map_or(0, |c| c.changes.subscriber_count())
    }

    pub fn identity_subscriber_count(&self) -> usize {
        self.current.subscriber_count()
    }

    /// Strictly increasing, even for writes within the same clock tick.
    fn next_server_time(&self) -> DateTime<Utc> {
        let mut last = lock(&self.last_server_time);
        let now = Utc::now();
        let next = match *last {
            Some(prev) if now <= prev => prev + Duration::milliseconds(1),
            _ => now,
        };
        *last = Some(next);
        next
    }

    fn publish_identity(&self, identity: Option<Identity>) {
        self.current.publish(identity);
    }
}

#[async_trait]
impl IdentityProvider for MemoryBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, BackendError> {
        self.calls.sign_in.fetch_add(1, Ordering::SeqCst);
        self.check(Operation::SignIn)?;

        let identity = {
            let accounts = lock(&self.accounts);
            match accounts.get(email) {
                Some(account) if account.password == password => account.identity.clone(),
                _ => return Err(BackendError::Rejected("invalid login credentials".to_string())),
            }
        };

        info!("Signed in {}", identity.id);
        self.publish_identity(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, BackendError> {
        self.calls.sign_up.fetch_add(1, Ordering::SeqCst);
        self.check(Operation::SignUp)?;

        let identity = {
            let mut accounts = lock(&self.accounts);
            if accounts.contains_key(email) {
                return Err(BackendError::Rejected("email already in use".to_string()));
            }
            let identity = Identity::new(Uuid::new_v4().to_string(), email);
            accounts.insert(
                email.to_string(),
                Account {
                    identity: identity.clone(),
                    password: password.to_string(),
                },
            );
            identity
        };

        info!("Created account {}", identity.id);
        if !self.email_confirmation {
            self.publish_identity(Some(identity.clone()));
        }
        Ok(identity)
    }

    async fn update_display_name(&self, identity: &Identity, name: &str) -> Result<(), BackendError> {
        self.calls.update_display_name.fetch_add(1, Ordering::SeqCst);
        self.check(Operation::UpdateDisplayName)?;

        let updated = {
            let mut accounts = lock(&self.accounts);
            let account = accounts
                .get_mut(&identity.email)
                .ok_or_else(|| BackendError::Rejected("user not found".to_string()))?;
            account.identity.display_name = Some(name.to_string());
            account.identity.clone()
        };

        if self.current_identity().is_some_and(|current| current.id == updated.id) {
            self.publish_identity(Some(updated));
        }
        Ok(())
    }

    async fn sign_out(&self) {
        self.publish_identity(None);
    }

    fn has_session(&self) -> bool {
        self.current_identity().is_some()
    }

    fn on_change(&self) -> Subscription<Option<Identity>> {
        self.current.subscribe()
    }
}

#[async_trait]
impl BlobStorage for MemoryBackend {
    async fn write(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<BlobRef, BackendError> {
        self.calls.blob_write.fetch_add(1, Ordering::SeqCst);
        self.check(Operation::BlobWrite)?;

        debug!("Stored blob {} ({} bytes)", key, bytes.len());
        lock(&self.blobs).insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(BlobRef { key: key.to_string() })
    }

    async fn resolve_url(&self, blob: &BlobRef) -> Result<String, BackendError> {
        self.check(Operation::ResolveUrl)?;
        if !lock(&self.blobs).contains_key(&blob.key) {
            return Err(BackendError::Rejected(format!("object not found: {}", blob.key)));
        }
        Ok(format!("{}{}", BLOB_URL_PREFIX, urlencoding::encode(&blob.key)))
    }
}

fn materialize(fields: &Fields, server_time: Option<DateTime<Utc>>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(name, value)| {
            let value = match value {
                FieldValue::Value(v) => v.clone(),
                FieldValue::ServerTimestamp => server_time
                    .map(|at| Value::String(at.to_rfc3339_opts(SecondsFormat::Micros, true)))
                    .unwrap_or(Value::Null),
            };
            (name.clone(), value)
        })
        .collect()
}

#[async_trait]
impl DocumentStore for MemoryBackend {
    async fn append(&self, collection: &str, fields: Fields) -> Result<(), BackendError> {
        self.calls.append.fetch_add(1, Ordering::SeqCst);
        self.check(Operation::Append)?;

        let id = Uuid::new_v4().to_string();
        let mut collections = lock(&self.collections);
        let entry = collections
            .entry(collection.to_string())
            .or_insert_with(Collection::new);

        if self.latency_compensation {
            let mut pending = entry.documents.clone();
            pending.push(Document::new(id.clone(), materialize(&fields, None)));
            entry.changes.publish(pending);
        }

        let stored = Document::new(id, materialize(&fields, Some(self.next_server_time())));
        entry.documents.push(stored);
        entry.changes.publish(entry.documents.clone());
        Ok(())
    }

    async fn subscribe(
        &self,
        collection: &str,
        _order: Option<OrderBy>,
    ) -> Result<Subscription<Vec<Document>>, BackendError> {
        self.check(Operation::Subscribe)?;
        let mut collections = lock(&self.collections);
        let entry = collections
            .entry(collection.to_string())
            .or_insert_with(Collection::new);
        Ok(entry.changes.subscribe())
    }
}
