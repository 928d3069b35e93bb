// src/services/supabase.rs - Supabase (GoTrue + Storage + PostgREST) backend

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use urlencoding::encode;

use crate::config::SupabaseConfig;
use crate::errors::BackendError;
use crate::models::document::{Direction, Document, FieldValue, Fields, OrderBy};
use crate::models::identity::Identity;
use crate::services::backend::{BlobRef, BlobStorage, DocumentStore, IdentityProvider};
use crate::services::subscription::{Broadcaster, Subscription};

const DISPLAY_NAME_KEY: &str = "display_name";

pub struct SupabaseBackend {
    client: Client,
    supabase_url: String,
    anon_key: String,
    bucket: String,
    poll_interval: Duration,
    /// Access token of the signed-in user, shared with feed poll tasks.
    session: Arc<Mutex<Option<String>>>,
    identity_changes: Broadcaster<Option<Identity>>,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The user's token while signed in, the anon key otherwise.
fn bearer(session: &Mutex<Option<String>>, anon_key: &str) -> String {
    lock(session).clone().unwrap_or_else(|| anon_key.to_string())
}

impl SupabaseBackend {
    pub fn new(config: &SupabaseConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .user_agent("photoshare/0.1")
            .timeout(config.http_timeout)
            .build()?;

        Ok(Self {
            client,
            supabase_url: config.url.trim().trim_end_matches('/').to_string(),
            anon_key: config.anon_key.trim().to_string(),
            bucket: config.bucket.clone(),
            poll_interval: config.poll_interval,
            session: Arc::new(Mutex::new(None)),
            // No persisted session: the first notification is "signed out".
            identity_changes: Broadcaster::new(Some(None)),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.supabase_url, path)
    }

    /// Signed-in requests carry the user's token, everything else the anon key.
    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let token = bearer(&self.session, &self.anon_key);
        builder
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", token))
    }

    fn store_session(&self, access_token: String, identity: Identity) {
        *lock(&self.session) = Some(access_token);
        self.identity_changes.publish(Some(identity));
    }

    /// A sign-up without a token awaits email confirmation; whatever session
    /// was held before belongs to someone else and is dropped.
    fn finish_sign_up(&self, token: Option<String>, identity: &Identity) {
        match token {
            Some(token) => self.store_session(token, identity.clone()),
            None => {
                info!("Account {} created, awaiting email confirmation", identity.id);
                if lock(&self.session).take().is_some() {
                    self.identity_changes.publish(None);
                }
            }
        }
    }

    fn access_token(&self) -> Option<String> {
        lock(&self.session).clone()
    }

    fn object_path(&self, key: &str) -> String {
        format!("{}/{}", encode(&self.bucket), encode_key(key))
    }

    async fn fetch_collection(
        client: &Client,
        url: &str,
        anon_key: &str,
        token: &str,
    ) -> Result<Vec<Document>, BackendError> {
        let resp = client
            .get(url)
            .header("apikey", anon_key)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await?;
        let body = read_json(resp).await?;
        rows_to_documents(body)
    }
}

/// Each path segment is encoded on its own so `/` keeps separating folders.
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Pulls the human-readable part out of a Supabase error body.
fn extract_message(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    ["msg", "message", "error_description", "error"]
        .iter()
        .find_map(|key| json.get(*key).and_then(|v| v.as_str()))
        .map(|s| s.to_string())
}

async fn read_json(resp: Response) -> Result<Value, BackendError> {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();

    if !status.is_success() {
        let message = extract_message(&text).unwrap_or_else(|| format!("{} {}", status, text));
        return Err(BackendError::Rejected(message));
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}

fn parse_user(user: &Value) -> Result<Identity, BackendError> {
    let id = user
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| BackendError::InvalidResponse("response carries no user id".to_string()))?;
    let email = user.get("email").and_then(|v| v.as_str()).unwrap_or_default();
    let display_name = user
        .get("user_metadata")
        .and_then(|m| m.get(DISPLAY_NAME_KEY))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    Ok(Identity {
        id: id.to_string(),
        email: email.to_string(),
        display_name,
    })
}

/// Token responses nest the user; bare sign-up responses are the user.
fn parse_auth_response(body: &Value) -> Result<(Option<String>, Identity), BackendError> {
    let token = body
        .get("access_token")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let identity = parse_user(body.get("user").unwrap_or(body))?;
    Ok((token, identity))
}

fn rows_to_documents(body: Value) -> Result<Vec<Document>, BackendError> {
    let rows = match body {
        Value::Array(rows) => rows,
        other => {
            return Err(BackendError::InvalidResponse(format!(
                "expected array response, got {}",
                other
            )));
        }
    };

    rows.into_iter()
        .map(|row| match row {
            Value::Object(mut fields) => {
                let id = match fields.remove("id") {
                    Some(Value::String(s)) => s,
                    Some(Value::Number(n)) => n.to_string(),
                    _ => return Err(BackendError::InvalidResponse("row without id".to_string())),
                };
                Ok(Document::new(id, fields))
            }
            _ => Err(BackendError::InvalidResponse("row is not an object".to_string())),
        })
        .collect()
}

/// `ServerTimestamp` columns are left out so the column default stamps them.
fn insert_payload(fields: Fields) -> Map<String, Value> {
    fields
        .into_iter()
        .filter_map(|(name, value)| match value {
            FieldValue::Value(v) => Some((name, v)),
            FieldValue::ServerTimestamp => None,
        })
        .collect()
}

fn order_param(order: &OrderBy) -> String {
    let dir = match order.direction {
        Direction::Ascending => "asc",
        Direction::Descending => "desc",
    };
    format!("{}.{}", order.field, dir)
}

#[async_trait]
impl IdentityProvider for SupabaseBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, BackendError> {
        let url = self.endpoint("/auth/v1/token?grant_type=password");
        let resp = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&Credentials {
                email: email.trim(),
                password,
            })
            .send()
            .await?;

        let body = read_json(resp).await?;
        let (token, identity) = parse_auth_response(&body)?;
        let token = token.ok_or_else(|| {
            BackendError::InvalidResponse("login response carries no access token".to_string())
        })?;

        info!("Signed in as {}", identity.id);
        self.store_session(token, identity.clone());
        Ok(identity)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, BackendError> {
        let url = self.endpoint("/auth/v1/signup");
        let resp = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&Credentials {
                email: email.trim(),
                password,
            })
            .send()
            .await?;

        let body = read_json(resp).await?;
        let (token, identity) = parse_auth_response(&body)?;
        self.finish_sign_up(token, &identity);
        Ok(identity)
    }

    async fn update_display_name(&self, identity: &Identity, name: &str) -> Result<(), BackendError> {
        let token = self
            .access_token()
            .ok_or_else(|| BackendError::Rejected("no active session".to_string()))?;

        let url = self.endpoint("/auth/v1/user");
        let resp = self
            .client
            .put(&url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", token))
            .json(&serde_json::json!({ "data": { DISPLAY_NAME_KEY: name } }))
            .send()
            .await?;

        let body = read_json(resp).await?;
        let updated = parse_user(&body)?;
        if updated.id != identity.id {
            warn!("Display name update answered for {} instead of {}", updated.id, identity.id);
        }
        self.store_session(token, updated);
        Ok(())
    }

    async fn sign_out(&self) {
        if let Some(token) = self.access_token() {
            let url = self.endpoint("/auth/v1/logout");
            let result = self
                .client
                .post(&url)
                .header("apikey", &self.anon_key)
                .header("Authorization", format!("Bearer {}", token))
                .send()
                .await;
            match result {
                Ok(resp) if !resp.status().is_success() => {
                    warn!("Remote logout answered {}", resp.status())
                }
                Err(e) => warn!("Remote logout failed: {}", e),
                Ok(_) => {}
            }
        }

        *lock(&self.session) = None;
        self.identity_changes.publish(None);
    }

    fn has_session(&self) -> bool {
        self.access_token().is_some()
    }

    fn on_change(&self) -> Subscription<Option<Identity>> {
        self.identity_changes.subscribe()
    }
}

#[async_trait]
impl BlobStorage for SupabaseBackend {
    async fn write(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<BlobRef, BackendError> {
        let url = self.endpoint(&format!("/storage/v1/object/{}", self.object_path(key)));
        debug!("Uploading {} bytes to {}", bytes.len(), url);

        let resp = self
            .authorized(self.client.post(&url))
            .header("Content-Type", content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await?;
        read_json(resp).await?;

        Ok(BlobRef { key: key.to_string() })
    }

    /// Public-bucket URL; issuing it needs no round trip.
    async fn resolve_url(&self, blob: &BlobRef) -> Result<String, BackendError> {
        Ok(self.endpoint(&format!(
            "/storage/v1/object/public/{}",
            self.object_path(&blob.key)
        )))
    }
}

#[async_trait]
impl DocumentStore for SupabaseBackend {
    async fn append(&self, collection: &str, fields: Fields) -> Result<(), BackendError> {
        let url = self.endpoint(&format!("/rest/v1/{}", encode(collection)));
        let payload = insert_payload(fields);

        let resp = self
            .authorized(self.client.post(&url))
            .header("Prefer", "return=minimal")
            .json(&payload)
            .send()
            .await?;
        read_json(resp).await?;
        Ok(())
    }

    /// PostgREST has no push channel here, so the collection is re-read every
    /// poll interval and a snapshot is emitted only when the set changed.
    async fn subscribe(
        &self,
        collection: &str,
        order: Option<OrderBy>,
    ) -> Result<Subscription<Vec<Document>>, BackendError> {
        let mut url = self.endpoint(&format!("/rest/v1/{}?select=*", encode(collection)));
        if let Some(order) = &order {
            url.push_str(&format!("&order={}", order_param(order)));
        }
        let token = bearer(&self.session, &self.anon_key);

        // Setup errors surface here, before any task or listener exists.
        let initial = Self::fetch_collection(&self.client, &url, &self.anon_key, &token).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(initial.clone());

        let client = self.client.clone();
        let anon_key = self.anon_key.clone();
        let session = Arc::clone(&self.session);
        let interval = self.poll_interval;
        let collection = collection.to_string();
        let task = tokio::spawn(async move {
            let mut last = initial;
            loop {
                tokio::time::sleep(interval).await;
                // Re-read every tick so a refreshed or replaced token is used.
                let token = bearer(&session, &anon_key);
                match Self::fetch_collection(&client, &url, &anon_key, &token).await {
                    Ok(docs) if docs != last => {
                        if tx.send(docs.clone()).is_err() {
                            break;
                        }
                        last = docs;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Polling {} failed: {}", collection, e),
                }
            }
        });

        Ok(Subscription::new(rx, move || task.abort()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_message_prefers_supabase_fields() {
        assert_eq!(
            extract_message(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#),
            Some("Invalid login credentials".to_string())
        );
        assert_eq!(
            extract_message(r#"{"msg":"User already registered"}"#),
            Some("User already registered".to_string())
        );
        assert_eq!(extract_message("<html>bad gateway</html>"), None);
    }

    #[test]
    fn parses_token_and_bare_user_responses() {
        let token_resp = json!({
            "access_token": "tok",
            "user": {
                "id": "u1",
                "email": "al@example.com",
                "user_metadata": { "display_name": "Al" }
            }
        });
        let (token, identity) = parse_auth_response(&token_resp).unwrap();
        assert_eq!(token.as_deref(), Some("tok"));
        assert_eq!(identity.display_name.as_deref(), Some("Al"));

        let bare = json!({ "id": "u2", "email": "bo@example.com", "user_metadata": {} });
        let (token, identity) = parse_auth_response(&bare).unwrap();
        assert!(token.is_none());
        assert_eq!(identity.id, "u2");
        assert_eq!(identity.display_name, None);

        assert!(parse_auth_response(&json!({ "email": "x" })).is_err());
    }

    #[test]
    fn keys_keep_folder_separators() {
        assert_eq!(encode_key("images/1700000000000_my cat.png"), "images/1700000000000_my%20cat.png");
    }

    #[test]
    fn server_timestamp_left_to_column_default() {
        let mut fields = Fields::new();
        fields.insert("caption".to_string(), "hi".into());
        fields.insert("createdAt".to_string(), FieldValue::ServerTimestamp);

        let payload = insert_payload(fields);
        assert_eq!(payload.get("caption"), Some(&json!("hi")));
        assert!(!payload.contains_key("createdAt"));
    }

    #[test]
    fn rows_become_documents() {
        let docs = rows_to_documents(json!([
            { "id": 7, "caption": "a" },
            { "id": "b1", "caption": "b" }
        ]))
        .unwrap();
        assert_eq!(docs[0].id, "7");
        assert_eq!(docs[1].str_field("caption"), Some("b"));
        assert!(!docs[0].fields.contains_key("id"));

        assert!(rows_to_documents(json!({ "message": "nope" })).is_err());
        assert!(rows_to_documents(json!([{ "caption": "no id" }])).is_err());
    }

    fn backend() -> SupabaseBackend {
        SupabaseBackend::new(&SupabaseConfig {
            url: "https://project.supabase.co/".to_string(),
            anon_key: "anon-key".to_string(),
            bucket: "images".to_string(),
            poll_interval: Duration::from_millis(2000),
            http_timeout: Duration::from_secs(30),
        })
        .unwrap()
    }

    #[test]
    fn bearer_follows_the_current_session() {
        let backend = backend();
        let shared = Arc::clone(&backend.session);
        assert_eq!(bearer(&shared, "anon-key"), "anon-key");

        backend.store_session("tok-1".to_string(), Identity::new("u1", "al@example.com"));
        assert_eq!(bearer(&shared, "anon-key"), "tok-1");

        backend.store_session("tok-2".to_string(), Identity::new("u1", "al@example.com"));
        assert_eq!(bearer(&shared, "anon-key"), "tok-2");
    }

    #[test]
    fn unconfirmed_sign_up_holds_no_session() {
        let backend = backend();
        let body = json!({ "id": "u2", "email": "bo@example.com", "user_metadata": {} });
        let (token, identity) = parse_auth_response(&body).unwrap();

        backend.finish_sign_up(token, &identity);
        assert!(!backend.has_session());
        assert_eq!(backend.identity_changes.latest(), Some(None));
    }

    #[test]
    fn unconfirmed_sign_up_drops_a_stale_session() {
        let backend = backend();
        backend.store_session("tok-1".to_string(), Identity::new("u1", "al@example.com"));
        assert!(backend.has_session());

        backend.finish_sign_up(None, &Identity::new("u2", "bo@example.com"));
        assert!(!backend.has_session());
        assert_eq!(backend.identity_changes.latest(), Some(None));
    }

    #[test]
    fn confirmed_sign_up_starts_a_session() {
        let backend = backend();
        let identity = Identity::new("u2", "bo@example.com");
        backend.finish_sign_up(Some("tok".to_string()), &identity);
        assert!(backend.has_session());
        assert_eq!(backend.identity_changes.latest(), Some(Some(identity)));
    }

    #[test]
    fn order_hint_maps_to_postgrest() {
        assert_eq!(order_param(&OrderBy::descending("createdAt")), "createdAt.desc");
    }
}
