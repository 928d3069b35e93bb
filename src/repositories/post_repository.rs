// src/repositories/post_repository.rs - post documents <-> Post

use chrono::{DateTime, Utc};
use log::debug;
use serde_json::Value;

use crate::errors::BackendError;
use crate::models::document::{Document, FieldValue, Fields};
use crate::models::post::{fields, NewPost, Post, Timestamp, POSTS_COLLECTION};
use crate::services::backend::DocumentStore;

pub struct PostRepository;

impl PostRepository {
    pub async fn create_post(store: &dyn DocumentStore, post: NewPost) -> Result<(), BackendError> {
        let payload = Self::to_fields(post);
        debug!("Appending post document with {} fields", payload.len());
        store.append(POSTS_COLLECTION, payload).await
    }

    pub fn to_fields(post: NewPost) -> Fields {
        let mut out = Fields::new();
        out.insert(fields::AUTHOR_ID.to_string(), post.author_id.into());
        out.insert(fields::DISPLAY_NAME.to_string(), post.display_name.into());
        out.insert(fields::IMAGE_URL.to_string(), post.image_url.into());
        out.insert(fields::CAPTION.to_string(), post.caption.into());
        out.insert(fields::CREATED_AT.to_string(), FieldValue::ServerTimestamp);
        out
    }

    /// Never fails: missing strings become empty, and a creation time that is
    /// absent, null or unparseable counts as pending.
    pub fn from_document(doc: &Document) -> Post {
        let text = |name: &str| doc.str_field(name).unwrap_or_default().to_string();

        Post {
            id: doc.id.clone(),
            author_id: text(fields::AUTHOR_ID),
            display_name: doc.str_field(fields::DISPLAY_NAME).map(|s| s.to_string()),
            image_url: text(fields::IMAGE_URL),
            caption: text(fields::CAPTION),
            created_at: parse_created_at(doc.fields.get(fields::CREATED_AT)),
        }
    }
}

fn parse_created_at(value: Option<&Value>) -> Timestamp {
    value
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|at| at.with_timezone(&Utc))
        .into()
}
