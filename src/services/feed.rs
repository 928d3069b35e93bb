//! Live feed of every post, newest first.
//!
//! While mounted, each snapshot pushed by the document store replaces the
//! whole in-memory sequence in one step: documents are mapped to posts and
//! re-sorted by creation time, pending timestamps last. There is no diffing
//! and no pagination. Rendering is a pure function of the current sequence.

use std::sync::Arc;

use futures::StreamExt;
use log::{debug, info};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::errors::BackendError;
use crate::models::document::{Document, OrderBy};
use crate::models::post::{fields, Post, POSTS_COLLECTION};
use crate::repositories::post_repository::PostRepository;
use crate::services::backend::DocumentStore;

pub const NO_POSTS_PLACEHOLDER: &str = "no posts yet";

/// Maps one snapshot to the ordered post sequence.
/// The sort is stable, so equal timestamps keep delivery order.
pub fn materialize(documents: &[Document]) -> Vec<Post> {
    let mut posts: Vec<Post> = documents.iter().map(PostRepository::from_document).collect();
    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    posts
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostCard {
    pub id: String,
    pub image_url: String,
    pub caption: String,
    pub author: String,
    pub posted_at: String,
}

impl From<&Post> for PostCard {
    fn from(post: &Post) -> Self {
        Self {
            id: post.id.clone(),
            image_url: post.image_url.clone(),
            caption: post.caption.clone(),
            author: post.author().to_string(),
            posted_at: post.created_at.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedView {
    Empty { placeholder: String },
    Cards { cards: Vec<PostCard> },
}

pub fn render(posts: &[Post]) -> FeedView {
    if posts.is_empty() {
        FeedView::Empty {
            placeholder: NO_POSTS_PLACEHOLDER.to_string(),
        }
    } else {
        FeedView::Cards {
            cards: posts.iter().map(PostCard::from).collect(),
        }
    }
}

/// Observable feed state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedSnapshot {
    pub subscribed: bool,
    /// Snapshots applied since the current mount.
    pub updates: u64,
    pub posts: Arc<Vec<Post>>,
    /// Bumped on every mount and unmount; a pump only writes while its
    /// generation is current.
    generation: u64,
}

struct Mounted {
    pump: JoinHandle<()>,
}

impl Drop for Mounted {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

pub struct Feed {
    documents: Arc<dyn DocumentStore>,
    state: Arc<watch::Sender<FeedSnapshot>>,
    mounted: Mutex<Option<Mounted>>,
}

impl Feed {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        let (state, _) = watch::channel(FeedSnapshot::default());
        Self {
            documents,
            state: Arc::new(state),
            mounted: Mutex::new(None),
        }
    }

    /// `Unsubscribed -> Subscribed`. Mounting an already mounted feed is a
    /// no-op. On error nothing stays registered with the backend.
    pub async fn mount(&self) -> Result<(), BackendError> {
        let mut mounted = self.mounted.lock().await;
        if mounted.is_some() {
            return Ok(());
        }

        let mut snapshots = self
            .documents
            .subscribe(POSTS_COLLECTION, Some(OrderBy::descending(fields::CREATED_AT)))
            .await?;

        let mut generation = 0;
        self.state.send_modify(|s| {
            s.generation += 1;
            s.subscribed = true;
            s.updates = 0;
            s.posts = Arc::new(Vec::new());
            generation = s.generation;
        });

        let state = Arc::clone(&self.state);
        let pump = tokio::spawn(async move {
            while let Some(documents) = snapshots.next().await {
                let posts = Arc::new(materialize(&documents));
                let applied = state.send_if_modified(|s| {
                    if s.generation != generation {
                        return false;
                    }
                    s.posts = Arc::clone(&posts);
                    s.updates += 1;
                    true
                });
                if !applied {
                    break;
                }
                debug!("Feed now holds {} posts", posts.len());
            }
        });

        info!("Feed subscribed to {}", POSTS_COLLECTION);
        *mounted = Some(Mounted { pump });
        Ok(())
    }

    /// `Subscribed -> Unsubscribed`. After this returns no further snapshot
    /// is applied, even one already in flight.
    pub async fn unmount(&self) {
        let mut mounted = self.mounted.lock().await;
        if mounted.take().is_some() {
            self.state.send_modify(|s| {
                s.generation += 1;
                s.subscribed = false;
                s.updates = 0;
                s.posts = Arc::new(Vec::new());
            });
            info!("Feed unsubscribed from {}", POSTS_COLLECTION);
        }
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.state.borrow().clone()
    }

    pub fn posts(&self) -> Arc<Vec<Post>> {
        Arc::clone(&self.state.borrow().posts)
    }

    pub fn is_subscribed(&self) -> bool {
        self.state.borrow().subscribed
    }

    pub fn view(&self) -> FeedView {
        render(&self.posts())
    }

    pub fn watch(&self) -> watch::Receiver<FeedSnapshot> {
        self.state.subscribe()
    }
}
