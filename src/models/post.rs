use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::models::identity::display_name_or_anonymous;

/// Collection every post document lives in.
pub const POSTS_COLLECTION: &str = "posts";

/// Field names of a post document in the document store.
pub mod fields {
    pub const AUTHOR_ID: &str = "authorId";
    pub const DISPLAY_NAME: &str = "displayName";
    pub const IMAGE_URL: &str = "imageUrl";
    pub const CAPTION: &str = "caption";
    pub const CREATED_AT: &str = "createdAt";
}

/// Rendered in place of a creation time the server has not assigned yet.
pub const UNKNOWN_DATE: &str = "date unknown";

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Server-assigned creation time of a post.
///
/// Variant order matters: the derived `Ord` sorts every `Pending` below every
/// `Resolved`, and resolved instants chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Timestamp {
    Pending,
    Resolved(DateTime<Utc>),
}

impl Timestamp {
    pub fn is_pending(&self) -> bool {
        matches!(self, Timestamp::Pending)
    }

    pub fn resolved(&self) -> Option<DateTime<Utc>> {
        match self {
            Timestamp::Pending => None,
            Timestamp::Resolved(at) => Some(*at),
        }
    }
}

impl From<Option<DateTime<Utc>>> for Timestamp {
    fn from(value: Option<DateTime<Utc>>) -> Self {
        value.map_or(Timestamp::Pending, Timestamp::Resolved)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Pending => f.write_str(UNKNOWN_DATE),
            Timestamp::Resolved(at) => write!(f, "{}", at.format(DATE_FORMAT)),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.resolved().serialize(serializer)
    }
}

/// One feed entry. Posts are never edited or deleted once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Post {
    pub id: String,
    pub author_id: String,
    /// Snapshot of the author's name at upload time.
    pub display_name: Option<String>,
    pub image_url: String,
    pub caption: String,
    pub created_at: Timestamp,
}

impl Post {
    pub fn author(&self) -> &str {
        display_name_or_anonymous(self.display_name.as_deref())
    }
}

/// Fields of a post about to be appended; the store assigns id and time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub author_id: String,
    pub display_name: String,
    pub image_url: String,
    pub caption: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn pending_sorts_below_every_resolved_time() {
        let early = Timestamp::Resolved(Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap());
        let late = Timestamp::Resolved(Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap());

        assert!(Timestamp::Pending < early);
        assert!(early < late);
        assert_eq!(Timestamp::Pending.cmp(&Timestamp::Pending), std::cmp::Ordering::Equal);
    }

    #[test]
    fn timestamp_formats_minutes_or_unknown() {
        let at = Timestamp::Resolved(Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap());
        assert_eq!(at.to_string(), "2024-05-06 07:08");
        assert_eq!(Timestamp::Pending.to_string(), UNKNOWN_DATE);
    }

    #[test]
    fn post_author_uses_snapshot_name() {
        let mut post = Post {
            id: "p1".into(),
            author_id: "u1".into(),
            display_name: Some("Al".into()),
            image_url: "https://cdn/x.png".into(),
            caption: String::new(),
            created_at: Timestamp::Pending,
        };
        assert_eq!(post.author(), "Al");

        post.display_name = None;
        assert_eq!(post.author(), "anonymous");
    }
}
