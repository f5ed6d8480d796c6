//! Persisted entities returned by repositories.
//!
//! Keep these structs focused on stored data. Business logic lives in the
//! ingestion and backfill layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorEntity {
    pub id: String,
    pub name: String,
    pub avatar_url: String,
    pub avatar_key: Option<String>,
    pub profile_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArticleEntity {
    pub id: String,
    pub author_id: String,
    pub tag: String,
    pub tag_index: Option<String>,
    pub title: String,
    pub href: Option<String>,
    pub image_url: String,
    pub image_key: Option<String>,
    pub posted_at: DateTime<Utc>,
    pub read_duration: String,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuthor {
    pub name: String,
    pub avatar_url: String,
    pub avatar_key: Option<String>,
    pub profile_url: Option<String>,
}

/// Insert payload; `author_id` must reference an existing author row.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub author_id: String,
    pub tag: String,
    pub title: String,
    pub href: Option<String>,
    pub image_url: String,
    pub image_key: Option<String>,
    pub posted_at: DateTime<Utc>,
    pub read_duration: String,
    pub summary: Option<String>,
}
