//! Normalized records written to the metadata file.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single retrieved post with its author, metrics, entities and media.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    /// Canonical public URL of the post.
    pub url: String,
    pub text: String,
    pub created_at: Option<DateTime<Utc>>,
    pub lang: Option<String>,
    pub possibly_sensitive: bool,
    pub conversation_id: Option<String>,
    pub source: Option<String>,
    pub reply_settings: Option<String>,
    pub author_id: Option<String>,
    pub author: Option<Author>,
    pub metrics: PostMetrics,
    pub entities: Entities,
    pub referenced_posts: Vec<ReferencedPost>,
    pub context_annotations: Vec<ContextAnnotation>,
    pub media: Vec<MediaItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub username: String,
    pub name: Option<String>,
    pub verified: bool,
    pub profile_image_url: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub protected: bool,
    pub metrics: AuthorMetrics,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorMetrics {
    pub followers: u64,
    pub following: u64,
    pub posts: u64,
    pub listed: u64,
}

/// Engagement counts. Missing counts are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMetrics {
    pub likes: u64,
    pub reposts: u64,
    pub replies: u64,
    pub quotes: u64,
    pub bookmarks: u64,
    pub views: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entities {
    pub urls: Vec<UrlEntity>,
    /// Mentioned usernames, without the leading `@`.
    pub mentions: Vec<String>,
    /// Hashtags, without the leading `#`.
    pub hashtags: Vec<String>,
    /// Cashtags, without the leading `$`.
    pub cashtags: Vec<String>,
}

impl Entities {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
            && self.mentions.is_empty()
            && self.hashtags.is_empty()
            && self.cashtags.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlEntity {
    /// Shortened link as it appears in the text.
    pub url: String,
    pub expanded_url: Option<String>,
    pub display_url: Option<String>,
}

/// A quote, reply or repost relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencedPost {
    /// `quoted`, `replied_to` or `retweeted`.
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextAnnotation {
    pub domain: Option<String>,
    pub entity: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Image,
    Video,
}

impl MediaKind {
    /// Extension used when the media URL doesn't carry one.
    #[must_use]
    pub const fn default_extension(self) -> &'static str {
        match self {
            Self::Image => "jpg",
            Self::Video => "mp4",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    #[default]
    Pending,
    Success,
    Failed,
    /// Upstream gave no downloadable URL; never attempted.
    Skipped,
}

/// One downloadable asset attached to a post.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub media_key: Option<String>,
    pub kind: MediaKind,
    /// URL the file is (or would be) downloaded from.
    pub url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_ms: Option<u64>,
    pub alt_text: Option<String>,
    pub preview_image_url: Option<String>,
    pub views: Option<u64>,
    /// Destination relative to the output directory.
    pub path: Option<PathBuf>,
    pub status: DownloadStatus,
    /// Why the download failed, if it did.
    pub error: Option<String>,
}
