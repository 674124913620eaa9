//! Best-effort mapping from upstream JSON into [`Post`].
//!
//! Nothing here fails on a missing or oddly typed field: absent values become
//! empty strings, zeros or `None`. Only a post without an `id` is dropped,
//! since media file names are derived from it.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::constants::POST_URL_PREFIX;
use crate::model::{
    Author, AuthorMetrics, ContextAnnotation, DownloadStatus, Entities, MediaItem, MediaKind, Post,
    PostMetrics, ReferencedPost, UrlEntity,
};
use crate::source::RawPost;

/// Status URLs on either domain, with or without `www.`/`mobile.`. The id
/// must end the path segment and is capped like a bare id.
static STATUS_URL: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?(?:(?:www|mobile)\.)?(?:twitter|x)\.com/(?:\w+|i(?:/web)?)/status(?:es)?/(\d{1,25})(?:[/?#]|$)")
        .unwrap()
});

static NUMERIC_ID: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"^\d{1,25}$").unwrap());

/// Extract a post id from a status URL or a bare numeric id.
///
/// Returns `None` for anything else.
#[must_use]
pub fn extract_post_id(input: &str) -> Option<String> {
    let input = input.trim();
    if NUMERIC_ID.is_match(input) {
        return Some(input.to_string());
    }
    STATUS_URL
        .captures(input)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Normalize one raw post. Returns `None` if it has no id.
#[must_use]
pub fn normalize_post(raw: &RawPost) -> Option<Post> {
    let data = &raw.data;
    let Some(id) = str_field(data, "id") else {
        warn!(raw = %data, "Dropping post without an id");
        return None;
    };

    let post = Post {
        url: format!("{POST_URL_PREFIX}{id}"),
        text: str_field(data, "text").unwrap_or_default(),
        created_at: date_field(data, "created_at"),
        lang: str_field(data, "lang"),
        possibly_sensitive: bool_field(data, "possibly_sensitive"),
        conversation_id: str_field(data, "conversation_id"),
        source: str_field(data, "source"),
        reply_settings: str_field(data, "reply_settings"),
        author_id: str_field(data, "author_id"),
        author: raw.author.as_ref().and_then(normalize_author),
        metrics: normalize_metrics(data.get("public_metrics")),
        entities: normalize_entities(data.get("entities")),
        referenced_posts: normalize_referenced(data.get("referenced_tweets")),
        context_annotations: normalize_annotations(data.get("context_annotations")),
        media: raw.media.iter().map(normalize_media).collect(),
        id,
    };

    debug!(
        post_id = %post.id,
        media = post.media.len(),
        "Normalized post"
    );
    Some(post)
}

fn normalize_author(user: &Value) -> Option<Author> {
    let id = str_field(user, "id")?;
    let metrics = user.get("public_metrics");
    Some(Author {
        id,
        username: str_field(user, "username").unwrap_or_default(),
        name: str_field(user, "name"),
        verified: bool_field(user, "verified"),
        profile_image_url: str_field(user, "profile_image_url"),
        description: str_field(user, "description"),
        location: str_field(user, "location"),
        created_at: date_field(user, "created_at"),
        protected: bool_field(user, "protected"),
        metrics: AuthorMetrics {
            followers: count(metrics, "followers_count"),
            following: count(metrics, "following_count"),
            posts: count(metrics, "tweet_count"),
            listed: count(metrics, "listed_count"),
        },
    })
}

fn normalize_metrics(metrics: Option<&Value>) -> PostMetrics {
    PostMetrics {
        likes: count(metrics, "like_count"),
        reposts: count(metrics, "retweet_count"),
        replies: count(metrics, "reply_count"),
        quotes: count(metrics, "quote_count"),
        bookmarks: count(metrics, "bookmark_count"),
        views: count(metrics, "impression_count"),
    }
}

fn normalize_entities(entities: Option<&Value>) -> Entities {
    let Some(entities) = entities else {
        return Entities::default();
    };

    let tags = |key: &str, field: &str| -> Vec<String> {
        array(entities, key)
            .filter_map(|e| str_field(e, field))
            .collect()
    };

    Entities {
        urls: array(entities, "urls")
            .filter_map(|e| {
                Some(UrlEntity {
                    url: str_field(e, "url")?,
                    expanded_url: str_field(e, "expanded_url"),
                    display_url: str_field(e, "display_url"),
                })
            })
            .collect(),
        mentions: tags("mentions", "username"),
        hashtags: tags("hashtags", "tag"),
        cashtags: tags("cashtags", "tag"),
    }
}

fn normalize_referenced(refs: Option<&Value>) -> Vec<ReferencedPost> {
    refs.and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|r| {
            Some(ReferencedPost {
                kind: str_field(r, "type")?,
                id: str_field(r, "id")?,
            })
        })
        .collect()
}

fn normalize_annotations(annotations: Option<&Value>) -> Vec<ContextAnnotation> {
    annotations
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(|a| ContextAnnotation {
            domain: a.get("domain").and_then(|d| str_field(d, "name")),
            entity: a.get("entity").and_then(|e| str_field(e, "name")),
        })
        .collect()
}

fn normalize_media(media: &Value) -> MediaItem {
    let (url, from_variant) = match str_field(media, "url") {
        Some(url) => (Some(url), false),
        None => (best_variant_url(media), true),
    };

    let kind = match media.get("type").and_then(Value::as_str) {
        Some("photo") => MediaKind::Image,
        Some("video" | "animated_gif") => MediaKind::Video,
        _ if from_variant && url.is_some() => MediaKind::Video,
        _ => MediaKind::Image,
    };

    let status = if url.is_some() {
        DownloadStatus::Pending
    } else {
        DownloadStatus::Skipped
    };

    MediaItem {
        media_key: str_field(media, "media_key"),
        kind,
        url,
        width: u64_field(media, "width").and_then(|v| u32::try_from(v).ok()),
        height: u64_field(media, "height").and_then(|v| u32::try_from(v).ok()),
        duration_ms: u64_field(media, "duration_ms"),
        alt_text: str_field(media, "alt_text"),
        preview_image_url: str_field(media, "preview_image_url"),
        views: media
            .get("public_metrics")
            .and_then(|m| u64_field(m, "view_count")),
        path: None,
        status,
        error: None,
    }
}

/// Highest-bitrate MP4 variant, falling back to the first variant with a URL.
fn best_variant_url(media: &Value) -> Option<String> {
    let variants: Vec<&Value> = array(media, "variants").collect();

    variants
        .iter()
        .filter(|v| {
            v.get("content_type")
                .and_then(Value::as_str)
                .is_some_and(|ct| ct.contains("video/mp4"))
        })
        .filter_map(|v| Some((u64_field(v, "bit_rate").unwrap_or(0), str_field(v, "url")?)))
        .max_by_key(|(bit_rate, _)| *bit_rate)
        .map(|(_, url)| url)
        .or_else(|| variants.iter().find_map(|v| str_field(v, "url")))
}

fn array<'a>(value: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// String field; numeric ids are accepted and stringified.
fn str_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn u64_field(value: &Value, key: &str) -> Option<u64> {
    match value.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn count(value: Option<&Value>, key: &str) -> u64 {
    value.and_then(|v| u64_field(v, key)).unwrap_or(0)
}

fn bool_field(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn date_field(value: &Value, key: &str) -> Option<DateTime<Utc>> {
    value
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
