//! Upstream post sources.
//!
//! The pipeline only sees the [`PostSource`] trait. Pagination, rate limiting
//! and authentication all live behind it.

mod twitter;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::retry::IsRetryable;

pub use twitter::TwitterClient;

/// A post as returned by the upstream API, before normalization.
///
/// Fields are kept as loose JSON so schema drift upstream only affects
/// [`crate::normalize`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPost {
    /// The post object itself.
    pub data: Value,
    /// Media objects attached to this post, in attachment order.
    #[serde(default)]
    pub media: Vec<Value>,
    /// The author's user object, when the API expanded it.
    #[serde(default)]
    pub author: Option<Value>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("upstream rejected credentials (HTTP {status}): {message}")]
    Auth { status: u16, message: String },
    #[error("upstream rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },
    #[error("post not found: {0}")]
    NotFound(String),
    #[error("upstream returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
    #[error("request to upstream failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("failed to decode upstream response: {0}")]
    Decode(String),
}

impl IsRetryable for SourceError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Network(e) => e.is_timeout() || e.is_connect(),
            Self::Auth { .. } | Self::NotFound(_) | Self::Decode(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// A source of posts, queried either by search or by a single identifier.
#[async_trait]
pub trait PostSource: Send + Sync {
    /// Short name used in logs.
    fn source_id(&self) -> &'static str;

    /// Search recent posts. Returns at most `limit` posts in upstream order.
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream request fails.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<RawPost>, SourceError>;

    /// Fetch a single post by its numeric identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream request fails or the post does not exist.
    async fn fetch(&self, id: &str) -> Result<Vec<RawPost>, SourceError>;
}
