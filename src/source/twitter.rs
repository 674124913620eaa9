use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{PostSource, RawPost, SourceError};
use crate::config::{Config, RetryConfig};
use crate::constants::{SEARCH_PAGE_MAX, SEARCH_PAGE_MIN, USER_AGENT};
use crate::retry::with_retry;

const EXPANSIONS: &str = "attachments.media_keys,author_id,referenced_tweets.id";

const TWEET_FIELDS: &str = "created_at,public_metrics,entities,context_annotations,\
conversation_id,lang,possibly_sensitive,reply_settings,source,withheld,text,attachments";

const MEDIA_FIELDS: &str =
    "type,url,duration_ms,height,width,alt_text,preview_image_url,public_metrics,variants";

const USER_FIELDS: &str =
    "name,username,verified,profile_image_url,public_metrics,description,location,created_at,protected";

/// Envelope shared by the v2 lookup and search endpoints.
#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    /// An object for single lookups, an array for search.
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    includes: Includes,
    #[serde(default)]
    meta: Option<Meta>,
    #[serde(default)]
    errors: Vec<ApiProblem>,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    media: Vec<Value>,
    #[serde(default)]
    users: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiProblem {
    title: Option<String>,
    detail: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl ApiProblem {
    fn is_not_found(&self) -> bool {
        self.kind
            .as_deref()
            .is_some_and(|k| k.ends_with("resource-not-found"))
            || self.title.as_deref() == Some("Not Found Error")
    }

    fn describe(&self) -> String {
        self.detail
            .clone()
            .or_else(|| self.title.clone())
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

/// Client for the X (Twitter) API v2 using app-only bearer auth.
pub struct TwitterClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
    /// Backoff applied to rate limits and transient failures. `None` fails fast.
    retry: Option<RetryConfig>,
}

impl TwitterClient {
    /// Build a client from application configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &Config) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .build()?;

        info!(
            base_url = %config.api_base_url,
            sleep_on_rate_limit = config.sleep_on_rate_limit,
            "Initializing X API client"
        );

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            bearer_token: config.bearer_token.clone(),
            retry: config.sleep_on_rate_limit.then(|| config.retry.clone()),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<ApiResponse, SourceError> {
        match &self.retry {
            Some(retry) => with_retry(retry, || self.get_once(path, query)).await,
            None => self.get_once(path, query).await,
        }
    }

    async fn get_once(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<ApiResponse, SourceError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "Requesting X API");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.bearer_token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body = response.text().await?;
            return serde_json::from_str(&body).map_err(|e| SourceError::Decode(e.to_string()));
        }

        Err(status_error(status, response).await)
    }

    fn common_fields() -> Vec<(&'static str, String)> {
        vec![
            ("expansions", EXPANSIONS.to_string()),
            ("tweet.fields", TWEET_FIELDS.to_string()),
            ("media.fields", MEDIA_FIELDS.to_string()),
            ("user.fields", USER_FIELDS.to_string()),
        ]
    }
}

#[async_trait]
impl PostSource for TwitterClient {
    fn source_id(&self) -> &'static str {
        "twitter"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<RawPost>, SourceError> {
        info!(query = %query, limit, "Searching recent posts");

        let mut posts = Vec::new();
        let mut next_token: Option<String> = None;

        while posts.len() < limit {
            let page_size = (limit - posts.len()).clamp(SEARCH_PAGE_MIN, SEARCH_PAGE_MAX);
            let mut params = Self::common_fields();
            params.push(("query", query.to_string()));
            params.push(("max_results", page_size.to_string()));
            if let Some(token) = next_token.take() {
                params.push(("next_token", token));
            }

            let page = self.get("/2/tweets/search/recent", &params).await?;
            let next = page.meta.as_ref().and_then(|m| m.next_token.clone());
            let batch = assemble_posts(page)?;

            debug!(count = batch.len(), has_more = next.is_some(), "Received search page");
            if batch.is_empty() {
                break;
            }
            posts.extend(batch);

            match next {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        posts.truncate(limit);
        info!(count = posts.len(), "Search complete");
        Ok(posts)
    }

    async fn fetch(&self, id: &str) -> Result<Vec<RawPost>, SourceError> {
        info!(post_id = %id, "Fetching post");

        let response = self
            .get(&format!("/2/tweets/{id}"), &Self::common_fields())
            .await?;

        if response.data.is_none() {
            if response.errors.iter().any(ApiProblem::is_not_found) {
                return Err(SourceError::NotFound(id.to_string()));
            }
            if let Some(problem) = response.errors.first() {
                return Err(SourceError::Api {
                    status: StatusCode::OK.as_u16(),
                    message: problem.describe(),
                });
            }
        }

        assemble_posts(response)
    }
}

/// Map a non-success response onto the error taxonomy.
async fn status_error(status: StatusCode, response: Response) -> SourceError {
    let retry_after = rate_limit_wait(response.headers());
    let message = response
        .text()
        .await
        .map(|body| body.trim().chars().take(500).collect::<String>())
        .unwrap_or_default();

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::Auth {
            status: status.as_u16(),
            message,
        },
        StatusCode::TOO_MANY_REQUESTS => {
            warn!(retry_after = ?retry_after, "X API rate limit hit");
            SourceError::RateLimited { retry_after }
        }
        _ => SourceError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

/// Read how long to wait from `retry-after` or `x-rate-limit-reset` (epoch seconds).
fn rate_limit_wait(headers: &header::HeaderMap) -> Option<Duration> {
    let as_u64 = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };

    if let Some(secs) = as_u64(header::RETRY_AFTER.as_str()) {
        return Some(Duration::from_secs(secs));
    }

    let reset = as_u64("x-rate-limit-reset")?;
    let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
    Some(Duration::from_secs(reset.saturating_sub(now)))
}

/// Join each post with its expanded media and author objects.
fn assemble_posts(response: ApiResponse) -> Result<Vec<RawPost>, SourceError> {
    let tweets = match response.data {
        None => Vec::new(),
        Some(Value::Array(items)) => items,
        Some(obj @ Value::Object(_)) => vec![obj],
        Some(other) => {
            return Err(SourceError::Decode(format!(
                "unexpected data field: {other}"
            )))
        }
    };

    let media_by_key: HashMap<&str, &Value> = response
        .includes
        .media
        .iter()
        .filter_map(|m| m.get("media_key").and_then(Value::as_str).map(|k| (k, m)))
        .collect();
    let users_by_id: HashMap<&str, &Value> = response
        .includes
        .users
        .iter()
        .filter_map(|u| u.get("id").and_then(Value::as_str).map(|id| (id, u)))
        .collect();

    let posts = tweets
        .into_iter()
        .map(|data| {
            let media = data
                .pointer("/attachments/media_keys")
                .and_then(Value::as_array)
                .map(|keys| {
                    keys.iter()
                        .filter_map(Value::as_str)
                        .filter_map(|k| media_by_key.get(k).map(|m| (*m).clone()))
                        .collect()
                })
                .unwrap_or_default();
            let author = data
                .get("author_id")
                .and_then(Value::as_str)
                .and_then(|id| users_by_id.get(id))
                .map(|u| (*u).clone());

            RawPost {
                data,
                media,
                author,
            }
        })
        .collect();

    Ok(posts)
}
