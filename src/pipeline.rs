//! Fetch-and-persist pipeline.
//!
//! One run resolves a request to posts, downloads their media through a
//! bounded pool, and writes one metadata record per post. Records are written
//! in retrieval order, each only after all of that post's downloads resolved.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::MetadataFormat;
use crate::constants::{DEFAULT_DOWNLOAD_CONCURRENCY, MEDIA_DIR_NAME};
use crate::error::PipelineError;
use crate::media::{media_path, MediaDownloadError, MediaDownloader};
use crate::metadata::MetadataWriter;
use crate::model::{DownloadStatus, Post};
use crate::normalize::{extract_post_id, normalize_post};
use crate::source::{PostSource, RawPost};

/// Settings for one pipeline instance.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub output_dir: PathBuf,
    /// Maximum media downloads in flight across the whole run.
    pub download_concurrency: usize,
    /// Per-request timeout for media downloads.
    pub request_timeout: Duration,
    pub metadata_format: MetadataFormat,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            download_concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
            request_timeout: Duration::from_secs(30),
            metadata_format: MetadataFormat::default(),
        }
    }
}

/// What to fetch. The two modes are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchRequest {
    /// Free-text search, bounded to `limit` posts.
    Search { query: String, limit: usize },
    /// A single post URL or numeric id.
    Lookup { target: String },
}

impl FetchRequest {
    #[must_use]
    pub fn search(query: impl Into<String>, limit: usize) -> Self {
        Self::Search {
            query: query.into(),
            limit,
        }
    }

    #[must_use]
    pub fn lookup(target: impl Into<String>) -> Self {
        Self::Lookup {
            target: target.into(),
        }
    }

    fn validate(&self) -> Result<Target, PipelineError> {
        match self {
            Self::Search { query, limit } => {
                let query = query.trim();
                if query.is_empty() {
                    return Err(PipelineError::Validation(
                        "search query cannot be empty".to_string(),
                    ));
                }
                if *limit == 0 {
                    return Err(PipelineError::Validation(
                        "limit must be at least 1".to_string(),
                    ));
                }
                Ok(Target::Search {
                    query: query.to_string(),
                    limit: *limit,
                })
            }
            Self::Lookup { target } => extract_post_id(target)
                .map(|id| Target::Lookup { id })
                .ok_or_else(|| {
                    PipelineError::Validation(format!(
                        "not a post URL or numeric id: '{}'",
                        target.trim()
                    ))
                }),
        }
    }
}

/// A validated request.
enum Target {
    Search { query: String, limit: usize },
    Lookup { id: String },
}

/// Progress of a single run. Runs are not resumable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    NotStarted,
    Fetching,
    Normalizing,
    Downloading,
    Writing,
    Done,
}

impl Stage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Fetching => "fetching",
            Self::Normalizing => "normalizing",
            Self::Downloading => "downloading",
            Self::Writing => "writing",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of one run.
#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    /// Posts in retrieval order, with final media statuses.
    pub posts: Vec<Post>,
    pub media_attempted: usize,
    pub media_succeeded: usize,
    pub media_failed: usize,
    pub metadata_path: PathBuf,
}

type DownloadHandle = JoinHandle<Result<u64, MediaDownloadError>>;

/// In-flight downloads for one post, keyed by media index.
///
/// Dropping it aborts whatever is still running, which only happens when a
/// run bails out with a fatal error.
#[derive(Default)]
struct PostDownloads {
    handles: Vec<(usize, DownloadHandle)>,
}

impl Drop for PostDownloads {
    fn drop(&mut self) {
        for (_, handle) in &self.handles {
            handle.abort();
        }
    }
}

pub struct Pipeline {
    source: Arc<dyn PostSource>,
    downloader: MediaDownloader,
    semaphore: Arc<Semaphore>,
    options: PipelineOptions,
}

impl Pipeline {
    /// Create a pipeline reading from `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if the download client cannot be built.
    pub fn new(source: Arc<dyn PostSource>, options: PipelineOptions) -> Result<Self, PipelineError> {
        let downloader =
            MediaDownloader::new(options.request_timeout).map_err(PipelineError::HttpClient)?;
        let semaphore = Arc::new(Semaphore::new(options.download_concurrency.max(1)));

        Ok(Self {
            source,
            downloader,
            semaphore,
            options,
        })
    }

    #[must_use]
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Execute one fetch-and-persist run.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Validation`] for bad input (before any
    /// network call), [`PipelineError::Upstream`] if the source fails, and
    /// [`PipelineError::Persistence`] if output cannot be written. Media
    /// download failures are counted in the result instead.
    pub async fn run(&self, request: FetchRequest) -> Result<FetchResult, PipelineError> {
        log_stage(Stage::NotStarted);
        let target = request.validate()?;

        let output_dir = &self.options.output_dir;
        let media_dir = output_dir.join(MEDIA_DIR_NAME);
        tokio::fs::create_dir_all(&media_dir)
            .await
            .map_err(PipelineError::persistence(&media_dir))?;

        log_stage(Stage::Fetching);
        let source_id = self.source.source_id();
        let (raw, limit) = match &target {
            Target::Search { query, limit } => {
                info!(source = source_id, query = %query, limit, "Searching posts");
                (self.source.search(query, *limit).await?, Some(*limit))
            }
            Target::Lookup { id } => {
                info!(source = source_id, post_id = %id, "Looking up post");
                (self.source.fetch(id).await?, None)
            }
        };

        log_stage(Stage::Normalizing);
        let mut posts = normalize_batch(&raw, limit);
        info!(
            received = raw.len(),
            kept = posts.len(),
            "Normalized posts"
        );

        let mut writer =
            MetadataWriter::create(output_dir, self.options.metadata_format).await?;

        log_stage(Stage::Downloading);
        let mut pending: Vec<PostDownloads> =
            posts.iter_mut().map(|post| self.spawn_downloads(post)).collect();
        let media_attempted: usize = pending.iter().map(|p| p.handles.len()).sum();
        debug!(media_attempted, "Spawned media downloads");

        log_stage(Stage::Writing);
        let mut media_succeeded = 0;
        let mut media_failed = 0;
        for (post, downloads) in posts.iter_mut().zip(pending.iter_mut()) {
            for (index, handle) in &mut downloads.handles {
                let item = &mut post.media[*index];
                match handle.await {
                    Ok(Ok(_bytes)) => {
                        item.status = DownloadStatus::Success;
                        media_succeeded += 1;
                    }
                    Ok(Err(e)) => {
                        warn!(
                            post_id = %post.id,
                            url = item.url.as_deref().unwrap_or_default(),
                            error = %e,
                            "Media download failed"
                        );
                        item.status = DownloadStatus::Failed;
                        item.error = Some(e.to_string());
                        media_failed += 1;
                    }
                    Err(e) => {
                        error!(post_id = %post.id, "Download task panicked: {e}");
                        item.status = DownloadStatus::Failed;
                        item.error = Some(format!("download task failed: {e}"));
                        media_failed += 1;
                    }
                }
            }
            downloads.handles.clear();
            writer.append(post).await?;
        }

        let metadata_path = writer.finish().await?;
        log_stage(Stage::Done);

        info!(
            posts = posts.len(),
            media_attempted,
            media_succeeded,
            media_failed,
            metadata = %metadata_path.display(),
            "Run complete"
        );

        Ok(FetchResult {
            posts,
            media_attempted,
            media_succeeded,
            media_failed,
            metadata_path,
        })
    }

    /// Assign destinations and spawn a download task per downloadable item.
    fn spawn_downloads(&self, post: &mut Post) -> PostDownloads {
        let mut downloads = PostDownloads::default();

        for (index, item) in post.media.iter_mut().enumerate() {
            let Some(url) = item.url.clone() else {
                continue;
            };
            if item.status != DownloadStatus::Pending {
                continue;
            }

            let relative = media_path(&post.id, index, &url, item.kind);
            let dest = self.options.output_dir.join(&relative);
            item.path = Some(relative);

            let semaphore = Arc::clone(&self.semaphore);
            let downloader = self.downloader.clone();
            let handle = tokio::spawn(async move {
                // The semaphore is never closed, so this always yields a permit.
                let _permit = semaphore.acquire_owned().await;
                downloader.download(&url, &dest).await
            });
            downloads.handles.push((index, handle));
        }

        downloads
    }
}

/// Normalize, drop duplicate ids (first occurrence wins), and apply the limit.
fn normalize_batch(raw: &[RawPost], limit: Option<usize>) -> Vec<Post> {
    let mut seen = HashSet::new();
    let mut posts = Vec::with_capacity(raw.len());

    for post in raw.iter().filter_map(normalize_post) {
        if limit.is_some_and(|l| posts.len() >= l) {
            break;
        }
        if !seen.insert(post.id.clone()) {
            debug!(post_id = %post.id, "Skipping duplicate post");
            continue;
        }
        posts.push(post);
    }

    posts
}

fn log_stage(stage: Stage) {
    debug!(stage = %stage, "Pipeline stage");
}
