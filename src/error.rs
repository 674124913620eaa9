use std::path::PathBuf;

use thiserror::Error;

use crate::source::SourceError;

/// Fatal pipeline errors. Media download failures never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad input, rejected before any network call.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The post source failed (auth, quota, network).
    #[error("upstream error: {0}")]
    Upstream(#[from] SourceError),

    /// Writing output files failed.
    #[error("failed to write {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize metadata: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

impl PipelineError {
    pub(crate) fn persistence(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Persistence { path, source }
    }
}
