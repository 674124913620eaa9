//! Xlytics library.
//!
//! Fetches X (Twitter) posts by search query or post URL, downloads their
//! attached media, and writes normalized metadata to disk.

pub mod config;
pub mod constants;
pub mod error;
pub mod media;
pub mod metadata;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod retry;
pub mod source;

pub use error::PipelineError;
pub use model::{DownloadStatus, MediaItem, MediaKind, Post};
pub use pipeline::{FetchRequest, FetchResult, Pipeline, PipelineOptions, Stage};
pub use source::{PostSource, RawPost, SourceError, TwitterClient};
