//! Shared constants used across the application.

/// User agent string sent with API and media requests.
pub const USER_AGENT: &str = concat!("xlytics/", env!("CARGO_PKG_VERSION"));

/// Base URL of the X API v2.
pub const DEFAULT_API_BASE_URL: &str = "https://api.twitter.com";

/// Canonical public URL prefix for a post.
pub const POST_URL_PREFIX: &str = "https://x.com/i/status/";

/// Subdirectory of the output directory that holds downloaded media.
pub const MEDIA_DIR_NAME: &str = "media";

/// Default number of media downloads in flight at once.
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 4;

/// The search endpoint rejects page sizes outside this range.
pub const SEARCH_PAGE_MIN: usize = 10;
pub const SEARCH_PAGE_MAX: usize = 100;
