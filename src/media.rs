//! Media file naming and downloading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::constants::{MEDIA_DIR_NAME, USER_AGENT};
use crate::model::MediaKind;

#[derive(Debug, Error)]
pub enum MediaDownloadError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server returned HTTP {0}")]
    Status(u16),
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// File stem for a post id.
///
/// Alphanumeric ids are used as-is. Anything else is hex-encoded behind an
/// `id-` prefix; the `-` keeps the two forms apart. Stems are never
/// truncated, so distinct ids never share one.
#[must_use]
pub fn id_file_stem(post_id: &str) -> String {
    if !post_id.is_empty() && post_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        post_id.to_string()
    } else {
        format!("id-{}", hex::encode(post_id))
    }
}

/// Extension from the URL path, if it looks like one.
fn url_extension(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    let (_, ext) = last.rsplit_once('.')?;
    let valid = (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_ascii_lowercase())
}

/// Relative destination for the `index`-th media item of a post.
///
/// Names are `media/<stem>_<index>.<ext>`. The stem never contains `_`, so
/// each `(post_id, index)` pair gets its own name.
#[must_use]
pub fn media_path(post_id: &str, index: usize, url: &str, kind: MediaKind) -> PathBuf {
    let ext = url_extension(url).unwrap_or_else(|| kind.default_extension().to_string());
    let stem = id_file_stem(post_id);
    Path::new(MEDIA_DIR_NAME).join(format!("{stem}_{index}.{ext}"))
}

/// Stream `response` into `part_path`, then move it to `dest`.
async fn write_body(
    response: reqwest::Response,
    part_path: &Path,
    dest: &Path,
) -> Result<u64, MediaDownloadError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| MediaDownloadError::Io { path, source }
    };

    let mut file = tokio::fs::File::create(part_path)
        .await
        .map_err(io_err(part_path))?;

    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await.map_err(io_err(part_path))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(io_err(part_path))?;
    drop(file);

    tokio::fs::rename(part_path, dest)
        .await
        .map_err(io_err(dest))?;
    Ok(written)
}

fn is_supported_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    mime.starts_with("image/") || mime.starts_with("video/") || mime == "application/octet-stream"
}

/// HTTP downloader for media files.
#[derive(Debug, Clone)]
pub struct MediaDownloader {
    client: reqwest::Client,
}

impl MediaDownloader {
    /// Create a downloader whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Download `url` to `dest`, returning the number of bytes written.
    ///
    /// The body is streamed to `<dest>.part` and renamed on success. On any
    /// failure the partial file is removed and nothing is left at `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure, a non-success status, a content
    /// type that isn't image, video or octet-stream, or a write failure.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<u64, MediaDownloadError> {
        debug!(url = %url, dest = %dest.display(), "Downloading media");

        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaDownloadError::Status(status.as_u16()));
        }

        if let Some(content_type) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !is_supported_content_type(content_type) {
                return Err(MediaDownloadError::UnsupportedContentType(
                    content_type.to_string(),
                ));
            }
        }

        let part_path = dest.with_extension(
            dest.extension()
                .map_or_else(|| "part".to_string(), |e| format!("{}.part", e.to_string_lossy())),
        );

        let written = match write_body(response, &part_path, dest).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(e);
            }
        };

        info!(url = %url, path = %dest.display(), bytes = written, "Downloaded media");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_file_stem_keeps_alphanumeric_ids() {
        assert_eq!(id_file_stem("1944517074384253256"), "1944517074384253256");
        assert_eq!(id_file_stem("abc123"), "abc123");
    }

    #[test]
    fn test_id_file_stem_encodes_other_ids() {
        assert_eq!(id_file_stem("a/b"), "id-612f62");
        assert_eq!(id_file_stem("a_b"), "id-615f62");
        assert_eq!(id_file_stem(""), "id-");
    }

    #[test]
    fn test_media_paths_distinct_for_lookalike_ids() {
        let url = "https://pbs.twimg.com/media/same.jpg";
        let ids = ["a/b", "a_b", "a__b", "a b", "a\\b", "ab"];
        let paths: std::collections::HashSet<PathBuf> = ids
            .iter()
            .map(|id| media_path(id, 0, url, MediaKind::Image))
            .collect();
        assert_eq!(paths.len(), ids.len());

        let long_a = format!("{}-x", "9".repeat(250));
        let long_b = format!("{}-y", "9".repeat(250));
        assert_ne!(
            media_path(&long_a, 0, url, MediaKind::Image),
            media_path(&long_b, 0, url, MediaKind::Image)
        );
    }

    #[test]
    fn test_media_paths_distinct_across_index_boundary() {
        let url = "https://pbs.twimg.com/media/x.jpg";
        assert_ne!(
            media_path("1_1", 0, url, MediaKind::Image),
            media_path("1", 10, url, MediaKind::Image)
        );
    }

    #[test]
    fn test_media_path_uses_url_extension() {
        assert_eq!(
            media_path("100", 0, "https://pbs.twimg.com/media/abc.png", MediaKind::Image),
            PathBuf::from("media/100_0.png")
        );
        assert_eq!(
            media_path(
                "100",
                1,
                "https://video.twimg.com/ext_tw_video/1/pu/vid/720x1280/x.mp4?tag=12",
                MediaKind::Video
            ),
            PathBuf::from("media/100_1.mp4")
        );
    }

    #[test]
    fn test_media_path_falls_back_to_kind() {
        assert_eq!(
            media_path("7", 2, "https://example.com/media/noext", MediaKind::Video),
            PathBuf::from("media/7_2.mp4")
        );
        assert_eq!(
            media_path("7", 3, "not a url", MediaKind::Image),
            PathBuf::from("media/7_3.jpg")
        );
    }

    #[test]
    fn test_media_paths_unique_per_index() {
        let url = "https://pbs.twimg.com/media/same.jpg";
        let a = media_path("5", 0, url, MediaKind::Image);
        let b = media_path("5", 1, url, MediaKind::Image);
        let c = media_path("6", 0, url, MediaKind::Image);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_supported_content_types() {
        assert!(is_supported_content_type("image/jpeg"));
        assert!(is_supported_content_type("video/mp4; codecs=avc1"));
        assert!(is_supported_content_type("application/octet-stream"));
        assert!(!is_supported_content_type("text/html; charset=utf-8"));
        assert!(!is_supported_content_type("application/json"));
    }

    #[tokio::test]
    async fn test_failed_rename_removes_part_file() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(b"jpegdata".to_vec(), "image/jpeg"))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        // A directory at the destination makes the final rename fail.
        let dest = dir.path().join("1_0.jpg");
        std::fs::create_dir(&dest).unwrap();

        let downloader = MediaDownloader::new(Duration::from_secs(5)).unwrap();
        let err = downloader
            .download(&format!("{}/a.jpg", server.uri()), &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, MediaDownloadError::Io { .. }));
        assert!(!dir.path().join("1_0.jpg.part").exists());
        assert!(dest.is_dir());
    }

    #[tokio::test]
    async fn test_failed_status_creates_no_files() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("2_0.jpg");
        let downloader = MediaDownloader::new(Duration::from_secs(5)).unwrap();
        let err = downloader
            .download(&format!("{}/gone.jpg", server.uri()), &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, MediaDownloadError::Status(404)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
