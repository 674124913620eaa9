//! Metadata output.
//!
//! Only the pipeline's coordinating task owns a [`MetadataWriter`], so
//! appends are never interleaved.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::MetadataFormat;
use crate::error::PipelineError;
use crate::model::Post;

pub struct MetadataWriter {
    path: PathBuf,
    sink: Sink,
    written: usize,
}

enum Sink {
    /// Each record is appended and flushed immediately.
    Lines(tokio::fs::File),
    /// Records are held until `finish` writes the whole array.
    Array(Vec<Post>),
}

impl MetadataWriter {
    /// Create (or truncate) the metadata file in `output_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Persistence`] if the file cannot be created.
    pub async fn create(output_dir: &Path, format: MetadataFormat) -> Result<Self, PipelineError> {
        let path = output_dir.join(format.file_name());

        // Truncated in both modes; records from a previous run must not survive.
        let file = tokio::fs::File::create(&path)
            .await
            .map_err(PipelineError::persistence(&path))?;

        let sink = match format {
            MetadataFormat::JsonLines => Sink::Lines(file),
            MetadataFormat::Json => Sink::Array(Vec::new()),
        };

        debug!(path = %path.display(), ?format, "Opened metadata file");
        Ok(Self {
            path,
            sink,
            written: 0,
        })
    }

    /// Record one post.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn append(&mut self, post: &Post) -> Result<(), PipelineError> {
        match &mut self.sink {
            Sink::Lines(file) => {
                let mut line = serde_json::to_vec(post)?;
                line.push(b'\n');
                file.write_all(&line)
                    .await
                    .map_err(PipelineError::persistence(&self.path))?;
                file.flush()
                    .await
                    .map_err(PipelineError::persistence(&self.path))?;
            }
            Sink::Array(posts) => posts.push(post.clone()),
        }
        self.written += 1;
        debug!(post_id = %post.id, "Wrote metadata record");
        Ok(())
    }

    /// Flush remaining output and return the file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the final write fails.
    pub async fn finish(self) -> Result<PathBuf, PipelineError> {
        match self.sink {
            Sink::Lines(file) => {
                file.sync_all()
                    .await
                    .map_err(PipelineError::persistence(&self.path))?;
            }
            Sink::Array(posts) => {
                let json = serde_json::to_vec_pretty(&posts)?;
                tokio::fs::write(&self.path, json)
                    .await
                    .map_err(PipelineError::persistence(&self.path))?;
            }
        }
        info!(path = %self.path.display(), records = self.written, "Saved metadata");
        Ok(self.path)
    }
}
