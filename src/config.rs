use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::constants::{DEFAULT_API_BASE_URL, DEFAULT_DOWNLOAD_CONCURRENCY};
use crate::pipeline::PipelineOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // X API
    pub bearer_token: String,
    pub api_base_url: String,
    pub sleep_on_rate_limit: bool,
    pub retry: RetryConfig,

    // Output
    pub output_dir: PathBuf,
    pub metadata_format: MetadataFormat,

    // Downloads
    pub download_concurrency: usize,
    pub request_timeout: Duration,
}

/// Layout of the metadata file written for each run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetadataFormat {
    /// One compact JSON object per line, appended as each post completes
    #[default]
    JsonLines,
    /// A single pretty-printed JSON array written when the run finishes
    Json,
}

impl MetadataFormat {
    /// File name used for this format inside the output directory.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::JsonLines => "metadata.jsonl",
            Self::Json => "metadata.json",
        }
    }
}

/// Backoff settings for retrying transient upstream failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(15 * 60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // X API
            bearer_token: required_env("TWITTER_BEARER_TOKEN")?,
            api_base_url: env_or_default("TWITTER_API_BASE_URL", DEFAULT_API_BASE_URL),
            sleep_on_rate_limit: parse_env_bool("SLEEP_ON_RATE_LIMIT", true)?,
            retry: RetryConfig {
                max_attempts: parse_env_u32("RETRY_MAX_ATTEMPTS", 3)?,
                initial_delay: Duration::from_secs(parse_env_u64("RETRY_INITIAL_DELAY_SECS", 60)?),
                ..RetryConfig::default()
            },

            // Output
            output_dir: PathBuf::from(env_or_default("OUTPUT_NAME", "output")),
            metadata_format: parse_metadata_format(&env_or_default("METADATA_FORMAT", "jsonl"))?,

            // Downloads
            download_concurrency: parse_env_usize(
                "DOWNLOAD_CONCURRENCY",
                DEFAULT_DOWNLOAD_CONCURRENCY,
            )?,
            request_timeout: Duration::from_secs(parse_env_u64("REQUEST_TIMEOUT_SECS", 30)?),
        })
    }

    /// Configuration with defaults and a dummy token, for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            bearer_token: "test-token".to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            sleep_on_rate_limit: false,
            retry: RetryConfig {
                max_attempts: 0,
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                backoff_multiplier: 2.0,
                jitter: false,
            },
            output_dir: PathBuf::from("output"),
            metadata_format: MetadataFormat::JsonLines,
            download_concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
            request_timeout: Duration::from_secs(5),
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.download_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                name: "DOWNLOAD_CONCURRENCY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.bearer_token.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "TWITTER_BEARER_TOKEN".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if url::Url::parse(&self.api_base_url).is_err() {
            return Err(ConfigError::InvalidValue {
                name: "TWITTER_API_BASE_URL".to_string(),
                message: format!("not a valid URL: '{}'", self.api_base_url),
            });
        }
        Ok(())
    }

    /// Options handed to the fetch-and-persist pipeline.
    #[must_use]
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            output_dir: self.output_dir.clone(),
            download_concurrency: self.download_concurrency,
            request_timeout: self.request_timeout,
            metadata_format: self.metadata_format,
        }
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}

/// Parse a metadata format name (`jsonl` or `json`).
///
/// # Errors
///
/// Returns an error for any other value.
pub fn parse_metadata_format(value: &str) -> Result<MetadataFormat, ConfigError> {
    match value.to_lowercase().as_str() {
        "jsonl" | "jsonlines" | "ndjson" => Ok(MetadataFormat::JsonLines),
        "json" => Ok(MetadataFormat::Json),
        _ => Err(ConfigError::InvalidValue {
            name: "METADATA_FORMAT".to_string(),
            message: format!("must be 'jsonl' or 'json', got '{value}'"),
        }),
    }
}
