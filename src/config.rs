//! Upload settings read from the environment.

use std::ffi::OsString;
use std::iter::empty;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;

use crate::planner::DEFAULT_CHUNK_SIZE;
use crate::queue::DEFAULT_CONCURRENCY_LIMIT;
use crate::retry::{
    DEFAULT_COMPLETE_MAX_TRIES, DEFAULT_COMPLETE_RETRY_DELAY_MS, DEFAULT_PART_MAX_TRIES,
    DEFAULT_PART_RETRY_DELAY_MS,
};

/// Tuning knobs for an upload, each one overridable by an environment variable.
///
/// | Variable | Default |
/// |---|---|
/// | `UPLOAD_CHUNK_SIZE` | 7 MiB |
/// | `UPLOAD_CONCURRENCY` | 3 |
/// | `UPLOAD_PART_MAX_TRIES` | 5 |
/// | `UPLOAD_PART_RETRY_DELAY_MS` | 2000 |
/// | `UPLOAD_COMPLETE_MAX_TRIES` | 3 |
/// | `UPLOAD_COMPLETE_RETRY_DELAY_MS` | 1000 |
///
/// Values are not validated here. Zero sizes, limits and tries are rejected
/// with a [ConfigurationError](crate::error::ConfigurationError) when the
/// upload starts.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
pub struct UploadConfig {
    /// Size of each part in bytes.
    #[arg(long = "chunk-size", env = "UPLOAD_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,
    /// How many parts may be uploaded at once.
    #[arg(long = "concurrency", env = "UPLOAD_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY_LIMIT)]
    pub concurrency: usize,
    #[arg(long = "part-max-tries", env = "UPLOAD_PART_MAX_TRIES", default_value_t = DEFAULT_PART_MAX_TRIES)]
    pub part_max_tries: u32,
    #[arg(long = "part-retry-delay-ms", env = "UPLOAD_PART_RETRY_DELAY_MS", default_value_t = DEFAULT_PART_RETRY_DELAY_MS)]
    pub part_retry_delay_ms: u64,
    #[arg(long = "complete-max-tries", env = "UPLOAD_COMPLETE_MAX_TRIES", default_value_t = DEFAULT_COMPLETE_MAX_TRIES)]
    pub complete_max_tries: u32,
    #[arg(long = "complete-retry-delay-ms", env = "UPLOAD_COMPLETE_RETRY_DELAY_MS", default_value_t = DEFAULT_COMPLETE_RETRY_DELAY_MS)]
    pub complete_retry_delay_ms: u64,
}

impl UploadConfig {
    /// Read the configuration from the environment, falling back to the
    /// defaults for anything unset.
    ///
    /// ## Errors
    ///
    /// An error will be returned if a variable is set but can't be parsed.
    pub fn from_env() -> Result<Self> {
        UploadConfig::try_parse_from(empty::<OsString>())
            .context("An error occurred while parsing environment variables for upload config.")
    }

    pub fn part_retry_delay(&self) -> Duration {
        Duration::from_millis(self.part_retry_delay_ms)
    }

    pub fn complete_retry_delay(&self) -> Duration {
        Duration::from_millis(self.complete_retry_delay_ms)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_CONCURRENCY_LIMIT,
            part_max_tries: DEFAULT_PART_MAX_TRIES,
            part_retry_delay_ms: DEFAULT_PART_RETRY_DELAY_MS,
            complete_max_tries: DEFAULT_COMPLETE_MAX_TRIES,
            complete_retry_delay_ms: DEFAULT_COMPLETE_RETRY_DELAY_MS,
        }
    }
}
