//! # Toolchain
//!
//! Everything needed to end up with a runnable `protoc` binary:
//!
//! * [`platform`]: picks the version and host platform, forming the [`CacheKey`].
//! * [`download`]: fetches release archives and extracts the executable.
//! * [`cache`]: the on-disk [`BinaryCache`] that ties both together.
pub mod cache;
pub mod download;
pub mod platform;

pub use cache::{BinaryCache, CacheEntry, ProtocBinary};
pub use download::{Fetch, FetchRequest, HttpFetcher};
pub use platform::{CacheKey, Platform, PlatformError, ToolchainVersion};

use std::time::Duration;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error("protoc is not released for {}/{}", .0.os.as_str(), .0.arch.as_str())]
    UnsupportedPlatform(Platform),
    #[error("Failed to build the HTTP client: '{0}'")]
    HttpClient(#[source] reqwest::Error),
    #[error("Failed to download '{url}': '{source}'")]
    Network {
        url: String,
        source: reqwest::Error,
    },
    #[error("Download of '{url}' failed with HTTP status {status}")]
    HttpStatus { url: String, status: u16 },
    #[error("protoc is unavailable after {attempts} attempts: {last}")]
    Unavailable {
        attempts: u32,
        #[source]
        last: Box<ToolchainError>,
    },
    #[error("Checksum mismatch for downloaded archive: expected '{expected}', got '{actual}'")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("Invalid protoc archive: '{0}'")]
    Archive(#[from] zip::result::ZipError),
    #[error("Archive does not contain '{0}'")]
    MissingExecutable(String),
    #[error("Archive member '{name}' declares {size} bytes, more than the {limit} byte limit")]
    ExecutableTooLarge { name: String, size: u64, limit: u64 },
    #[error("Could not determine a cache directory, pass --cache-path")]
    NoCacheDir,
    #[error("Cache I/O error: '{0}'")]
    Io(#[from] std::io::Error),
    #[error("Invalid cache record: '{0}'")]
    Sidecar(#[from] serde_json::Error),
    #[error("Background task failed: '{0}'")]
    Join(#[from] tokio::task::JoinError),
}

impl ToolchainError {
    /// Whether retrying the same download could succeed.
    ///
    /// Only network-class failures qualify. A checksum mismatch never does.
    pub fn is_retryable(&self) -> bool {
        match self {
            ToolchainError::Network { .. } => true,
            ToolchainError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Bounded retry with exponential backoff for downloads.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2_u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Fetches `request`, retrying network failures according to `policy`.
///
/// Non-retryable errors are returned as-is on first occurrence. Exhausting the
/// attempts yields [`ToolchainError::Unavailable`] wrapping the last failure.
pub async fn fetch_with_retry(
    fetcher: &dyn Fetch,
    request: &FetchRequest,
    policy: RetryPolicy,
) -> Result<Vec<u8>, ToolchainError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match fetcher.fetch(request).await {
            Ok(bytes) => return Ok(bytes),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) if attempt >= attempts => {
                return Err(ToolchainError::Unavailable {
                    attempts,
                    last: Box::new(err),
                });
            }
            Err(err) => {
                let delay = policy.backoff(attempt);
                warn!(
                    url = %request.url,
                    attempt,
                    attempts,
                    ?delay,
                    error = %err,
                    "protoc download failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
