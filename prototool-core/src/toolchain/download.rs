//! # Compiler Downloader
//!
//! Fetches protoc release archives and pulls the single compiler executable out
//! of them.
//!
//! The network part sits behind the [`Fetch`] trait so the cache can be driven by
//! an in-memory source in tests. [`HttpFetcher`] is the real implementation and
//! talks to GitHub Releases, or to an exact override URL when one is configured.
use super::ToolchainError;
use super::platform::{CacheKey, Platform, ToolchainVersion};
use async_trait::async_trait;
use std::io::{Cursor, Read};
use std::time::Duration;
use tracing::debug;

const RELEASES_BASE_URL: &str = "https://github.com/protocolbuffers/protobuf/releases/download";

/// Largest compiler executable accepted from an archive.
const MAX_EXECUTABLE_SIZE: u64 = 256 * 1024 * 1024;

/// Where an archive should be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub key: CacheKey,
    pub url: String,
}

impl FetchRequest {
    /// Builds the request for `key`.
    ///
    /// With `url_override` set, that exact location is used and the
    /// version-based naming convention is skipped entirely.
    pub fn new(key: CacheKey, url_override: Option<&str>) -> Result<Self, ToolchainError> {
        let url = match url_override {
            Some(url) => url.to_string(),
            None => release_url(&key.version, &key.platform)?,
        };
        Ok(Self { key, url })
    }
}

/// Something that can turn a [`FetchRequest`] into archive bytes.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, ToolchainError>;
}

/// Downloads archives over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ToolchainError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .user_agent(concat!("prototool/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ToolchainError::HttpClient)?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, ToolchainError> {
        debug!(url = %request.url, "downloading protoc archive");

        let network = |source| ToolchainError::Network {
            url: request.url.clone(),
            source,
        };

        let response = self
            .client
            .get(&request.url)
            .send()
            .await
            .map_err(network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolchainError::HttpStatus {
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(network)?;
        Ok(bytes.to_vec())
    }
}

/// Builds the GitHub Releases URL for a protoc version and platform.
///
/// e.g. `.../download/v29.3/protoc-29.3-linux-x86_64.zip`
pub fn release_url(
    version: &ToolchainVersion,
    platform: &Platform,
) -> Result<String, ToolchainError> {
    let label = platform
        .release_label()
        .ok_or(ToolchainError::UnsupportedPlatform(*platform))?;

    Ok(format!(
        "{RELEASES_BASE_URL}/v{version}/protoc-{version}-{label}.zip"
    ))
}

/// Extracts the compiler executable from a release archive.
///
/// Only the `bin/<executable>` member is read; every other member (includes,
/// readme) is ignored.
pub fn extract_executable(archive: &[u8], platform: &Platform) -> Result<Vec<u8>, ToolchainError> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))?;
    let wanted = format!("bin/{}", platform.executable_name());

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        if !entry.is_file() {
            continue;
        }

        let name = entry.name().replace('\\', "/");
        if name == wanted || name.ends_with(&format!("/{wanted}")) {
            if entry.size() > MAX_EXECUTABLE_SIZE {
                return Err(ToolchainError::ExecutableTooLarge {
                    name,
                    size: entry.size(),
                    limit: MAX_EXECUTABLE_SIZE,
                });
            }

            // The declared size is untrusted, so the read is bounded as well
            let mut bytes = Vec::new();
            entry.take(MAX_EXECUTABLE_SIZE).read_to_end(&mut bytes)?;
            return Ok(bytes);
        }
    }

    Err(ToolchainError::MissingExecutable(wanted))
}
