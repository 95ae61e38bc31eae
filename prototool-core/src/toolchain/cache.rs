//! # Binary Cache
//!
//! Maps a [`CacheKey`] to a verified, executable `protoc` on disk.
//!
//! ## Layout
//!
//! ```text
//! <root>/protoc/<version>/<os>-<arch>/protoc
//! <root>/protoc/<version>/<os>-<arch>/protoc.json   <- CacheEntry sidecar
//! ```
//!
//! A hit requires the sidecar to describe the requested key, the binary to be
//! present and executable, and its SHA-256 to match the sidecar. Anything else is
//! a miss and triggers a fresh download.
//!
//! Both files are written to a temporary path inside the key directory and
//! renamed into place, so concurrent readers never observe a half-written
//! binary. Concurrent writers of the same key simply race, the last rename wins.
use super::download::{Fetch, FetchRequest, extract_executable};
use super::platform::{CacheKey, Platform, ToolchainVersion};
use super::{RetryPolicy, ToolchainError, fetch_with_retry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info, warn};

const CACHE_SUBDIR: &str = "protoc";
const SIDECAR_NAME: &str = "protoc.json";

/// The sidecar record stored next to every cached binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub version: ToolchainVersion,
    #[serde(flatten)]
    pub platform: Platform,
    /// Hex SHA-256 of the extracted executable.
    pub sha256: String,
    /// URL the archive was downloaded from.
    pub source: String,
    pub downloaded_at: DateTime<Utc>,
}

/// A ready-to-invoke compiler.
///
/// In no-cache mode the binary lives in a scratch directory owned by this value,
/// it is removed when the value is dropped.
#[derive(Debug)]
pub struct ProtocBinary {
    path: PathBuf,
    entry: CacheEntry,
    _scratch: Option<TempDir>,
}

impl ProtocBinary {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry(&self) -> &CacheEntry {
        &self.entry
    }
}

#[derive(Debug, Clone)]
enum Storage {
    Persistent(PathBuf),
    Ephemeral,
}

/// Resolves compiler binaries, downloading and caching them on a miss.
#[derive(Clone)]
pub struct BinaryCache {
    storage: Storage,
    fetcher: Arc<dyn Fetch>,
    url_override: Option<String>,
    expected_sha256: Option<String>,
    retry: RetryPolicy,
}

impl BinaryCache {
    /// A cache persisted under `root`.
    pub fn persistent(root: impl Into<PathBuf>, fetcher: Arc<dyn Fetch>) -> Self {
        Self::new(Storage::Persistent(root.into()), fetcher)
    }

    /// A cache that never touches persistent storage.
    ///
    /// Every resolution downloads into a scratch directory that lives as long as
    /// the returned [`ProtocBinary`].
    pub fn ephemeral(fetcher: Arc<dyn Fetch>) -> Self {
        Self::new(Storage::Ephemeral, fetcher)
    }

    fn new(storage: Storage, fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            storage,
            fetcher,
            url_override: None,
            expected_sha256: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Downloads from this exact URL instead of the release naming convention.
    pub fn with_url_override(mut self, url: Option<String>) -> Self {
        self.url_override = url;
        self
    }

    /// Expected hex SHA-256 of the downloaded archive.
    pub fn with_expected_sha256(mut self, sha256: Option<String>) -> Self {
        self.expected_sha256 = sha256.map(|s| s.to_ascii_lowercase());
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The platform cache directory, e.g. `~/.cache/prototool` on Linux.
    pub fn default_root() -> Result<PathBuf, ToolchainError> {
        directories::ProjectDirs::from("", "", "prototool")
            .map(|dirs| dirs.cache_dir().to_path_buf())
            .ok_or(ToolchainError::NoCacheDir)
    }

    /// Returns a runnable compiler for `key`, downloading it if needed.
    pub async fn resolve(&self, key: &CacheKey) -> Result<ProtocBinary, ToolchainError> {
        match &self.storage {
            Storage::Persistent(root) => {
                let dir = root.join(CACHE_SUBDIR).join(key.relative_dir());

                if let Some(entry) = verified_hit(&dir, key) {
                    debug!(%key, dir = %dir.display(), "protoc cache hit");
                    return Ok(ProtocBinary {
                        path: dir.join(key.platform.executable_name()),
                        entry,
                        _scratch: None,
                    });
                }

                info!(%key, "protoc cache miss, downloading");
                let (archive, source) = self.download(key).await?;
                let key = key.clone();
                let binary = tokio::task::spawn_blocking(move || {
                    install(&dir, &key, &archive, source).map(|(path, entry)| ProtocBinary {
                        path,
                        entry,
                        _scratch: None,
                    })
                })
                .await??;

                Ok(binary)
            }
            Storage::Ephemeral => {
                debug!(%key, "no-cache mode, downloading to a scratch directory");
                let (archive, source) = self.download(key).await?;
                let key = key.clone();
                let binary = tokio::task::spawn_blocking(move || {
                    let scratch = tempfile::Builder::new().prefix("prototool-").tempdir()?;
                    let (path, entry) = install(scratch.path(), &key, &archive, source)?;
                    Ok::<_, ToolchainError>(ProtocBinary {
                        path,
                        entry,
                        _scratch: Some(scratch),
                    })
                })
                .await??;

                Ok(binary)
            }
        }
    }

    /// Removes every cached binary and its record.
    ///
    /// Succeeds when there is nothing to remove, including a missing cache root.
    pub fn clean(&self) -> Result<(), ToolchainError> {
        let Storage::Persistent(root) = &self.storage else {
            return Ok(());
        };

        let dir = root.join(CACHE_SUBDIR);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(dir = %dir.display(), "protoc cache cleaned");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn download(&self, key: &CacheKey) -> Result<(Vec<u8>, String), ToolchainError> {
        let request = FetchRequest::new(key.clone(), self.url_override.as_deref())?;
        let archive = fetch_with_retry(self.fetcher.as_ref(), &request, self.retry).await?;

        if let Some(expected) = &self.expected_sha256 {
            let actual = sha256_hex(&archive);
            if &actual != expected {
                return Err(ToolchainError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        Ok((archive, request.url))
    }
}

/// Reads the sidecar in `dir` and checks it against `key` and the binary on disk.
fn verified_hit(dir: &Path, key: &CacheKey) -> Option<CacheEntry> {
    let sidecar = dir.join(SIDECAR_NAME);
    let binary = dir.join(key.platform.executable_name());

    let raw = fs::read(&sidecar).ok()?;
    let entry: CacheEntry = match serde_json::from_slice(&raw) {
        Ok(entry) => entry,
        Err(err) => {
            warn!(path = %sidecar.display(), error = %err, "unreadable cache record, ignoring");
            return None;
        }
    };

    if entry.version != key.version || entry.platform != key.platform {
        return None;
    }

    if !is_executable(&binary) {
        debug!(path = %binary.display(), "cached protoc missing or not executable");
        return None;
    }

    match file_sha256(&binary) {
        Ok(actual) if actual == entry.sha256 => Some(entry),
        Ok(actual) => {
            warn!(
                path = %binary.display(),
                expected = %entry.sha256,
                %actual,
                "cached protoc does not match its record, discarding"
            );
            None
        }
        Err(err) => {
            warn!(path = %binary.display(), error = %err, "failed to hash cached protoc");
            None
        }
    }
}

/// Extracts the executable from `archive` and commits it plus its record into `dir`.
fn install(
    dir: &Path,
    key: &CacheKey,
    archive: &[u8],
    source: String,
) -> Result<(PathBuf, CacheEntry), ToolchainError> {
    let executable = extract_executable(archive, &key.platform)?;

    let entry = CacheEntry {
        version: key.version.clone(),
        platform: key.platform,
        sha256: sha256_hex(&executable),
        source,
        downloaded_at: Utc::now(),
    };

    fs::create_dir_all(dir)?;

    let path = dir.join(key.platform.executable_name());
    write_atomic(dir, &path, &executable, true)?;
    write_atomic(dir, &dir.join(SIDECAR_NAME), &serde_json::to_vec_pretty(&entry)?, false)?;

    debug!(path = %path.display(), sha256 = %entry.sha256, "protoc installed");
    Ok((path, entry))
}

/// Writes `contents` to a temporary file in `dir` then renames it onto `target`.
///
/// If anything fails before the rename the temporary file is removed on drop.
fn write_atomic(
    dir: &Path,
    target: &Path,
    contents: &[u8],
    executable: bool,
) -> Result<(), ToolchainError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;

    if executable {
        set_executable(tmp.path())?;
    }

    tmp.persist(target).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn file_sha256(path: &Path) -> io::Result<String> {
    let mut file = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}
