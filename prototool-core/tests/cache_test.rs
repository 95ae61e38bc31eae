use async_trait::async_trait;
use fake_fetch::{FakeFetch, PROTOC, archive};
use prototool_core::BinaryCache;
use prototool_core::toolchain::{
    CacheEntry, CacheKey, Fetch, FetchRequest, Platform, RetryPolicy, ToolchainError,
    ToolchainVersion,
};
use std::sync::Arc;
use std::time::Duration;


fn key() -> CacheKey {
    CacheKey::new(
        ToolchainVersion::parse("29.3").unwrap(),
        Platform::from_names("linux", "x86_64").unwrap(),
    )
}

fn fast_retries() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        initial_backoff: Duration::from_millis(1),
    }
}

#[tokio::test]
async fn test_second_resolve_is_a_cache_hit() {
    let root = tempfile::tempdir().unwrap();
    let fetcher = FakeFetch::new();
    let cache = BinaryCache::persistent(root.path(), fetcher.clone());

    let first = cache.resolve(&key()).await.unwrap();
    let second = cache.resolve(&key()).await.unwrap();

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(first.path(), second.path());
    assert_eq!(
        first.path(),
        root.path().join("protoc/29.3/linux-x86_64/protoc")
    );
    assert_eq!(std::fs::read(first.path()).unwrap(), PROTOC);

    // A fresh cache over the same root still hits
    let other = BinaryCache::persistent(root.path(), fetcher.clone());
    other.resolve(&key()).await.unwrap();
    assert_eq!(fetcher.calls(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_installed_binary_is_executable() {
    use std::os::unix::fs::PermissionsExt;

    let root = tempfile::tempdir().unwrap();
    let binary = BinaryCache::persistent(root.path(), FakeFetch::new())
        .resolve(&key())
        .await
        .unwrap();

    let mode = std::fs::metadata(binary.path()).unwrap().permissions().mode();
    assert_ne!(mode & 0o111, 0);
}

#[tokio::test]
async fn test_sidecar_records_the_binary() {
    let root = tempfile::tempdir().unwrap();
    let binary = BinaryCache::persistent(root.path(), FakeFetch::new())
        .resolve(&key())
        .await
        .unwrap();

    let sidecar = root.path().join("protoc/29.3/linux-x86_64/protoc.json");
    let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&sidecar).unwrap()).unwrap();
    assert_eq!(raw["version"], "29.3");
    assert_eq!(raw["os"], "linux");
    assert_eq!(raw["arch"], "x86_64");

    let entry: CacheEntry = serde_json::from_value(raw).unwrap();
    assert_eq!(&entry, binary.entry());
    assert!(entry.source.ends_with("/v29.3/protoc-29.3-linux-x86_64.zip"));
}

#[tokio::test]
async fn test_corrupted_sidecar_triggers_a_download() {
    let root = tempfile::tempdir().unwrap();
    let fetcher = FakeFetch::new();
    let cache = BinaryCache::persistent(root.path(), fetcher.clone());

    cache.resolve(&key()).await.unwrap();

    let sidecar = root.path().join("protoc/29.3/linux-x86_64/protoc.json");
    let mut entry: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&sidecar).unwrap()).unwrap();
    entry["sha256"] = serde_json::json!("0".repeat(64));
    std::fs::write(&sidecar, serde_json::to_vec(&entry).unwrap()).unwrap();

    cache.resolve(&key()).await.unwrap();
    assert_eq!(fetcher.calls(), 2);

    // Garbage is treated the same way
    std::fs::write(&sidecar, b"not json").unwrap();
    cache.resolve(&key()).await.unwrap();
    assert_eq!(fetcher.calls(), 3);

    // And the rewritten record is valid again
    cache.resolve(&key()).await.unwrap();
    assert_eq!(fetcher.calls(), 3);
}

#[tokio::test]
async fn test_missing_binary_triggers_a_download() {
    let root = tempfile::tempdir().unwrap();
    let fetcher = FakeFetch::new();
    let cache = BinaryCache::persistent(root.path(), fetcher.clone());

    let binary = cache.resolve(&key()).await.unwrap();
    std::fs::remove_file(binary.path()).unwrap();

    let binary = cache.resolve(&key()).await.unwrap();
    assert_eq!(fetcher.calls(), 2);
    assert!(binary.path().is_file());
}

#[tokio::test]
async fn test_no_cache_downloads_every_time() {
    let fetcher = FakeFetch::new();
    let cache = BinaryCache::ephemeral(fetcher.clone());

    let first = cache.resolve(&key()).await.unwrap();
    let first_path = first.path().to_path_buf();
    assert!(first_path.is_file());
    drop(first);
    assert!(!first_path.exists(), "scratch binary is discarded with its handle");

    cache.resolve(&key()).await.unwrap();
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_checksum_mismatch_is_fatal_and_not_retried() {
    let root = tempfile::tempdir().unwrap();
    let fetcher = FakeFetch::new();
    let cache = BinaryCache::persistent(root.path(), fetcher.clone())
        .with_expected_sha256(Some("ab".repeat(32)))
        .with_retry_policy(fast_retries());

    let result = cache.resolve(&key()).await;

    assert!(matches!(result, Err(ToolchainError::ChecksumMismatch { .. })));
    assert_eq!(fetcher.calls(), 1);
    assert!(!root.path().join("protoc/29.3/linux-x86_64/protoc").exists());
}

#[tokio::test]
async fn test_matching_archive_checksum_is_accepted() {
    use sha2::{Digest, Sha256};

    let root = tempfile::tempdir().unwrap();
    let fetcher = FakeFetch::new();
    let expected = hex::encode(Sha256::digest(&fetcher.archive)).to_uppercase();

    BinaryCache::persistent(root.path(), fetcher.clone())
        .with_expected_sha256(Some(expected))
        .resolve(&key())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let root = tempfile::tempdir().unwrap();
    let fetcher = FakeFetch::failing(2);
    let cache =
        BinaryCache::persistent(root.path(), fetcher.clone()).with_retry_policy(fast_retries());

    cache.resolve(&key()).await.unwrap();
    assert_eq!(fetcher.calls(), 3);
}

#[tokio::test]
async fn test_exhausted_retries_report_unavailable() {
    let root = tempfile::tempdir().unwrap();
    let fetcher = FakeFetch::failing(usize::MAX);
    let cache =
        BinaryCache::persistent(root.path(), fetcher.clone()).with_retry_policy(fast_retries());

    let result = cache.resolve(&key()).await;

    assert!(matches!(
        result,
        Err(ToolchainError::Unavailable { attempts: 3, .. })
    ));
    assert_eq!(fetcher.calls(), 3);
}

#[tokio::test]
async fn test_url_override_is_fetched_verbatim() {
    struct RecordingFetch(std::sync::Mutex<Vec<String>>, Vec<u8>);

    #[async_trait]
    impl Fetch for RecordingFetch {
        async fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, ToolchainError> {
            self.0.lock().unwrap().push(request.url.clone());
            Ok(self.1.clone())
        }
    }

    let root = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(RecordingFetch(Default::default(), archive(PROTOC)));
    let url = "https://mirror.example.com/protoc.zip";
    let key = CacheKey::new(
        ToolchainVersion::custom(url),
        Platform::from_names("linux", "x86_64").unwrap(),
    );

    BinaryCache::persistent(root.path(), fetcher.clone())
        .with_url_override(Some(url.to_string()))
        .resolve(&key)
        .await
        .unwrap();

    assert_eq!(*fetcher.0.lock().unwrap(), [url]);
}

#[tokio::test]
async fn test_clean_is_idempotent() {
    let root = tempfile::tempdir().unwrap();
    let fetcher = FakeFetch::new();
    let cache = BinaryCache::persistent(root.path().join("never-created"), fetcher.clone());
    cache.clean().unwrap();

    let cache = BinaryCache::persistent(root.path(), fetcher.clone());
    let binary = cache.resolve(&key()).await.unwrap();
    cache.clean().unwrap();
    assert!(!binary.path().exists());
    cache.clean().unwrap();

    cache.resolve(&key()).await.unwrap();
    assert_eq!(fetcher.calls(), 2);
}
