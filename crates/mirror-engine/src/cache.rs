//! # Cache Store
//!
//! Disk-backed blob store keyed by request path. The cache hierarchy
//! mirrors the origin's path hierarchy under `<cache_root>/cache`, and a
//! `<path>.tmp` sibling marks an in-progress write that must never be
//! served.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::body::Body;
use axum::extract::Request;
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;
use tokio::fs;
use tokio::io;
use tower_http::services::ServeFile;
use tracing::warn;

use crate::error::MirrorError;

/// Normalized request path identifying a cache slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Path as received, percent-encoding preserved; appended to the
    /// origin base URL.
    raw: String,
    /// Decoded path with a leading slash, used for manifest matching and
    /// as the in-flight registry key.
    id: String,
    /// Decoded path relative to the cache directory.
    relative: PathBuf,
}

impl CacheKey {
    /// Normalize an inbound request path into a cache key. Rejects paths
    /// that decode to invalid UTF-8 or escape the cache hierarchy.
    pub fn from_request_path(path: &str) -> Result<Self, MirrorError> {
        if !path.starts_with('/') {
            return Err(MirrorError::InvalidPath(path.to_owned()));
        }

        let decoded = percent_decode_str(path)
            .decode_utf8()
            .map_err(|_| MirrorError::InvalidPath(path.to_owned()))?
            .into_owned();

        // The `<path>.tmp` location marks an in-progress write and must
        // never be served, nor become a cacheable key of its own.
        if decoded.ends_with(".tmp") {
            return Err(MirrorError::InvalidPath(path.to_owned()));
        }

        let mut relative = PathBuf::new();
        for component in Path::new(decoded.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                // Anything else would escape the cache hierarchy.
                _ => return Err(MirrorError::InvalidPath(path.to_owned())),
            }
        }
        if relative.as_os_str().is_empty() {
            return Err(MirrorError::InvalidPath(path.to_owned()));
        }

        Ok(Self {
            raw: path.to_owned(),
            id: decoded,
            relative,
        })
    }

    /// Percent-encoded request path, as sent to the origin.
    pub fn raw_path(&self) -> &str {
        &self.raw
    }

    /// Decoded request path with a leading slash.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Decoded path relative to the cache directory.
    pub fn relative_path(&self) -> &Path {
        &self.relative
    }
}

/// Disk-backed blob store. Cheap to clone; clones share the one-time
/// initialization flag.
#[derive(Debug, Clone)]
pub struct CacheStore {
    cache_dir: PathBuf,
    initialized: Arc<AtomicBool>,
}

impl CacheStore {
    /// Create a store rooted at `<cache_root>/cache`.
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_root.into().join("cache"),
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Create the cache directory once. Safe to call on every request.
    pub async fn ensure_initialized(&self) -> io::Result<()> {
        // Fast path - already initialized
        if self.initialized.load(Ordering::Relaxed) {
            return Ok(());
        }

        // Use compare_exchange to ensure only one task initializes
        if self
            .initialized
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            fs::create_dir_all(&self.cache_dir).await?;
            self.initialized.store(true, Ordering::Release);
        } else {
            while !self.initialized.load(Ordering::Acquire) {
                tokio::task::yield_now().await;
            }
        }

        Ok(())
    }

    /// Final on-disk location of a published blob.
    pub fn blob_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(key.relative_path())
    }

    /// Temp marker path: the blob path with `.tmp` appended, not an
    /// extension swap, so `releases_linux.json.tmp` sits next to
    /// `releases_linux.json`.
    pub fn temp_path(&self, key: &CacheKey) -> PathBuf {
        let mut path = self.blob_path(key).into_os_string();
        path.push(".tmp");
        PathBuf::from(path)
    }

    /// An entry is valid iff the blob exists, has non-zero size, and no
    /// temp marker sits alongside it. A leftover marker means a previous
    /// write never completed; the stale blob is deleted so the request
    /// proceeds as a normal miss.
    pub async fn is_valid(&self, key: &CacheKey) -> bool {
        let blob = self.blob_path(key);

        let meta = match fs::metadata(&blob).await {
            Ok(meta) => meta,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = ?blob, error = %e, "failed to stat cached blob");
                }
                return false;
            }
        };

        if meta.len() == 0 {
            warn!(path = ?blob, "cached blob has zero size, treating as invalid");
            return false;
        }

        let temp = self.temp_path(key);
        match fs::try_exists(&temp).await {
            Ok(false) => true,
            Ok(true) => {
                warn!(path = ?blob, "found incomplete download, removing stale blob");
                if let Err(e) = fs::remove_file(&blob).await {
                    warn!(path = ?blob, error = %e, "failed to remove stale blob");
                }
                false
            }
            Err(e) => {
                warn!(path = ?temp, error = %e, "failed to check temp marker");
                false
            }
        }
    }

    /// Stream the cached blob to the client with standard file-serving
    /// semantics (content length, last-modified, range support). A blob
    /// that disappeared between the validity check and here fails this
    /// request only.
    pub async fn serve(&self, key: &CacheKey, mut request: Request) -> Response {
        let path = self.blob_path(key);

        // The file service only implements GET and HEAD; every other
        // method gets GET semantics, matching the origin pass-through.
        if request.method() != Method::GET && request.method() != Method::HEAD {
            *request.method_mut() = Method::GET;
        }

        match ServeFile::new(&path).try_call(request).await {
            Ok(response) => response.map(Body::new),
            Err(e) => {
                warn!(path = ?path, error = %e, "cached blob disappeared while serving");
                MirrorError::Io(e).into_response()
            }
        }
    }

    /// Remove a blob and its temp marker. Missing files are tolerated.
    pub async fn invalidate(&self, key: &CacheKey) -> io::Result<()> {
        for path in [self.blob_path(key), self.temp_path(key)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = ?path, error = %e, "failed to remove cache file");
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> CacheKey {
        CacheKey::from_request_path(path).unwrap()
    }

    #[test]
    fn test_key_normalization() {
        let k = key("/flutter_infra_release/flutter/abc/engine.zip");
        assert_eq!(k.raw_path(), "/flutter_infra_release/flutter/abc/engine.zip");
        assert_eq!(k.id(), "/flutter_infra_release/flutter/abc/engine.zip");
        assert_eq!(
            k.relative_path(),
            Path::new("flutter_infra_release/flutter/abc/engine.zip")
        );
    }

    #[test]
    fn test_key_percent_decoding() {
        let k = key("/flutter%20sdk/engine%2Bdev.zip");
        assert_eq!(k.raw_path(), "/flutter%20sdk/engine%2Bdev.zip");
        assert_eq!(k.relative_path(), Path::new("flutter sdk/engine+dev.zip"));
    }

    #[test]
    fn test_key_rejects_temp_marker_paths() {
        assert!(CacheKey::from_request_path("/flutter/engine.zip.tmp").is_err());
        assert!(CacheKey::from_request_path("/flutter/engine.zip%2Etmp").is_err());
        assert!(CacheKey::from_request_path("/.tmp").is_err());

        // A `.tmp` suffix only matters on the final component.
        assert!(CacheKey::from_request_path("/a.tmp/b.zip").is_ok());
        assert!(CacheKey::from_request_path("/flutter/engine.tmpl").is_ok());
    }

    #[test]
    fn test_key_rejects_traversal_and_empty() {
        assert!(CacheKey::from_request_path("/../etc/passwd").is_err());
        assert!(CacheKey::from_request_path("/a/../../b").is_err());
        assert!(CacheKey::from_request_path("/").is_err());
        assert!(CacheKey::from_request_path("no-leading-slash").is_err());
    }

    #[tokio::test]
    async fn test_is_valid_requires_existing_non_empty_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        store.ensure_initialized().await.unwrap();
        let k = key("/artifact.zip");

        // Absent
        assert!(!store.is_valid(&k).await);

        // Zero-length
        fs::write(store.blob_path(&k), b"").await.unwrap();
        assert!(!store.is_valid(&k).await);

        // Non-empty
        fs::write(store.blob_path(&k), b"data").await.unwrap();
        assert!(store.is_valid(&k).await);
    }

    #[tokio::test]
    async fn test_temp_marker_invalidates_and_self_heals() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        store.ensure_initialized().await.unwrap();
        let k = key("/artifact.zip");

        fs::write(store.blob_path(&k), b"stale").await.unwrap();
        fs::write(store.temp_path(&k), b"").await.unwrap();

        assert!(!store.is_valid(&k).await);
        // The stale blob was removed so the next request is a clean miss.
        assert!(!fs::try_exists(store.blob_path(&k)).await.unwrap());
    }

    #[tokio::test]
    async fn test_temp_path_appends_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let k = key("/releases/releases_linux.json");
        assert!(
            store
                .temp_path(&k)
                .to_str()
                .unwrap()
                .ends_with("releases_linux.json.tmp")
        );
    }

    #[tokio::test]
    async fn test_invalidate_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        store.ensure_initialized().await.unwrap();
        let k = key("/artifact.zip");

        store.invalidate(&k).await.unwrap();

        fs::write(store.blob_path(&k), b"data").await.unwrap();
        fs::write(store.temp_path(&k), b"").await.unwrap();
        store.invalidate(&k).await.unwrap();
        assert!(!fs::try_exists(store.blob_path(&k)).await.unwrap());
        assert!(!fs::try_exists(store.temp_path(&k)).await.unwrap());
    }
}
