//! # Request Router
//!
//! Classifies inbound paths into "volatile manifest" vs "immutable asset"
//! and sequences the cache store, download registry, and origin fetcher
//! accordingly. Assets are served cache-first; the release manifests are
//! revalidated against the origin on every request because their content
//! changes under a fixed name.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use tracing::{debug, error, warn};

use crate::cache::{CacheKey, CacheStore};
use crate::config::MirrorConfig;
use crate::error::MirrorError;
use crate::fetch::{OriginFetcher, create_client};
use crate::inflight::{DownloadRegistry, Flight};

/// Release manifests, one per target platform. Exact-match paths exempt
/// from cache-first serving.
pub const MANIFEST_PATHS: [&str; 3] = [
    "/flutter_infra_release/releases/releases_windows.json",
    "/flutter_infra_release/releases/releases_linux.json",
    "/flutter_infra_release/releases/releases_macos.json",
];

/// Whether `path` (decoded) names a release manifest.
pub fn is_manifest_path(path: &str) -> bool {
    MANIFEST_PATHS.contains(&path)
}

/// Process-wide shared state, built once before serving begins and
/// threaded into every request handler.
#[derive(Clone)]
pub struct MirrorState {
    pub store: CacheStore,
    pub registry: Arc<DownloadRegistry>,
    pub fetcher: Arc<OriginFetcher>,
}

impl MirrorState {
    pub fn from_config(config: &MirrorConfig) -> Result<Self, MirrorError> {
        let store = CacheStore::new(config.cache_root.clone());
        let client = create_client(config)?;
        let fetcher = Arc::new(OriginFetcher::new(
            client,
            config.origin_base.clone(),
            store.clone(),
        ));
        Ok(Self {
            store,
            registry: DownloadRegistry::new(),
            fetcher,
        })
    }
}

/// Fallback handler for every inbound request. Any method is accepted but
/// only GET semantics are implemented; the request body is ignored.
pub async fn handle_request(State(state): State<MirrorState>, request: Request) -> Response {
    let key = match CacheKey::from_request_path(request.uri().path()) {
        Ok(key) => key,
        Err(e) => {
            warn!(path = %request.uri().path(), "rejecting unusable request path");
            return e.into_response();
        }
    };

    if let Err(e) = state.store.ensure_initialized().await {
        error!(error = %e, "failed to create cache directory");
        return MirrorError::Io(e).into_response();
    }

    debug!(path = %key.id(), "processing request");

    if is_manifest_path(key.id()) {
        handle_manifest(state, key, request).await
    } else {
        handle_asset(state, key, request).await
    }
}

/// Asset branch: serve from cache when valid, otherwise fetch from the
/// origin, with concurrent requests for the same key sharing one fetch.
async fn handle_asset(state: MirrorState, key: CacheKey, request: Request) -> Response {
    if state.store.is_valid(&key).await {
        debug!(path = %key.id(), "cache hit");
        return state.store.serve(&key, request).await;
    }

    loop {
        match state.registry.join(key.id()) {
            Flight::Follower(watch) => {
                watch.wait().await;
                // The leader may have failed; only a valid entry ends the
                // wait, otherwise contend for leadership.
                if state.store.is_valid(&key).await {
                    debug!(path = %key.id(), "cache hit after in-flight download");
                    return state.store.serve(&key, request).await;
                }
            }
            Flight::Leader(guard) => {
                // The entry may have been published while this task was
                // between the first check and acquiring the flight.
                if state.store.is_valid(&key).await {
                    return state.store.serve(&key, request).await;
                }
                return match state.fetcher.fetch_and_cache(&key, guard).await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(path = %key.id(), error = %e, "origin fetch failed");
                        e.into_response()
                    }
                };
            }
        }
    }
}

/// Manifest branch: always revalidate against the origin. A fetched copy
/// still populates the cache, and on a non-success origin status a valid
/// cached copy is served instead of the failure.
async fn handle_manifest(state: MirrorState, key: CacheKey, request: Request) -> Response {
    loop {
        match state.registry.join(key.id()) {
            Flight::Follower(watch) => {
                // Coalesce onto the in-flight revalidation; its result is
                // fresh enough for this request too.
                watch.wait().await;
                if state.store.is_valid(&key).await {
                    return state.store.serve(&key, request).await;
                }
            }
            Flight::Leader(guard) => {
                return match state.fetcher.fetch_and_cache(&key, guard).await {
                    Ok(response) if !response.status().is_success() => {
                        if state.store.is_valid(&key).await {
                            warn!(
                                path = %key.id(),
                                status = %response.status(),
                                "origin revalidation failed, serving stale manifest"
                            );
                            state.store.serve(&key, request).await
                        } else {
                            response
                        }
                    }
                    Ok(response) => response,
                    Err(e) => {
                        warn!(path = %key.id(), error = %e, "manifest revalidation failed");
                        e.into_response()
                    }
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_classification() {
        for os in ["windows", "linux", "macos"] {
            assert!(is_manifest_path(&format!(
                "/flutter_infra_release/releases/releases_{os}.json"
            )));
        }

        assert!(!is_manifest_path("/flutter_infra_release/releases/"));
        assert!(!is_manifest_path(
            "/flutter_infra_release/releases/releases_android.json"
        ));
        assert!(!is_manifest_path(
            "/flutter_infra_release/flutter/abc/engine.zip"
        ));
    }
}
