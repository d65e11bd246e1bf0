//! # Origin Fetcher
//!
//! Streams a response from the origin, teeing the body to the client and
//! a temp file, then atomically publishes the temp file into the cache.
//! A blob becomes visible only via the final rename; no caller can ever
//! observe a partially written blob as valid.

use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheKey, CacheStore};
use crate::config::MirrorConfig;
use crate::error::MirrorError;
use crate::inflight::FlightGuard;

/// Channel depth between the origin copy task and the client body.
const TEE_CHANNEL_SIZE: usize = 16;

/// Create a reqwest Client with the provided configuration.
pub fn create_client(config: &MirrorConfig) -> Result<Client, MirrorError> {
    let mut builder = Client::builder()
        .pool_max_idle_per_host(5)
        .user_agent(&config.user_agent)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        builder = builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        builder = builder.connect_timeout(config.connect_timeout);
    }

    builder.build().map_err(MirrorError::from)
}

/// Fetches paths from the origin and populates the cache store.
pub struct OriginFetcher {
    client: Client,
    origin_base: String,
    store: CacheStore,
}

impl OriginFetcher {
    pub fn new(client: Client, origin_base: impl Into<String>, store: CacheStore) -> Self {
        Self {
            client,
            origin_base: origin_base.into(),
            store,
        }
    }

    /// Upstream URL for a key: the percent-encoded request path appended
    /// to the origin base.
    pub fn origin_url(&self, key: &CacheKey) -> String {
        format!("{}{}", self.origin_base, key.raw_path())
    }

    /// Fetch `key` from the origin, streaming the body to the client while
    /// writing it to a temp file that is renamed over the blob path once
    /// the copy completes.
    ///
    /// A connection failure surfaces as [`MirrorError::Http`] (rendered as
    /// 502) without touching the cache. A non-success origin status is
    /// passed through verbatim, also without touching the cache; manifest
    /// fallback on such statuses is the caller's decision.
    ///
    /// The flight guard moves into the copy task, so the key stays
    /// registered until the blob is published or the temp file cleaned up.
    pub async fn fetch_and_cache(
        &self,
        key: &CacheKey,
        guard: FlightGuard,
    ) -> Result<Response, MirrorError> {
        let url = self.origin_url(key);
        info!(url = %url, "cache miss, downloading from origin");

        let upstream = self.client.get(&url).send().await?;
        let status = upstream.status();

        if !status.is_success() {
            warn!(url = %url, status = %status, "origin returned non-success status");
            drop(guard);
            return Ok(passthrough(upstream));
        }

        let blob_path = self.store.blob_path(key);
        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.store.temp_path(key);
        let temp_file = File::create(&temp_path).await?;
        debug!(path = ?temp_path, "created temp file");

        let mut builder = Response::builder().status(status);
        for (name, value) in upstream.headers() {
            builder = builder.header(name, value);
        }

        let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(TEE_CHANNEL_SIZE);
        tokio::spawn(copy_and_publish(
            upstream, temp_file, temp_path, blob_path, tx, guard,
        ));

        builder
            .body(Body::from_stream(ReceiverStream::new(rx)))
            .map_err(|e| MirrorError::Io(std::io::Error::other(e)))
    }
}

/// Pass an origin response through to the client unchanged.
fn passthrough(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let mut builder = Response::builder().status(status);
    for (name, value) in upstream.headers() {
        builder = builder.header(name, value);
    }

    let body = Body::from_stream(upstream.bytes_stream().map_err(std::io::Error::other));
    match builder.body(body) {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "failed to rebuild origin response");
            Response::new(Body::empty())
        }
    }
}

/// Copy the origin body to both the temp file and the client, then rename
/// the temp file over the blob path. Any failure mid-copy, including a
/// client disconnect, deletes the temp file and never publishes.
async fn copy_and_publish(
    upstream: reqwest::Response,
    mut temp_file: File,
    temp_path: PathBuf,
    blob_path: PathBuf,
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
    guard: FlightGuard,
) {
    let key = guard.key().to_owned();
    let mut stream = upstream.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(key = %key, error = %e, "origin stream failed mid-copy");
                let _ = tx.send(Err(std::io::Error::other(e))).await;
                discard(temp_file, &temp_path).await;
                return;
            }
        };

        if let Err(e) = temp_file.write_all(&chunk).await {
            warn!(key = %key, error = %e, "failed writing temp file");
            let _ = tx.send(Err(e)).await;
            discard(temp_file, &temp_path).await;
            return;
        }
        bytes_written += chunk.len() as u64;

        if tx.send(Ok(chunk)).await.is_err() {
            // Client went away; abandon the cache write as well.
            warn!(key = %key, "client disconnected mid-copy");
            discard(temp_file, &temp_path).await;
            return;
        }
    }

    if let Err(e) = temp_file.flush().await {
        warn!(key = %key, error = %e, "failed flushing temp file");
        discard(temp_file, &temp_path).await;
        return;
    }
    drop(temp_file);

    if let Err(e) = fs::rename(&temp_path, &blob_path).await {
        error!(key = %key, error = %e, "failed to publish cached download");
        let _ = fs::remove_file(&temp_path).await;
        return;
    }

    info!(key = %key, bytes = bytes_written, "cached and served");
    // The guard drops here, releasing the key and waking followers.
}

async fn discard(temp_file: File, temp_path: &Path) {
    drop(temp_file);
    if let Err(e) = fs::remove_file(temp_path).await {
        warn!(path = ?temp_path, error = %e, "failed to remove temp file");
    }
}
