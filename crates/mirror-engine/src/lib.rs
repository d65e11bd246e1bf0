//! # mirror-engine
//!
//! Cache-coherent request engine for mirroring the Flutter SDK release
//! storage onto local disk.
//!
//! Requests fall into two classes: immutable release archives are served
//! cache-first, while the small `releases_<os>.json` manifests change
//! under a fixed name and are revalidated against the origin on every
//! request. Cache writes go through a temp file and become visible only
//! via an atomic rename, and concurrent requests for the same uncached
//! path share a single origin fetch.

pub mod cache;
pub mod checksum;
pub mod config;
pub mod error;
pub mod fetch;
pub mod inflight;
pub mod proxy;
pub mod server;

pub use cache::{CacheKey, CacheStore};
pub use config::MirrorConfig;
pub use error::MirrorError;
pub use fetch::{OriginFetcher, create_client};
pub use inflight::{DownloadRegistry, Flight};
pub use proxy::{MANIFEST_PATHS, MirrorState, handle_request, is_manifest_path};
pub use server::{MirrorServer, build_router};
