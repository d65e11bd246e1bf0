//! # Download Registry
//!
//! Single-flight tracking of in-flight origin fetches. The first caller
//! for a key becomes the leader and performs the fetch; concurrent
//! callers attach to the leader's flight and are woken when it completes,
//! then re-check cache validity rather than assuming success.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

/// Set of cache keys with an origin fetch currently executing.
#[derive(Debug, Default)]
pub struct DownloadRegistry {
    inner: Mutex<HashMap<String, watch::Receiver<()>>>,
}

/// Outcome of joining the registry for a key.
pub enum Flight {
    /// This caller owns the fetch; the key stays registered until the
    /// guard is dropped.
    Leader(FlightGuard),
    /// Another caller is already fetching this key.
    Follower(FlightWatch),
}

/// Handle a follower awaits on.
pub struct FlightWatch {
    rx: watch::Receiver<()>,
}

impl FlightWatch {
    /// Resolves once the leader's fetch has completed, success or failure.
    pub async fn wait(mut self) {
        // The sender lives in the leader's guard; the channel closing is
        // the completion signal.
        while self.rx.changed().await.is_ok() {}
    }
}

/// Registration of an in-flight fetch. Dropping the guard unregisters the
/// key and wakes every follower, so release happens exactly once on every
/// exit path.
#[derive(Debug)]
pub struct FlightGuard {
    registry: Arc<DownloadRegistry>,
    key: String,
    _notify: watch::Sender<()>,
}

impl FlightGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.registry.inner.lock().remove(&self.key);
        // Dropping the watch sender wakes the followers.
    }
}

impl DownloadRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Join the flight for `key`, becoming its leader if none exists.
    pub fn join(self: &Arc<Self>, key: &str) -> Flight {
        let mut map = self.inner.lock();
        if let Some(rx) = map.get(key) {
            debug!(key, "attaching to in-flight download");
            return Flight::Follower(FlightWatch { rx: rx.clone() });
        }

        let (tx, rx) = watch::channel(());
        map.insert(key.to_owned(), rx);
        Flight::Leader(FlightGuard {
            registry: Arc::clone(self),
            key: key.to_owned(),
            _notify: tx,
        })
    }

    /// Point-in-time membership check.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inner.lock().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_first_join_leads_second_follows() {
        let registry = DownloadRegistry::new();

        let leader = registry.join("/a");
        assert!(matches!(leader, Flight::Leader(_)));
        assert!(registry.is_in_flight("/a"));

        let follower = registry.join("/a");
        assert!(matches!(follower, Flight::Follower(_)));

        // A different key gets its own flight.
        assert!(matches!(registry.join("/b"), Flight::Leader(_)));
    }

    #[tokio::test]
    async fn test_guard_drop_releases_and_wakes_followers() {
        let registry = DownloadRegistry::new();

        let Flight::Leader(guard) = registry.join("/a") else {
            panic!("expected leader");
        };
        let Flight::Follower(watch) = registry.join("/a") else {
            panic!("expected follower");
        };

        let waiter = tokio::spawn(watch.wait());
        drop(guard);

        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("follower was not woken")
            .unwrap();
        assert!(!registry.is_in_flight("/a"));
    }

    #[tokio::test]
    async fn test_key_can_be_reacquired_after_release() {
        let registry = DownloadRegistry::new();

        let Flight::Leader(guard) = registry.join("/a") else {
            panic!("expected leader");
        };
        assert_eq!(guard.key(), "/a");
        drop(guard);

        assert!(matches!(registry.join("/a"), Flight::Leader(_)));
    }
}
