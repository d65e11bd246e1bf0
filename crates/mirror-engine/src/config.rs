use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::MirrorError;

/// Upstream storage service mirrored by default.
pub const DEFAULT_ORIGIN: &str = "https://storage.flutter-io.cn";

const DEFAULT_USER_AGENT: &str = concat!("flutter-mirror/", env!("CARGO_PKG_VERSION"));

/// Configurable options for the mirror, built once at startup and threaded
/// explicitly into the router. There is no process-global configuration.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Base URL requests are appended to, without a trailing slash.
    pub origin_base: String,

    /// Root directory for cache storage; blobs live under `<root>/cache`.
    pub cache_root: PathBuf,

    /// IP address the server binds to.
    pub bind_ip: IpAddr,

    /// Port the server listens on.
    pub port: u16,

    /// User agent sent on origin requests.
    pub user_agent: String,

    /// Overall timeout for an origin request. Zero disables the timeout;
    /// release archives can take arbitrarily long to stream.
    pub timeout: Duration,

    /// Connection timeout for origin requests.
    pub connect_timeout: Duration,

    /// Whether origin redirects are followed.
    pub follow_redirects: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            origin_base: DEFAULT_ORIGIN.to_owned(),
            cache_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8050,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            timeout: Duration::ZERO,
            connect_timeout: Duration::from_secs(10),
            follow_redirects: true,
        }
    }
}

impl MirrorConfig {
    pub fn with_origin_base(mut self, origin_base: impl Into<String>) -> Self {
        let base: String = origin_base.into();
        self.origin_base = base.trim_end_matches('/').to_owned();
        self
    }

    pub fn with_cache_root(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = cache_root.into();
        self
    }

    pub fn with_bind(mut self, ip: IpAddr, port: u16) -> Self {
        self.bind_ip = ip;
        self.port = port;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    /// Socket address the server binds to.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    /// Validate the configuration before serving begins.
    pub fn validate(&self) -> Result<(), MirrorError> {
        let url = Url::parse(&self.origin_base)
            .map_err(|e| MirrorError::Config(format!("invalid origin base URL: {e}")))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(MirrorError::Config(format!(
                "origin base URL must be http or https, got {}",
                url.scheme()
            )));
        }
        Ok(())
    }
}
