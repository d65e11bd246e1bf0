//! HTTP server wiring: one entry point for the mirror, built from a
//! [`MirrorConfig`] threaded explicitly into the router.

use std::future::IntoFuture;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::MirrorConfig;
use crate::error::MirrorError;
use crate::proxy::{MirrorState, handle_request};

/// Build the mirror router: every path falls through to the proxy handler.
pub fn build_router(state: MirrorState) -> Router {
    Router::new()
        .fallback(handle_request)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct MirrorServer {
    config: MirrorConfig,
}

impl MirrorServer {
    pub fn new(config: MirrorConfig) -> Result<Self, MirrorError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Bind and serve until the process receives ctrl-c.
    pub async fn run(self) -> Result<(), MirrorError> {
        let state = MirrorState::from_config(&self.config)?;
        state.store.ensure_initialized().await?;

        let addr = self.config.bind_addr();
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!(
            %addr,
            origin = %self.config.origin_base,
            cache = %state.store.cache_dir().display(),
            "starting mirror server"
        );

        let app = build_router(state);

        let server = axum::serve(listener, app).into_future();
        tokio::select! {
            result = server => result.map_err(MirrorError::Io)?,
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
            }
        }

        Ok(())
    }
}
