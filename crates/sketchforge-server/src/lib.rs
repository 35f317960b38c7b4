//! sketchforge HTTP server.
//!
//! A thin transport over `sketchforge-core`:
//! - **Routes**: `POST /compile/cpp` and `GET /health`
//! - **Sessions**: cookie-identified, with per-session in-flight limits
//! - **Response cache**: identical sketches are served from cache
//!
//! All compile semantics (resolution, installation, slots) live in the core
//! crate.

pub mod cache;
pub mod error;
pub mod routes;
pub mod session;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sketchforge_core::{CompileService, Config, Error};

pub use error::{ApiError, ApiResult};
pub use routes::{AppState, CompileRequest, CompileResponse, create_router};

/// Start the compile service and serve it until interrupted.
pub async fn serve(config: Config) -> sketchforge_core::Result<()> {
    let service = Arc::new(CompileService::new(&config).await?);
    tracing::info!("compile service ready, {} build slots", service.capacity());

    // Startup refresh, then the periodic task. A failed initial refresh is
    // not fatal: the service still serves cached libraries offline.
    if config.catalog.refresh_interval_secs > 0 {
        let catalog = service.catalog();
        if let Err(err) = catalog.refresh().await {
            tracing::warn!("initial library index refresh failed: {err}");
        }
        sketchforge_core::spawn_refresh_task(
            catalog,
            Duration::from_secs(config.catalog.refresh_interval_secs),
        );
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|_| {
            Error::InvalidInput(format!(
                "invalid address: {}:{}",
                config.server.host, config.server.port
            ))
        })?;

    let state = Arc::new(AppState::new(service, &config));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("sketchforge listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("received shutdown signal");
    }
}
