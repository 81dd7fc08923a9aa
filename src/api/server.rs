//! API server assembly: middleware stack, listener, graceful shutdown.

use crate::api::handlers::AppState;
use crate::api::middleware::create_cors_layer;
use crate::api::routes::create_router;
use crate::config::ServerConfig;
use crate::errors::LiftoffError;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

pub struct ApiServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: ServerConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Serve until SIGINT/SIGTERM.
    pub async fn run(self) -> Result<(), LiftoffError> {
        let app = create_router(self.state)
            .layer(create_cors_layer(self.config.allowed_origins.clone()))
            .layer(TimeoutLayer::new(Duration::from_secs(
                self.config.request_timeout_secs,
            )))
            // A panicking handler becomes a 500 instead of taking the
            // process down.
            .layer(CatchPanicLayer::new())
            .layer(TraceLayer::new_for_http());

        let addr = SocketAddr::from((
            self.config
                .host
                .parse::<std::net::IpAddr>()
                .map_err(|e| LiftoffError::Server(format!("invalid listen host: {}", e)))?,
            self.config.port,
        ));

        info!("🚀 liftoff server starting");
        info!("   listen: http://{}", addr);
        info!("   cors: {:?}", self.config.allowed_origins);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| LiftoffError::Server(format!("failed to bind {}: {}", addr, e)))?;

        info!("✅ server running");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| LiftoffError::Server(e.to_string()))?;

        info!("🛑 server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C signal");
        },
        _ = terminate => {
            info!("received terminate signal");
        },
    }
}
