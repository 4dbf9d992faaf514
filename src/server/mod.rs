//! axum front end for an [`Application`].
//!
//! # Responsibilities
//! - Route every HTTP request through the application's middleware chain
//! - Upgrade `server.ws_path` to a WebSocket session speaking request frames
//! - Apply CORS, tracing and the request timeout around both
//! - Bind, serve, and stop cleanly on Ctrl-C
//!
//! # Design Decisions
//! - Routing happens inside the application, so axum only sees a fallback
//! - The application is the axum state, shared by `Arc`

pub mod http;
pub mod ws;

pub use self::http::HealthCheck;

use axum::http::HeaderValue;
use axum::routing::get;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::app::Application;
use crate::config::AppConfig;

/// axum router serving `app` over HTTP and WebSocket
pub fn router(app: Arc<Application>) -> axum::Router {
    let config = app.config();
    let timeout = Duration::from_secs(config.server.request_timeout_secs);
    let cors = cors_layer(config);

    let router = axum::Router::new()
        .route(&config.server.ws_path, get(ws::upgrade))
        .fallback(http::handle)
        .with_state(Arc::clone(&app))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(timeout)),
        );

    match cors {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

fn cors_layer(config: &AppConfig) -> Option<CorsLayer> {
    if !config.security.enable_cors {
        return None;
    }
    if config.security.cors_origins.iter().any(|origin| origin == "*") {
        return Some(CorsLayer::permissive());
    }

    let origins: Vec<HeaderValue> = config
        .security
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any),
    )
}

/// HTTP and WebSocket server for one application.
pub struct HttpServer {
    app: Arc<Application>,
}

impl HttpServer {
    pub fn new(app: Arc<Application>) -> Self {
        Self { app }
    }

    /// Bind `server.host:server.port` and serve until Ctrl-C.
    pub async fn serve(self) -> std::io::Result<()> {
        let address = self.app.config().bind_address();
        let listener = TcpListener::bind(&address).await?;
        self.run(listener, shutdown_signal()).await
    }

    /// Serve on an already-bound listener until `shutdown` resolves.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let address = listener.local_addr()?;
        tracing::info!(
            address = %address,
            ws_path = %self.app.config().server.ws_path,
            "HTTP server starting"
        );

        axum::serve(listener, router(self.app))
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
