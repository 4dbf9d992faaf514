use async_trait::async_trait;
use axum::extract::State;
use axum::response::Response;
use serde_json::json;
use std::sync::Arc;

use crate::app::Application;
use crate::error::HttpError;
use crate::http::status;
use crate::request::{HttpTransport, Request, Transport};
use crate::router::Handler;
use crate::store::Store;

/// Fallback handler: every non-WebSocket request goes through the application.
pub async fn handle(State(app): State<Arc<Application>>, request: axum::extract::Request) -> Response {
    let transport = HttpTransport::new(app.config().server.max_body_bytes);
    match transport.read(request).await {
        Ok(request) => app.dispatch(&transport, request).await,
        Err(err) => {
            tracing::debug!("Rejected HTTP request before dispatch: {}", err);
            transport.render_error(err, app.config().errors.expose_stack)
        }
    }
}

/// `GET /health`: 200 while the store answers, 503 otherwise
pub struct HealthCheck {
    store: Arc<dyn Store>,
}

impl HealthCheck {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler for HealthCheck {
    async fn call(&self, request: &mut Request) -> Result<(), HttpError> {
        let now = chrono::Utc::now();
        match self.store.health_check().await {
            Ok(()) => {
                request.respond(status::OK, Some(json!({ "status": "ok", "timestamp": now })));
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Health check failed: {}", e);
                Err(HttpError::service_unavailable("Store unavailable"))
            }
        }
    }
}
