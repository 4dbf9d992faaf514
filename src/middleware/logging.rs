use async_trait::async_trait;

use crate::app::Middleware;
use crate::error::HttpError;
use crate::request::Request;

/// Debug-level request trace, one line per inbound request
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLogger;

#[async_trait]
impl Middleware for RequestLogger {
    async fn handle(&self, request: &mut Request) -> Result<(), HttpError> {
        let actor = request.actor().map(|a| a.id.as_str()).unwrap_or("anonymous");
        if request.query().is_empty() {
            tracing::debug!("{} {} by {}", request.method(), request.pathname(), actor);
        } else {
            tracing::debug!(
                "{} {} {:?} by {}",
                request.method(),
                request.pathname(),
                request.query(),
                actor
            );
        }
        Ok(())
    }
}
