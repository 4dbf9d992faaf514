use serde_json::Map;

use super::Protocol;
use crate::error::HttpError;
use crate::http::Reply;

/// Wire-format capability of a request's origin.
///
/// A transport turns the [`Reply`] recorded on a request into whatever its
/// listener writes back: an axum response for HTTP, a text frame for
/// WebSocket.
pub trait Transport: Send + Sync {
    type Output;

    fn protocol(&self) -> Protocol;

    fn render(&self, reply: Reply) -> Self::Output;

    /// Render an error raised before a `Request` could be built
    fn render_error(&self, err: HttpError, expose_stack: bool) -> Self::Output {
        let body = err.to_body(expose_stack);
        self.render(Reply::new(err.status(), Map::new(), Some(body)))
    }
}
