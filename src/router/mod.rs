//! Ordered, first-match request router.
//!
//! Routes are tried strictly in registration order: the first route whose
//! method set contains the request method and whose pattern matches the
//! pathname wins. There is no specificity sorting, so specific routes must
//! be pushed before catch-alls.

pub mod route;

use async_trait::async_trait;
use std::sync::Arc;

use crate::app::Middleware;
use crate::error::HttpError;
use crate::request::Request;

pub use route::{Pattern, Route};

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Invalid route pattern: {0}")]
    InvalidPattern(String),

    #[error("Unknown method in route spec: {0}")]
    UnknownMethod(String),
}

/// Terminal request handler reached through the router
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, request: &mut Request) -> Result<(), HttpError>;
}

/// Plain functions and closures are handlers too
#[async_trait]
impl<F> Handler for F
where
    F: Fn(&mut Request) -> Result<(), HttpError> + Send + Sync,
{
    async fn call(&self, request: &mut Request) -> Result<(), HttpError> {
        self(request)
    }
}

#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a pipe-delimited method spec and a path pattern.
    pub fn push<H>(&mut self, methods: &str, pattern: &str, handler: H) -> Result<&mut Self, RouteError>
    where
        H: Handler + 'static,
    {
        self.push_shared(methods, pattern, Arc::new(handler))
    }

    pub fn push_shared(
        &mut self,
        methods: &str,
        pattern: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<&mut Self, RouteError> {
        let methods = Route::parse_methods(methods)?;
        let route = Route::new(methods, pattern, handler)?;
        tracing::debug!("Registered route {:?}", route);
        self.routes.push(route);
        Ok(self)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Find the first matching route and store its params on the request.
    pub fn find(&self, request: &mut Request) -> Option<Arc<dyn Handler>> {
        let method = request.method();
        for route in &self.routes {
            if !route.allows(method) {
                continue;
            }
            if let Some(params) = route.matches(request.pathname()) {
                request.set_params(params);
                return Some(Arc::clone(route.handler()));
            }
        }
        None
    }
}

#[async_trait]
impl Middleware for Router {
    async fn handle(&self, request: &mut Request) -> Result<(), HttpError> {
        match self.find(request) {
            Some(handler) => handler.call(request).await,
            None => Err(HttpError::not_found(format!(
                "Cannot {} {}",
                request.method(),
                request.pathname()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Method, Protocol};
    use serde_json::json;

    fn tag(name: &'static str) -> impl Handler {
        move |req: &mut Request| {
            let params = json!(req.params());
            req.respond(200, Some(json!({ "route": name, "params": params })));
            Ok(())
        }
    }

    fn request(method: Method, path: &str) -> Request {
        Request::new(Protocol::Http, method, path)
    }

    async fn route_of(router: &Router, method: Method, path: &str) -> Option<String> {
        let mut req = request(method, path);
        let handler = router.find(&mut req)?;
        handler.call(&mut req).await.unwrap();
        req.reply()?.body.as_ref()?["route"].as_str().map(String::from)
    }

    #[tokio::test]
    async fn first_registered_match_wins() {
        let mut router = Router::new();
        router.push("get", "/people/:id", tag("detail")).unwrap();
        router.push("get", "/people/:other", tag("shadowed")).unwrap();

        assert_eq!(route_of(&router, Method::Get, "/people/1").await.as_deref(), Some("detail"));
    }

    #[tokio::test]
    async fn catch_all_registered_first_shadows_specific_route() {
        let mut router = Router::new();
        router.push("get", "/*", tag("catch_all")).unwrap();
        router.push("get", "/people/:id", tag("detail")).unwrap();

        assert_eq!(route_of(&router, Method::Get, "/people/1").await.as_deref(), Some("catch_all"));
    }

    #[tokio::test]
    async fn method_membership_is_checked_before_pattern() {
        let mut router = Router::new();
        router.push("put|patch", "/people/:id", tag("write")).unwrap();
        router.push("get", "/people/:id", tag("read")).unwrap();

        assert_eq!(route_of(&router, Method::Get, "/people/1").await.as_deref(), Some("read"));
        assert_eq!(route_of(&router, Method::Patch, "/people/1").await.as_deref(), Some("write"));
        assert_eq!(route_of(&router, Method::Delete, "/people/1").await, None);
    }

    #[tokio::test]
    async fn find_sets_params() {
        let mut router = Router::new();
        router.push("get", "/people/:id", tag("detail")).unwrap();

        let mut req = request(Method::Get, "/people/abc");
        assert!(router.find(&mut req).is_some());
        assert_eq!(req.param("id"), Some("abc"));
    }

    #[tokio::test]
    async fn unmatched_request_is_not_found() {
        let router = Router::new();
        let mut req = request(Method::Get, "/nowhere");
        let err = router.handle(&mut req).await.unwrap_err();
        assert_eq!(err.status(), 404);
    }
}
