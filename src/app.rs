//! Application: the sequential middleware chain every request runs through.
//!
//! # Responsibilities
//! - Own the middleware list and the router, frozen at `build()`
//! - Run stages strictly in order, aborting on the first failure
//! - Normalize failures into an error reply on the request
//! - Hand the recorded reply back to the originating transport
//!
//! # Design Decisions
//! - The router always runs last, after user middleware
//! - A stage that already replied ends the chain without error
//! - The application is shared by `Arc`; concurrent requests only read it

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

use crate::config::AppConfig;
use crate::error::HttpError;
use crate::events::ChangeFeed;
use crate::request::{Request, Transport};
use crate::resource::{Catalog, ResourceBuilder};
use crate::router::{Handler, RouteError, Router};
use crate::store::Store;

/// One asynchronous stage of the request pipeline
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, request: &mut Request) -> Result<(), HttpError>;
}

pub struct ApplicationBuilder {
    config: Arc<AppConfig>,
    store: Arc<dyn Store>,
    feed: ChangeFeed,
    catalog: Catalog,
    middleware: Vec<Arc<dyn Middleware>>,
    router: Router,
}

impl ApplicationBuilder {
    /// Append a middleware stage; stages run in the order they were added.
    pub fn middleware<M>(&mut self, middleware: M) -> &mut Self
    where
        M: Middleware + 'static,
    {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Register a plain route ahead of, or alongside, resources
    pub fn route<H>(&mut self, methods: &str, pattern: &str, handler: H) -> Result<&mut Self, RouteError>
    where
        H: Handler + 'static,
    {
        self.router.push(methods, pattern, handler)?;
        Ok(self)
    }

    /// Build a resource against this application's store and mount it.
    pub fn resource(&mut self, resource: ResourceBuilder) -> Result<&mut Self, RouteError> {
        let resource = resource.build(
            Arc::clone(&self.store),
            self.feed.clone(),
            self.catalog.clone(),
            self.config.query.clone(),
        );
        resource.mount(&mut self.router)?;
        tracing::info!("Mounted resource {} at {}", resource.name(), resource.path());
        Ok(self)
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    pub fn build(self) -> Arc<Application> {
        tracing::debug!(
            "Application built with {} middleware and {} routes",
            self.middleware.len(),
            self.router.len()
        );
        Arc::new(Application {
            config: self.config,
            store: self.store,
            feed: self.feed,
            catalog: self.catalog,
            middleware: self.middleware,
            router: Arc::new(self.router),
        })
    }
}

pub struct Application {
    config: Arc<AppConfig>,
    store: Arc<dyn Store>,
    feed: ChangeFeed,
    catalog: Catalog,
    middleware: Vec<Arc<dyn Middleware>>,
    router: Arc<Router>,
}

impl Application {
    pub fn builder(config: AppConfig, store: Arc<dyn Store>) -> ApplicationBuilder {
        ApplicationBuilder {
            config: Arc::new(config),
            store,
            feed: ChangeFeed::default(),
            catalog: Catalog::default(),
            middleware: Vec::new(),
            router: Router::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Mounted resources with their schemas and policies
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Run every stage in order; the first failure aborts the chain.
    pub async fn run(&self, request: &mut Request) -> Result<(), HttpError> {
        self.run_middleware(request).await?;
        if request.is_sent() {
            return Ok(());
        }
        self.router.handle(request).await
    }

    /// Run the middleware stages without routing, e.g. to resolve the actor
    /// of a WebSocket subscription.
    pub async fn run_middleware(&self, request: &mut Request) -> Result<(), HttpError> {
        for middleware in &self.middleware {
            middleware.handle(request).await?;
            if request.is_sent() {
                break;
            }
        }
        Ok(())
    }

    /// Run the chain and guarantee the request ends up with a reply.
    pub async fn handle(&self, request: &mut Request) {
        request.set_expose_stack(self.config.errors.expose_stack);

        if let Err(err) = self.run(request).await {
            if err.status() >= 500 {
                tracing::error!("{} {} failed: {}", request.method(), request.pathname(), err);
            } else {
                tracing::debug!("{} {} rejected: {}", request.method(), request.pathname(), err);
            }
            err.send(request);
        }

        if !request.is_sent() {
            tracing::warn!("No response produced for {} {}", request.method(), request.pathname());
            HttpError::not_found(format!("Cannot {} {}", request.method(), request.pathname()))
                .send(request);
        }
    }

    /// Handle a decoded request and render the reply for its transport.
    pub async fn dispatch<T: Transport>(&self, transport: &T, mut request: Request) -> T::Output {
        let started = Instant::now();
        tracing::debug!(
            "→ {} {} ({})",
            request.method(),
            request.pathname(),
            request.protocol().as_str()
        );

        self.handle(&mut request).await;

        match request.take_reply() {
            Some(reply) => {
                tracing::info!(
                    protocol = request.protocol().as_str(),
                    method = %request.method(),
                    path = request.pathname(),
                    status = reply.status,
                    latency_ms = started.elapsed().as_millis() as u64,
                    "request completed"
                );
                transport.render(reply)
            }
            None => transport.render_error(
                HttpError::internal("Request completed without a response"),
                self.config.errors.expose_stack,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Method, Protocol};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl Middleware for Counter {
        async fn handle(&self, _request: &mut Request) -> Result<(), HttpError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Reject;

    #[async_trait]
    impl Middleware for Reject {
        async fn handle(&self, _request: &mut Request) -> Result<(), HttpError> {
            Err(HttpError::unauthorized("no entry"))
        }
    }

    fn builder() -> ApplicationBuilder {
        Application::builder(AppConfig::development(), Arc::new(MemoryStore::new()))
    }

    fn get(path: &str) -> Request {
        Request::new(Protocol::Http, Method::Get, path)
    }

    #[tokio::test]
    async fn stages_run_before_router() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut builder = builder();
        builder.middleware(Counter(hits.clone()));
        builder.middleware(Counter(hits.clone()));
        builder
            .route("get", "/ping", |req: &mut Request| {
                req.respond(200, Some(json!("pong")));
                Ok(())
            })
            .unwrap();
        let app = builder.build();

        let mut req = get("/ping");
        app.handle(&mut req).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(req.reply().unwrap().status, 200);
    }

    #[tokio::test]
    async fn first_failure_aborts_chain() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut builder = builder();
        builder.middleware(Reject);
        builder.middleware(Counter(hits.clone()));
        let app = builder.build();

        let mut req = get("/ping");
        app.handle(&mut req).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        let reply = req.reply().unwrap();
        assert_eq!(reply.status, 401);
        assert_eq!(reply.body.as_ref().unwrap()["message"], "no entry");
    }

    #[tokio::test]
    async fn silent_handler_becomes_not_found() {
        let mut builder = builder();
        builder.route("get", "/quiet", |_: &mut Request| Ok(())).unwrap();
        let app = builder.build();

        let mut req = get("/quiet");
        app.handle(&mut req).await;
        assert_eq!(req.reply().unwrap().status, 404);
    }
}
