//! Schema-driven CRUD resources.
//!
//! # Responsibilities
//! - Mount a list endpoint (`/{name}`) and a detail endpoint (`/{name}/:id`)
//! - Resolve the HTTP verb against the methods the resource exposes
//! - Gate every read and write through the resource's [`Authorization`]
//! - Publish a [`ChangeEvent`] for every successful write
//!
//! # Design Decisions
//! - OPTIONS is answered here with the exposed verbs; HEAD runs GET
//! - Detail denials are 401 after the existence check, so a denied
//!   document is distinguishable from a missing one
//! - List operations act on the authorized subset and never fail for
//!   partial denial
//! - The store collection is materialized once, on first use

mod catalog;
pub mod definition;
mod populate;
mod read;
mod write;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::authorization::{Authorization, Unimplemented};
use crate::config::QueryConfig;
use crate::error::HttpError;
use crate::events::{ChangeAction, ChangeEvent, ChangeFeed};
use crate::http::status;
use crate::request::{Method, Request};
use crate::router::{Handler, RouteError, Router};
use crate::schema::Schema;
use crate::store::{document_id, Collection, Document, Store};

pub use catalog::{Catalog, CatalogEntry};
pub use definition::{Access, DefinitionError, ResourceDefinition};

/// Server-side hook run on every new document after client fields are
/// sanitized and before defaults and validation.
pub type BeforeCreate =
    Arc<dyn Fn(Document, &Request) -> Result<Document, HttpError> + Send + Sync>;

const LIST_VERBS: [Method; 5] = [Method::Get, Method::Post, Method::Put, Method::Patch, Method::Delete];
const DETAIL_VERBS: [Method; 4] = [Method::Get, Method::Put, Method::Patch, Method::Delete];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    List,
    Detail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpdateStrategy {
    /// PUT: the payload becomes the document
    Replace,
    /// PATCH: top-level fields of the payload replace existing ones
    Patch,
}

pub struct ResourceBuilder {
    name: String,
    path: Option<String>,
    schema: Schema,
    authorization: Arc<dyn Authorization>,
    list_methods: BTreeSet<Method>,
    detail_methods: BTreeSet<Method>,
    before_create: Option<BeforeCreate>,
}

impl ResourceBuilder {
    pub fn authorization<A>(mut self, authorization: A) -> Self
    where
        A: Authorization + 'static,
    {
        self.authorization = Arc::new(authorization);
        self
    }

    pub fn authorization_shared(mut self, authorization: Arc<dyn Authorization>) -> Self {
        self.authorization = authorization;
        self
    }

    /// Mount point; defaults to `/{name}`
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn list_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.list_methods = supported(&self.name, "list", methods, &LIST_VERBS);
        self
    }

    pub fn detail_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.detail_methods = supported(&self.name, "detail", methods, &DETAIL_VERBS);
        self
    }

    pub fn before_create<F>(mut self, hook: F) -> Self
    where
        F: Fn(Document, &Request) -> Result<Document, HttpError> + Send + Sync + 'static,
    {
        self.before_create = Some(Arc::new(hook));
        self
    }

    pub fn build(
        self,
        store: Arc<dyn Store>,
        feed: ChangeFeed,
        catalog: Catalog,
        query: QueryConfig,
    ) -> Arc<Resource> {
        let schema = Arc::new(self.schema);
        catalog.register(
            &self.name,
            CatalogEntry {
                schema: Arc::clone(&schema),
                authorization: Arc::clone(&self.authorization),
            },
        );

        let path = self.path.unwrap_or_else(|| format!("/{}", self.name));
        Arc::new(Resource {
            name: self.name,
            path: path.trim_end_matches('/').to_string(),
            schema,
            authorization: self.authorization,
            list_methods: self.list_methods,
            detail_methods: self.detail_methods,
            before_create: self.before_create,
            store,
            feed,
            catalog,
            query,
            collection: OnceCell::new(),
        })
    }
}

fn supported(
    name: &str,
    kind: &str,
    methods: impl IntoIterator<Item = Method>,
    allowed: &[Method],
) -> BTreeSet<Method> {
    methods
        .into_iter()
        .filter(|m| {
            let ok = allowed.contains(m);
            if !ok && !matches!(m, Method::Head | Method::Options) {
                tracing::warn!("Ignoring {} on {} {} endpoint", m, name, kind);
            }
            ok
        })
        .collect()
}

pub struct Resource {
    name: String,
    path: String,
    schema: Arc<Schema>,
    authorization: Arc<dyn Authorization>,
    list_methods: BTreeSet<Method>,
    detail_methods: BTreeSet<Method>,
    before_create: Option<BeforeCreate>,
    store: Arc<dyn Store>,
    feed: ChangeFeed,
    catalog: Catalog,
    query: QueryConfig,
    collection: OnceCell<Arc<dyn Collection>>,
}

impl Resource {
    /// Start a resource; the trait-default policy answers 501 until one is set.
    pub fn builder(name: impl Into<String>, schema: Schema) -> ResourceBuilder {
        ResourceBuilder {
            name: name.into(),
            path: None,
            schema,
            authorization: Arc::new(Unimplemented),
            list_methods: [Method::Get, Method::Post].into_iter().collect(),
            detail_methods: DETAIL_VERBS.into_iter().collect(),
            before_create: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Register the list and detail endpoints on a router.
    pub fn mount(self: &Arc<Self>, router: &mut Router) -> Result<(), RouteError> {
        let list = if self.path.is_empty() { "/" } else { self.path.as_str() };
        router.push_shared(
            "all",
            list,
            Arc::new(Endpoint {
                resource: Arc::clone(self),
                kind: EndpointKind::List,
            }),
        )?;
        router.push_shared(
            "all",
            &format!("{}/:id", self.path),
            Arc::new(Endpoint {
                resource: Arc::clone(self),
                kind: EndpointKind::Detail,
            }),
        )?;
        Ok(())
    }

    /// The store collection, created on first use
    pub async fn collection(&self) -> Result<Arc<dyn Collection>, HttpError> {
        let collection = self
            .collection
            .get_or_try_init(|| async {
                tracing::debug!("Materializing collection for {}", self.name);
                self.store.collection(&self.schema).await
            })
            .await?;
        Ok(Arc::clone(collection))
    }

    pub fn methods(&self, kind: EndpointKind) -> &BTreeSet<Method> {
        match kind {
            EndpointKind::List => &self.list_methods,
            EndpointKind::Detail => &self.detail_methods,
        }
    }

    /// `Allow` value: exposed verbs in canonical order, HEAD implied by GET,
    /// OPTIONS always present.
    pub fn allow(&self, kind: EndpointKind) -> String {
        let exposed = self.methods(kind);
        Method::ALL
            .iter()
            .filter(|m| match m {
                Method::Head => exposed.contains(&Method::Get),
                Method::Options => true,
                other => exposed.contains(other),
            })
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    async fn dispatch(&self, kind: EndpointKind, request: &mut Request) -> Result<(), HttpError> {
        let method = request.method();

        if method == Method::Options {
            let allow = self.allow(kind);
            request.set_header("Allow", allow.clone());
            request.set_header("Access-Control-Allow-Methods", allow);
            request.respond(status::NO_CONTENT, None);
            return Ok(());
        }

        let verb = if method == Method::Head { Method::Get } else { method };
        if !self.methods(kind).contains(&verb) {
            request.set_header("Allow", self.allow(kind));
            return Err(HttpError::method_not_allowed(format!(
                "Method {} is not allowed on {}",
                method,
                request.pathname()
            )));
        }

        match (kind, verb) {
            (EndpointKind::List, Method::Get) => self.read_list(request).await,
            (EndpointKind::List, Method::Post) => self.create(request).await,
            (EndpointKind::List, Method::Put) => self.update_list(request, UpdateStrategy::Replace).await,
            (EndpointKind::List, Method::Patch) => self.update_list(request, UpdateStrategy::Patch).await,
            (EndpointKind::List, Method::Delete) => self.delete_list(request).await,
            (EndpointKind::Detail, Method::Get) => self.read_detail(request).await,
            (EndpointKind::Detail, Method::Put) => self.update_detail(request, UpdateStrategy::Replace).await,
            (EndpointKind::Detail, Method::Patch) => self.update_detail(request, UpdateStrategy::Patch).await,
            (EndpointKind::Detail, Method::Delete) => self.delete_detail(request).await,
            _ => Err(HttpError::method_not_allowed(format!(
                "Method {} is not allowed on {}",
                method,
                request.pathname()
            ))),
        }
    }

    fn id_param(&self, request: &Request) -> Result<String, HttpError> {
        request
            .param("id")
            .map(String::from)
            .ok_or_else(|| HttpError::not_found(format!("Missing {} id", self.name)))
    }

    fn not_found(&self, id: &str) -> HttpError {
        HttpError::not_found(format!("No {} found with id {}", self.name, id))
    }

    fn denied(&self, verb: &str) -> HttpError {
        HttpError::unauthorized(format!("Not authorized to {} {}", verb, self.name))
    }

    /// Outbound representation: protected fields stripped
    fn render(&self, document: &Document) -> Value {
        Value::Object(self.schema.serialize(document))
    }

    fn publish(&self, action: ChangeAction, document: &Document) {
        if let Some(id) = document_id(document) {
            self.feed
                .publish(ChangeEvent::new(&self.name, action, id).with_document(document.clone()));
        }
    }
}

fn count_meta(count: usize) -> Map<String, Value> {
    let mut meta = Map::new();
    meta.insert("count".to_string(), json!(count));
    meta
}

/// Router-facing handler for one endpoint of a resource
struct Endpoint {
    resource: Arc<Resource>,
    kind: EndpointKind,
}

#[async_trait]
impl Handler for Endpoint {
    async fn call(&self, request: &mut Request) -> Result<(), HttpError> {
        self.resource.dispatch(self.kind, request).await
    }
}
