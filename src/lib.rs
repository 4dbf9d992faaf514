//! Schema-driven REST and WebSocket CRUD over document stores.
//!
//! An [`Application`] owns a middleware chain and a router. Resources are
//! mounted from [`Schema`]s, guarded by an [`Authorization`] policy and
//! backed by a [`Store`]; the [`server`] module exposes the application
//! over axum.

pub mod app;
pub mod auth;
pub mod authorization;
pub mod config;
pub mod error;
pub mod events;
pub mod filter;
pub mod http;
pub mod middleware;
pub mod query;
pub mod request;
pub mod resource;
pub mod router;
pub mod schema;
pub mod server;
pub mod store;

pub use app::{Application, ApplicationBuilder, Middleware};
pub use authorization::{AllowAll, Authorization, DenyAll, PredicateAuthorization, Verb};
pub use config::AppConfig;
pub use error::HttpError;
pub use request::{Method, Protocol, Request};
pub use resource::{Resource, ResourceBuilder, ResourceDefinition};
pub use schema::Schema;
pub use store::{Collection, Document, Store};
