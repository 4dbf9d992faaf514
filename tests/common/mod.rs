#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::StatusCode;
use serde_json::Value;
use tower::ServiceExt;

use docrest::authorization::{AllowAll, Authorization};
use docrest::config::AppConfig;
use docrest::middleware::Authenticate;
use docrest::schema::{FieldDef, FieldType};
use docrest::server::{self, HttpServer};
use docrest::store::MemoryStore;
use docrest::{Application, ApplicationBuilder, Document, Resource, Schema};

pub const SECRET: &str = "test-secret";

pub fn people_schema() -> Schema {
    Schema::new("people")
        .field("name", FieldDef::new(FieldType::String).required())
        .field("email", FieldDef::new(FieldType::String).unique())
        .field("age", FieldDef::new(FieldType::Integer))
        .field(
            "gender",
            FieldDef::new(FieldType::String).enum_values(["male", "female", "other"]),
        )
        .field("password", FieldDef::new(FieldType::String).protected())
        .field("owner", FieldDef::new(FieldType::String).readonly())
        .field("role", FieldDef::new(FieldType::String).default_value("member"))
        .field("friend", FieldDef::new(FieldType::Reference).reference("people"))
        .timestamps(true)
}

pub fn config() -> AppConfig {
    let mut config = AppConfig::development();
    config.auth.jwt_secret = SECRET.to_string();
    config.errors.expose_stack = false;
    config
}

/// Application with the people resource, every verb exposed
pub fn builder_with(config: AppConfig, policy: Arc<dyn Authorization>) -> ApplicationBuilder {
    let auth = Authenticate::from_config(&config.auth);
    let mut builder = Application::builder(config, Arc::new(MemoryStore::new()));
    builder.middleware(auth);
    builder
        .resource(
            Resource::builder("people", people_schema())
                .authorization_shared(policy)
                .list_methods(docrest::Method::ALL)
                .detail_methods(docrest::Method::ALL),
        )
        .expect("people resource mounts");
    builder
}

pub fn app_with(policy: Arc<dyn Authorization>) -> Arc<Application> {
    builder_with(config(), policy).build()
}

pub fn app() -> Arc<Application> {
    app_with(Arc::new(AllowAll))
}

/// Insert documents straight into the store, bypassing policies
pub async fn seed(app: &Application, documents: Vec<Value>) -> Result<Vec<Document>> {
    let collection = app.store().collection(&people_schema()).await?;
    let mut inserted = Vec::with_capacity(documents.len());
    for document in documents {
        let document = document.as_object().cloned().context("seed documents are objects")?;
        inserted.push(collection.insert(document).await?);
    }
    Ok(inserted)
}

pub fn id_of(document: &Document) -> String {
    document["id"].as_str().unwrap_or_default().to_string()
}

/// One in-process HTTP exchange; returns the status and the parsed payload
/// (`Value::Null` for empty bodies).
pub async fn call(app: &Arc<Application>, method: &str, uri: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
    call_with(app, method, uri, body, &[]).await
}

pub async fn call_with(
    app: &Arc<Application>,
    method: &str,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> Result<(StatusCode, Value)> {
    let mut request = axum::http::Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?,
        None => request.body(Body::empty())?,
    };

    let response = server::router(Arc::clone(app)).oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let payload = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, payload))
}

/// Serve `app` on an ephemeral port until the test runtime shuts down
pub async fn spawn(app: Arc<Application>) -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = HttpServer::new(app)
            .run(listener, std::future::pending::<()>())
            .await;
    });
    Ok(address)
}
