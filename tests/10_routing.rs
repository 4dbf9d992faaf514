mod common;

use std::sync::Arc;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

use docrest::authorization::Unimplemented;
use docrest::server::HealthCheck;
use docrest::{Method, Request, Resource};

#[tokio::test]
async fn unknown_path_is_not_found() -> Result<()> {
    let app = common::app();
    let (status, payload) = common::call(&app, "GET", "/nowhere", None).await?;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(payload["meta"]["status"], 404);
    assert_eq!(payload["meta"]["message"], "Not Found");
    assert_eq!(payload["body"]["message"], "Cannot GET /nowhere");
    Ok(())
}

#[tokio::test]
async fn unknown_verb_is_not_implemented() -> Result<()> {
    let app = common::app();
    let (status, _) = common::call(&app, "TRACE", "/people", None).await?;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    Ok(())
}

#[tokio::test]
async fn options_lists_exposed_verbs() -> Result<()> {
    let mut builder = docrest::Application::builder(common::config(), Arc::new(docrest::store::MemoryStore::new()));
    builder.resource(
        Resource::builder("people", common::people_schema())
            .authorization(docrest::AllowAll)
            .list_methods([Method::Get, Method::Post]),
    )?;
    let app = builder.build();

    let request = axum::http::Request::builder()
        .method("OPTIONS")
        .uri("/people")
        .body(axum::body::Body::empty())?;
    let response = tower::ServiceExt::oneshot(docrest::server::router(app.clone()), request).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.headers()["allow"], "GET, HEAD, POST, OPTIONS");
    assert_eq!(
        response.headers()["access-control-allow-methods"],
        "GET, HEAD, POST, OPTIONS"
    );

    // A verb the list endpoint does not expose
    let (status, _) = common::call(&app, "DELETE", "/people", None).await?;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    Ok(())
}

#[tokio::test]
async fn head_runs_get_without_body() -> Result<()> {
    let app = common::app();
    common::seed(&app, vec![json!({ "name": "ada" })]).await?;

    let (status, payload) = common::call(&app, "HEAD", "/people", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(payload.is_null() || payload.get("body").is_none());
    Ok(())
}

#[tokio::test]
async fn missing_policy_answers_not_implemented() -> Result<()> {
    let app = common::app_with(Arc::new(Unimplemented));
    let (status, payload) = common::call(&app, "GET", "/people", None).await?;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert!(payload["body"]["message"]
        .as_str()
        .unwrap_or_default()
        .contains("read_list"));
    Ok(())
}

#[tokio::test]
async fn first_registered_route_wins() -> Result<()> {
    let mut builder = common::builder_with(common::config(), Arc::new(docrest::AllowAll));
    builder.route("get", "/people/me", |req: &mut Request| {
        req.respond(200, Some(json!({ "me": true })));
        Ok(())
    })?;
    let app = builder.build();

    // The resource's detail route was registered first and shadows /people/me
    let (status, _) = common::call(&app, "GET", "/people/me", None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn health_reports_store_status() -> Result<()> {
    let mut builder = common::builder_with(common::config(), Arc::new(docrest::AllowAll));
    let store = Arc::clone(builder.store());
    builder.route("get", "/health", HealthCheck::new(store))?;
    let app = builder.build();

    let (status, payload) = common::call(&app, "GET", "/health", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["body"]["status"], "ok");
    Ok(())
}
