mod common;

use std::sync::Arc;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

use docrest::auth::{generate_jwt, Claims};
use docrest::{AllowAll, Application, ResourceDefinition};

fn bearer(sub: &str, secret: &str) -> Result<String> {
    let token = generate_jwt(&Claims::new(sub, vec!["admin".to_string()], 1), secret)?;
    Ok(format!("Bearer {}", token))
}

#[tokio::test]
async fn required_auth_rejects_anonymous_requests() -> Result<()> {
    let mut config = common::config();
    config.auth.required = true;
    let app = common::builder_with(config, Arc::new(AllowAll)).build();

    let (status, _) = common::call(&app, "GET", "/people", None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let header = bearer("user-1", common::SECRET)?;
    let (status, _) = common::call_with(&app, "GET", "/people", None, &[("authorization", header.as_str())]).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn invalid_tokens_are_rejected_even_when_optional() -> Result<()> {
    let app = common::app();

    let forged = bearer("user-1", "some-other-secret")?;
    let (status, _) = common::call_with(&app, "GET", "/people", None, &[("authorization", forged.as_str())]).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = common::call_with(&app, "GET", "/people", None, &[("authorization", "Basic abc")]).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn authenticated_access_needs_an_actor() -> Result<()> {
    let definition = ResourceDefinition::from_yaml(
        r#"
name: notes
access: authenticated
fields:
  text: { type: string, required: true }
"#,
    )?;
    let config = common::config();
    let auth = docrest::middleware::Authenticate::from_config(&config.auth);
    let mut builder = Application::builder(config, Arc::new(docrest::store::MemoryStore::new()));
    builder.middleware(auth);
    builder.resource(definition.into_builder()?)?;
    let app = builder.build();

    let (status, _) = common::call(&app, "POST", "/notes", Some(json!({ "text": "hi" }))).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let header = bearer("user-1", common::SECRET)?;
    let auth = [("authorization", header.as_str())];
    let (status, created) = common::call_with(&app, "POST", "/notes", Some(json!({ "text": "hi" })), &auth).await?;
    assert_eq!(status, StatusCode::CREATED);

    // Anonymous list reads are filtered, not refused
    let (status, listed) = common::call(&app, "GET", "/notes", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["meta"]["count"], 0);

    let (_, listed) = common::call_with(&app, "GET", "/notes", None, &auth).await?;
    assert_eq!(listed["body"][0]["id"], created["body"]["id"]);
    Ok(())
}
