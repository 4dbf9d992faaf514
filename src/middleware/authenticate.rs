use async_trait::async_trait;

use crate::app::Middleware;
use crate::auth::{extract_bearer, validate_jwt, Actor, AuthError};
use crate::config::AuthConfig;
use crate::error::HttpError;
use crate::request::Request;

/// JWT authentication stage: validates `Authorization: Bearer <jwt>` and
/// attaches the caller as the request actor.
///
/// A missing header only fails when authentication is required; a header
/// that is present but invalid always fails.
pub struct Authenticate {
    secret: String,
    required: bool,
}

impl Authenticate {
    pub fn new(secret: impl Into<String>, required: bool) -> Self {
        Self {
            secret: secret.into(),
            required,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.jwt_secret.clone(), config.required)
    }
}

#[async_trait]
impl Middleware for Authenticate {
    async fn handle(&self, request: &mut Request) -> Result<(), HttpError> {
        let Some(header) = request.header("authorization") else {
            if self.required {
                return Err(AuthError::MissingHeader.into());
            }
            return Ok(());
        };

        let token = extract_bearer(header)?;
        let claims = validate_jwt(token, &self.secret)?;
        tracing::debug!("Authenticated {} for {}", claims.sub, request.pathname());
        request.set_actor(Actor::from(claims));
        Ok(())
    }
}
