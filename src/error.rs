// HTTP API error normalization
use serde_json::{json, Map, Value};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::BTreeMap;

use crate::http::status;
use crate::request::Request;

/// Normalized API error, classified by HTTP status.
///
/// Every failure in the request pipeline converges on this type, either
/// through an explicit constructor or through one of the `From` impls
/// below, and is written to the client with [`HttpError::send`].
#[derive(Debug)]
pub struct HttpError {
    status: u16,
    message: String,
    details: Option<Value>,
    stack: Option<String>,
}

impl HttpError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
            stack: capture_stack(),
        }
    }

    /// Get HTTP status code
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    /// Attach per-field error details (serialized as `field_errors`)
    pub fn with_field_errors(mut self, field_errors: BTreeMap<String, String>) -> Self {
        self.details = Some(json!(field_errors));
        self
    }

    /// Response body for this error: `{message, field_errors?, stack?}`
    pub fn to_body(&self, expose_stack: bool) -> Value {
        let mut body = Map::new();
        body.insert("message".into(), json!(self.message));
        if let Some(details) = &self.details {
            body.insert("field_errors".into(), details.clone());
        }
        if expose_stack {
            if let Some(stack) = &self.stack {
                body.insert("stack".into(), json!(stack));
            }
        }
        Value::Object(body)
    }

    /// Write this error into the request's response envelope.
    ///
    /// A request that already replied keeps its first reply.
    pub fn send(self, request: &mut Request) {
        let body = self.to_body(request.expose_stack());
        request.send(self.status, Map::new(), Some(body));
    }
}

// Static constructor methods, one per status the pipeline produces
impl HttpError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(status::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(status::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(status::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(status::NOT_FOUND, message)
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::new(status::METHOD_NOT_ALLOWED, message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(status::PAYLOAD_TOO_LARGE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(status::INTERNAL_SERVER_ERROR, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(status::NOT_IMPLEMENTED, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(status::SERVICE_UNAVAILABLE, message)
    }
}

/// Capture a backtrace when `RUST_BACKTRACE` enables it, trimmed to the
/// frames below the error constructor.
fn capture_stack() -> Option<String> {
    let backtrace = Backtrace::capture();
    if backtrace.status() != BacktraceStatus::Captured {
        return None;
    }
    Some(trim_stack(&backtrace.to_string()))
}

fn trim_stack(raw: &str) -> String {
    let lines: Vec<&str> = raw.lines().collect();
    let Some(last_ctor) = lines.iter().rposition(|l| l.contains("HttpError")) else {
        return raw.to_string();
    };
    lines[last_ctor + 1..]
        .iter()
        .skip_while(|l| l.trim_start().starts_with("at "))
        .copied()
        .collect::<Vec<_>>()
        .join("\n")
}

// Convert layer errors to HttpError
impl From<crate::store::StoreError> for HttpError {
    fn from(err: crate::store::StoreError) -> Self {
        use crate::store::StoreError;

        match err {
            StoreError::Cast(value) => {
                HttpError::bad_request(format!("Cast to id failed for value \"{}\"", value))
            }
            StoreError::Unsupported(msg) => HttpError::bad_request(msg),
            other => {
                let msg = other.to_string();
                if is_duplicate_key(&msg) {
                    return HttpError::bad_request(msg);
                }
                // Log the real error but return generic message
                tracing::error!("Store error: {}", msg);
                HttpError::internal("An error occurred while processing your request")
            }
        }
    }
}

fn is_duplicate_key(message: &str) -> bool {
    message.contains("duplicate key") || message.contains("E11000")
}

impl From<crate::filter::FilterError> for HttpError {
    fn from(err: crate::filter::FilterError) -> Self {
        HttpError::bad_request(err.to_string())
    }
}

impl From<crate::query::QueryError> for HttpError {
    fn from(err: crate::query::QueryError) -> Self {
        HttpError::bad_request(err.to_string())
    }
}

impl From<crate::schema::ValidationError> for HttpError {
    fn from(err: crate::schema::ValidationError) -> Self {
        let message = err.to_string();
        HttpError::bad_request(message).with_field_errors(err.into_field_errors())
    }
}

impl From<crate::auth::AuthError> for HttpError {
    fn from(err: crate::auth::AuthError) -> Self {
        HttpError::unauthorized(err.to_string())
    }
}

impl From<serde_json::Error> for HttpError {
    fn from(err: serde_json::Error) -> Self {
        HttpError::bad_request(format!("Invalid JSON: {}", err))
    }
}

// Standard error trait implementations
impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.status, status::reason(self.status), self.message)
    }
}

impl std::error::Error for HttpError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[test]
    fn classifies_store_errors() {
        let cast: HttpError = StoreError::Cast("nope".into()).into();
        assert_eq!(cast.status(), 400);

        let dup: HttpError = StoreError::DuplicateKey {
            collection: "people".into(),
            field: "email".into(),
        }
        .into();
        assert_eq!(dup.status(), 400);
        assert!(dup.message().contains("duplicate key"));

        let backend: HttpError = StoreError::Backend("disk on fire".into()).into();
        assert_eq!(backend.status(), 500);
        assert!(!backend.message().contains("disk"));
    }

    #[test]
    fn body_hides_stack_unless_exposed() {
        let mut err = HttpError::bad_request("bad");
        err.stack = Some("frame".into());
        assert!(err.to_body(false).get("stack").is_none());
        assert_eq!(err.to_body(true)["stack"], "frame");
        assert_eq!(err.to_body(false)["message"], "bad");
    }

    #[test]
    fn trims_frames_above_constructor() {
        let raw = "   0: std::backtrace::Backtrace::capture\n             at src/a.rs\n   1: docrest::error::HttpError::new\n             at src/error.rs:27\n   2: docrest::resource::detail\n             at src/resource/detail.rs:10";
        let trimmed = trim_stack(raw);
        assert!(trimmed.starts_with("   2: docrest::resource::detail"));
        assert!(!trimmed.contains("HttpError"));
    }
}
