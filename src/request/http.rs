use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use futures::StreamExt;
use serde_json::{Map, Value};

use super::{Method, Protocol, Request, Transport};
use crate::error::HttpError;
use crate::http::Reply;

/// HTTP side of the request abstraction
#[derive(Debug, Clone)]
pub struct HttpTransport {
    max_body_bytes: usize,
}

impl HttpTransport {
    pub fn new(max_body_bytes: usize) -> Self {
        Self { max_body_bytes }
    }

    /// Normalize an axum request, reading at most `max_body_bytes` of body.
    pub async fn read(&self, request: axum::extract::Request) -> Result<Request, HttpError> {
        let (parts, body) = request.into_parts();

        let method: Method = parts.method.as_str().parse()?;
        let target = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        if let Some(length) = content_length(&parts.headers) {
            if length > self.max_body_bytes {
                return Err(self.too_large());
            }
        }

        let bytes = self.read_body(body).await?;

        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let body = parse_body(&bytes, content_type)?;

        let headers = parts
            .headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v.to_string())));

        Ok(Request::new(Protocol::Http, method, target)
            .with_headers(headers)
            .with_body(body))
    }

    /// Buffer the body chunk by chunk, failing as soon as the running total
    /// passes the limit. Chunked bodies carry no Content-Length to pre-check.
    async fn read_body(&self, body: Body) -> Result<Vec<u8>, HttpError> {
        let mut stream = body.into_data_stream();
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| HttpError::bad_request(format!("Failed to read request body: {}", e)))?;
            if bytes.len() + chunk.len() > self.max_body_bytes {
                return Err(self.too_large());
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }

    fn too_large(&self) -> HttpError {
        HttpError::payload_too_large(format!(
            "Request body exceeds {} bytes",
            self.max_body_bytes
        ))
    }
}

impl Transport for HttpTransport {
    type Output = Response;

    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    fn render(&self, reply: Reply) -> Response {
        let status =
            StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut builder = Response::builder().status(status);
        for (name, value) in &reply.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
            builder.body(Body::empty())
        } else {
            builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(reply.envelope().to_string()))
        };

        response.unwrap_or_else(|e| {
            tracing::error!("Failed to build HTTP response: {}", e);
            let mut fallback = Response::new(Body::empty());
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
    }
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// Decode a raw body: JSON (the default), urlencoded forms, or plain text.
fn parse_body(bytes: &[u8], content_type: &str) -> Result<Option<Value>, HttpError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let form: Map<String, Value> = url::form_urlencoded::parse(bytes)
            .into_owned()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        return Ok(Some(Value::Object(form)));
    }

    if content_type.starts_with("text/") {
        return Ok(Some(Value::String(String::from_utf8_lossy(bytes).into_owned())));
    }

    Ok(Some(serde_json::from_slice(bytes)?))
}
