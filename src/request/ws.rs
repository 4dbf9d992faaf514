use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Method, Protocol, Request, Transport};
use crate::error::HttpError;
use crate::http::Reply;

/// Inbound WebSocket request frame:
/// `{id?, method, url, headers: [[k, v], ...], body}`
#[derive(Debug, Clone, Deserialize)]
pub struct WsFrame {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<Value>,
}

/// Outbound WebSocket response frame:
/// `{id?, status, message, headers: [[k, v], ...], body}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WsResponseFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub status: u16,
    pub message: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl WsFrame {
    pub fn decode(text: &str, max_bytes: usize) -> Result<Self, HttpError> {
        if text.len() > max_bytes {
            return Err(HttpError::payload_too_large(format!(
                "Frame exceeds {} bytes",
                max_bytes
            )));
        }
        serde_json::from_str(text)
            .map_err(|e| HttpError::bad_request(format!("Invalid request frame: {}", e)))
    }

    pub fn into_request(self) -> Result<Request, HttpError> {
        let method: Method = self.method.parse()?;
        Ok(Request::new(Protocol::Ws, method, &self.url)
            .with_headers(self.headers)
            .with_body(self.body))
    }
}

/// Best-effort correlation id of a raw frame, so even undecodable frames
/// can be answered in kind.
pub fn frame_id(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text)
        .ok()?
        .get("id")
        .cloned()
        .filter(|id| !id.is_null())
}

/// WebSocket side of the request abstraction; one per inbound frame.
#[derive(Debug, Clone, Default)]
pub struct WsTransport {
    id: Option<Value>,
}

impl WsTransport {
    pub fn new(id: Option<Value>) -> Self {
        Self { id }
    }
}

impl Transport for WsTransport {
    type Output = WsResponseFrame;

    fn protocol(&self) -> Protocol {
        Protocol::Ws
    }

    fn render(&self, reply: Reply) -> WsResponseFrame {
        WsResponseFrame {
            id: self.id.clone(),
            status: reply.status,
            message: reply.message().to_string(),
            body: reply.envelope(),
            headers: reply.headers,
        }
    }
}
