use serde_json::{json, Map, Value};

use super::status;

/// A response recorded by `Request::send`, waiting to be rendered by a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub meta: Map<String, Value>,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

impl Reply {
    pub fn new(status: u16, meta: Map<String, Value>, body: Option<Value>) -> Self {
        Self {
            status,
            meta,
            body,
            headers: Vec::new(),
        }
    }

    /// Reason phrase for the reply status
    pub fn message(&self) -> &'static str {
        status::reason(self.status)
    }

    /// Build the wire envelope: `{meta: {status, message, ...meta}, body}`.
    ///
    /// `status` and `message` always win over same-named keys in `meta`.
    pub fn envelope(&self) -> Value {
        let mut meta = Map::new();
        meta.insert("status".into(), json!(self.status));
        meta.insert("message".into(), json!(self.message()));
        for (key, value) in &self.meta {
            if key != "status" && key != "message" {
                meta.insert(key.clone(), value.clone());
            }
        }

        let mut envelope = Map::new();
        envelope.insert("meta".into(), Value::Object(meta));
        if let Some(body) = &self.body {
            envelope.insert("body".into(), body.clone());
        }
        Value::Object(envelope)
    }

    /// Value of a header set on the reply (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
