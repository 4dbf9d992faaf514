//! Transport-agnostic request abstraction.
//!
//! HTTP requests and WebSocket frames are both normalized into a
//! [`Request`]. Handlers read from it and reply with [`Request::send`];
//! the originating [`Transport`] renders the recorded [`Reply`] into its
//! own wire format afterwards.

pub mod http;
pub mod transport;
pub mod ws;

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::auth::Actor;
use crate::http::Reply;

pub use self::http::HttpTransport;
pub use transport::Transport;
pub use ws::{WsFrame, WsTransport};

pub type Params = HashMap<String, String>;

/// HTTP verbs understood by the framework
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    /// Canonical order, used when listing allowed methods
    pub const ALL: [Method; 7] = [
        Method::Get,
        Method::Head,
        Method::Post,
        Method::Put,
        Method::Patch,
        Method::Delete,
        Method::Options,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Method {0} is not supported")]
pub struct UnsupportedMethod(pub String);

impl FromStr for Method {
    type Err = UnsupportedMethod;

    /// Case-insensitive; `del` is accepted for `delete`.
    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token.trim().to_ascii_lowercase().as_str() {
            "get" => Ok(Method::Get),
            "head" => Ok(Method::Head),
            "post" => Ok(Method::Post),
            "put" => Ok(Method::Put),
            "patch" => Ok(Method::Patch),
            "delete" | "del" => Ok(Method::Delete),
            "options" => Ok(Method::Options),
            _ => Err(UnsupportedMethod(token.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<UnsupportedMethod> for crate::error::HttpError {
    fn from(err: UnsupportedMethod) -> Self {
        crate::error::HttpError::not_implemented(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Ws,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Ws => "ws",
        }
    }
}

/// One inbound message, owned by a single handling flow.
#[derive(Debug)]
pub struct Request {
    method: Method,
    pathname: String,
    query: HashMap<String, String>,
    headers: HashMap<String, String>,
    body: Option<Value>,
    params: Params,
    protocol: Protocol,
    actor: Option<Actor>,
    response_headers: Vec<(String, String)>,
    reply: Option<Reply>,
    expose_stack: bool,
}

impl Request {
    /// Build a request from a method and a target such as `/people?limit=2`.
    pub fn new(protocol: Protocol, method: Method, target: &str) -> Self {
        let (pathname, query) = split_target(target);
        Self {
            method,
            pathname,
            query,
            headers: HashMap::new(),
            body: None,
            params: Params::new(),
            protocol,
            actor: None,
            response_headers: Vec::new(),
            reply: None,
            expose_stack: false,
        }
    }

    /// Add headers; names are lower-cased
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self.headers
                .insert(name.as_ref().to_ascii_lowercase(), value.into());
        }
        self
    }

    pub fn with_body(mut self, body: Option<Value>) -> Self {
        self.body = body;
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn pathname(&self) -> &str {
        &self.pathname
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn take_body(&mut self) -> Option<Value> {
        self.body.take()
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Set by the router once a route matched
    pub fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    pub fn actor(&self) -> Option<&Actor> {
        self.actor.as_ref()
    }

    pub fn set_actor(&mut self, actor: Actor) {
        self.actor = Some(actor);
    }

    pub fn expose_stack(&self) -> bool {
        self.expose_stack
    }

    pub fn set_expose_stack(&mut self, expose: bool) {
        self.expose_stack = expose;
    }

    /// Set a response header; replaces an existing header of the same name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(reply) = self.reply.as_mut() {
            set_or_replace(&mut reply.headers, name, value);
        } else {
            set_or_replace(&mut self.response_headers, name, value);
        }
    }

    /// Record the response. Only the first call takes effect.
    ///
    /// HEAD requests keep status, meta and headers but drop the body.
    pub fn send(&mut self, status: u16, meta: Map<String, Value>, body: Option<Value>) {
        if let Some(existing) = &self.reply {
            tracing::warn!(
                "Ignoring second response {} for {} {} (already sent {})",
                status,
                self.method,
                self.pathname,
                existing.status
            );
            return;
        }

        let body = if self.method == Method::Head { None } else { body };
        let mut reply = Reply::new(status, meta, body);
        reply.headers = std::mem::take(&mut self.response_headers);
        self.reply = Some(reply);
    }

    /// Shorthand for `send` without extra meta
    pub fn respond(&mut self, status: u16, body: Option<Value>) {
        self.send(status, Map::new(), body);
    }

    pub fn is_sent(&self) -> bool {
        self.reply.is_some()
    }

    pub fn reply(&self) -> Option<&Reply> {
        self.reply.as_ref()
    }

    pub fn take_reply(&mut self) -> Option<Reply> {
        self.reply.take()
    }
}

fn set_or_replace(headers: &mut Vec<(String, String)>, name: String, value: String) {
    if let Some(slot) = headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
        slot.1 = value;
    } else {
        headers.push((name, value));
    }
}

/// Split `/path?a=1&b=2` into a pathname and decoded query parameters.
///
/// Repeated keys keep the last value.
pub fn split_target(target: &str) -> (String, HashMap<String, String>) {
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    };

    let pathname = if path.is_empty() { "/".to_string() } else { path.to_string() };
    let query = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    (pathname, query)
}
