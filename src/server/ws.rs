//! WebSocket sessions.
//!
//! Each text frame is either a request frame, answered with exactly one
//! response frame carrying the same `id`, or a subscription frame:
//!
//! ```text
//! → {"id": 1, "method": "GET", "url": "/people?limit=2"}
//! ← {"id": 1, "status": 200, "message": "OK", "headers": [], "body": {...}}
//! → {"subscribe": ["people"], "headers": [["Authorization", "Bearer ..."]]}
//! ← {"subscribed": ["people"]}
//! ← {"event": "created", "resource": "people", "id": "..."}
//! ```
//!
//! A subscription frame runs through the middleware chain like a request,
//! and each event is delivered only when the resource's `read_detail`
//! policy admits the changed document for that subscriber. Unknown resource
//! names are ignored.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::app::Application;
use crate::error::HttpError;
use crate::events::ChangeEvent;
use crate::request::ws::{frame_id, WsResponseFrame};
use crate::request::{Method, Protocol, Request, Transport, WsFrame, WsTransport};

/// `{"subscribe": [...], "headers": [[k, v], ...]}`
#[derive(Debug, Deserialize)]
struct SubscribeFrame {
    subscribe: Vec<String>,
    #[serde(default)]
    headers: Vec<(String, String)>,
}

/// Change-feed state of one socket
struct Subscriber {
    resources: BTreeSet<String>,
    /// The latest subscription frame, after middleware; carries the actor
    context: Request,
}

pub async fn upgrade(ws: WebSocketUpgrade, State(app): State<Arc<Application>>) -> Response {
    ws.on_upgrade(move |socket| session(socket, app))
}

async fn session(socket: WebSocket, app: Arc<Application>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = app.feed().subscribe();
    let mut subscriber = Subscriber {
        resources: BTreeSet::new(),
        context: Request::new(Protocol::Ws, Method::Get, &app.config().server.ws_path),
    };
    tracing::debug!("WebSocket session opened");

    loop {
        let outbound = tokio::select! {
            message = receiver.next() => match message {
                Some(Ok(Message::Text(text))) => handle_text(&app, &text, &mut subscriber).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::warn!("WebSocket error: {}", e);
                    break;
                }
            },
            event = events.recv() => match event {
                Ok(event) if subscriber.resources.contains(&event.resource) => {
                    if !visible(&app, &event, &subscriber.context).await {
                        continue;
                    }
                    json!(event)
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("WebSocket subscriber lagged, {} events dropped", missed);
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };

        if sender.send(Message::Text(outbound.to_string())).await.is_err() {
            break;
        }
    }

    tracing::debug!("WebSocket session closed");
}

/// Answer one inbound text frame
async fn handle_text(app: &Application, text: &str, subscriber: &mut Subscriber) -> Value {
    let transport = WsTransport::new(frame_id(text));

    if let Some(frame) = subscription(text) {
        return match subscribe(app, frame, subscriber).await {
            Ok(()) => json!({ "subscribed": subscriber.resources }),
            Err(err) => encode(transport.render_error(err, app.config().errors.expose_stack)),
        };
    }

    let max_bytes = app.config().server.max_body_bytes;
    let response = match WsFrame::decode(text, max_bytes).and_then(WsFrame::into_request) {
        Ok(request) => app.dispatch(&transport, request).await,
        Err(err) => {
            tracing::debug!("Rejected WebSocket frame: {}", err);
            transport.render_error(err, app.config().errors.expose_stack)
        }
    };
    encode(response)
}

/// Authenticate the frame through the middleware chain, then add every
/// mounted resource it names.
async fn subscribe(
    app: &Application,
    frame: SubscribeFrame,
    subscriber: &mut Subscriber,
) -> Result<(), HttpError> {
    let mut context = Request::new(Protocol::Ws, Method::Get, &app.config().server.ws_path)
        .with_headers(frame.headers);
    app.run_middleware(&mut context).await?;

    for name in frame.subscribe {
        if app.catalog().get(&name).is_some() {
            subscriber.resources.insert(name);
        } else {
            tracing::debug!("Ignoring subscription to unknown resource {}", name);
        }
    }
    subscriber.context = context;
    Ok(())
}

/// Whether the subscriber may read the document behind an event
async fn visible(app: &Application, event: &ChangeEvent, context: &Request) -> bool {
    let (Some(entry), Some(document)) = (app.catalog().get(&event.resource), event.document.as_deref())
    else {
        return false;
    };
    match entry.authorization.read_detail(document, context).await {
        Ok(allowed) => allowed,
        Err(err) => {
            tracing::debug!("Withholding {} event {}: {}", event.resource, event.id, err);
            false
        }
    }
}

fn encode(response: WsResponseFrame) -> Value {
    serde_json::to_value(&response).unwrap_or_else(|e| {
        tracing::error!("Failed to encode WebSocket response: {}", e);
        json!({ "status": 500, "message": "Internal Server Error" })
    })
}

/// A `{"subscribe": [...]}` frame, if that is what `text` is
fn subscription(text: &str) -> Option<SubscribeFrame> {
    let frame: Value = serde_json::from_str(text).ok()?;
    if !frame.as_object()?.contains_key("subscribe") {
        return None;
    }
    serde_json::from_value(frame).ok()
}
