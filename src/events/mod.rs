use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::store::Document;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

/// One successful write to a resource.
///
/// Only the action, resource and id go over the wire. `document` is the
/// written (or deleted) document, kept so subscribers can be checked against
/// the resource's read policy before delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "event")]
    pub action: ChangeAction,
    pub resource: String,
    pub id: String,
    #[serde(skip)]
    pub document: Option<Arc<Document>>,
}

impl ChangeEvent {
    pub fn new(resource: impl Into<String>, action: ChangeAction, id: impl Into<String>) -> Self {
        Self {
            action,
            resource: resource.into(),
            id: id.into(),
            document: None,
        }
    }

    pub fn with_document(mut self, document: Document) -> Self {
        self.document = Some(Arc::new(document));
        self
    }
}

/// Typed change-notification bus shared by every resource of an application.
///
/// Publishing never blocks; slow subscribers miss events and are told how
/// many through `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: ChangeEvent) {
        tracing::debug!("{:?} {} {}", event.action, event.resource, event.id);
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let feed = ChangeFeed::default();
        let mut rx = feed.subscribe();
        feed.publish(ChangeEvent::new("people", ChangeAction::Created, "1"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.resource, "people");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "event": "created", "resource": "people", "id": "1" })
        );
    }

    #[tokio::test]
    async fn document_snapshot_stays_off_the_wire() {
        let feed = ChangeFeed::default();
        let mut rx = feed.subscribe();
        let document = json!({ "id": "1", "name": "ada" }).as_object().cloned().unwrap();
        feed.publish(ChangeEvent::new("people", ChangeAction::Updated, "1").with_document(document));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.document.as_deref().unwrap()["name"], "ada");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "event": "updated", "resource": "people", "id": "1" })
        );
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        ChangeFeed::new(4).publish(ChangeEvent::new("people", ChangeAction::Deleted, "1"));
    }
}
