//! Typed request/response message bus between the assistant core and its host.
//!
//! `send` resolves to `None` when nobody answers; that is a normal outcome,
//! not an error.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::Settings;
use crate::error::BusError;

/// Discriminant of [`BusMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    OpenSidepanel,
    GetTabInfo,
    GetPageContent,
    ScreenshotCaptured,
    SelectionText,
    UpdateSettings,
    GetPageStats,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageType::OpenSidepanel => "OPEN_SIDEPANEL",
            MessageType::GetTabInfo => "GET_TAB_INFO",
            MessageType::GetPageContent => "GET_PAGE_CONTENT",
            MessageType::ScreenshotCaptured => "SCREENSHOT_CAPTURED",
            MessageType::SelectionText => "SELECTION_TEXT",
            MessageType::UpdateSettings => "UPDATE_SETTINGS",
            MessageType::GetPageStats => "GET_PAGE_STATS",
        };
        f.write_str(name)
    }
}

/// Selected screen region of a capture, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A bus message. Serialized as `{"type": "...", "payload": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusMessage {
    OpenSidepanel {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
    GetTabInfo,
    GetPageContent,
    ScreenshotCaptured {
        #[serde(rename = "imageData")]
        image_data: String,
        rect: CaptureRect,
    },
    SelectionText {
        text: String,
    },
    UpdateSettings {
        settings: Box<Settings>,
    },
    GetPageStats,
}

impl BusMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            BusMessage::OpenSidepanel { .. } => MessageType::OpenSidepanel,
            BusMessage::GetTabInfo => MessageType::GetTabInfo,
            BusMessage::GetPageContent => MessageType::GetPageContent,
            BusMessage::ScreenshotCaptured { .. } => MessageType::ScreenshotCaptured,
            BusMessage::SelectionText { .. } => MessageType::SelectionText,
            BusMessage::UpdateSettings { .. } => MessageType::UpdateSettings,
            BusMessage::GetPageStats => MessageType::GetPageStats,
        }
    }
}

/// Response to `GET_PAGE_CONTENT`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContent {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
}

/// Response to `GET_TAB_INFO`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub url: String,
    pub title: String,
}

type Handler = Arc<dyn Fn(BusMessage) -> BoxFuture<'static, Option<Value>> + Send + Sync>;

struct Listener {
    id: u64,
    message_type: MessageType,
    handler: Handler,
}

type Listeners = RwLock<Vec<Listener>>;

/// Registration returned by [`MessageBus::on_message`].
#[must_use = "dropping a Subscription keeps the listener; call unsubscribe() to remove it"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    /// Remove the listener. A no-op once the bus is gone.
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .retain(|l| l.id != self.id);
        }
    }
}

/// In-process message bus with per-type listeners.
#[derive(Default)]
pub struct MessageBus {
    listeners: Arc<Listeners>,
    next_id: AtomicU64,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen for messages of `message_type`. The handler's `Some` return is
    /// the response to [`send`](Self::send).
    pub fn on_message<F, Fut>(&self, message_type: MessageType, handler: F) -> Subscription
    where
        F: Fn(BusMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<Value>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handler: Handler = Arc::new(move |message| handler(message).boxed());
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Listener {
                id,
                message_type,
                handler,
            });
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    fn handlers_for(&self, message_type: MessageType) -> Vec<Handler> {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|l| l.message_type == message_type)
            .map(|l| Arc::clone(&l.handler))
            .collect()
    }

    /// Deliver `message` to matching listeners in registration order until
    /// one responds. `None` when no listener is registered or none responds.
    pub async fn send(&self, message: BusMessage) -> Option<Value> {
        let message_type = message.message_type();
        let handlers = self.handlers_for(message_type);
        if handlers.is_empty() {
            debug!(message_type = %message_type, "No listener for bus message");
            return None;
        }
        for handler in handlers {
            if let Some(response) = handler(message.clone()).await {
                return Some(response);
            }
        }
        None
    }

    /// Deliver `message` to every matching listener without waiting.
    /// Returns how many listeners it was handed to.
    pub fn post(&self, message: BusMessage) -> usize {
        let handlers = self.handlers_for(message.message_type());
        for handler in &handlers {
            tokio::spawn(handler(message.clone()));
        }
        handlers.len()
    }

    /// `send` with a typed response.
    pub async fn request<T: DeserializeOwned>(&self, message: BusMessage) -> Result<Option<T>, BusError> {
        let message_type = message.message_type();
        match self.send(message).await {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| BusError::InvalidResponse {
                    message_type: message_type.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    pub async fn request_page_content(&self) -> Result<Option<PageContent>, BusError> {
        self.request(BusMessage::GetPageContent).await
    }

    pub async fn request_tab_info(&self) -> Result<Option<TabInfo>, BusError> {
        self.request(BusMessage::GetTabInfo).await
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn send_without_listener_is_none() {
        let bus = MessageBus::new();
        assert!(bus.send(BusMessage::GetTabInfo).await.is_none());
        assert_eq!(bus.request_page_content().await.unwrap(), None);
    }

    #[tokio::test]
    async fn first_responding_listener_wins() {
        let bus = MessageBus::new();
        let _silent = bus.on_message(MessageType::GetPageContent, |_| async { None });
        let _first = bus.on_message(MessageType::GetPageContent, |_| async {
            Some(json!({"url": "https://a.com", "title": "A", "content": "body"}))
        });
        let _second = bus.on_message(MessageType::GetPageContent, |_| async {
            Some(json!({"url": "https://b.com", "title": "B"}))
        });
        let _other = bus.on_message(MessageType::GetTabInfo, |_| async { Some(json!(1)) });

        let page = bus.request_page_content().await.unwrap().unwrap();
        assert_eq!(page.url, "https://a.com");
        assert_eq!(page.content, "body");
    }

    #[tokio::test]
    async fn unsubscribe_removes_listener() {
        let bus = MessageBus::new();
        let sub = bus.on_message(MessageType::GetTabInfo, |_| async {
            Some(json!({"url": "https://a.com", "title": "A"}))
        });
        assert!(bus.request_tab_info().await.unwrap().is_some());

        sub.unsubscribe();
        assert_eq!(bus.listener_count(), 0);
        assert!(bus.request_tab_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_response_is_reported() {
        let bus = MessageBus::new();
        let _sub = bus.on_message(MessageType::GetPageContent, |_| async { Some(json!("nope")) });
        assert!(matches!(
            bus.request_page_content().await,
            Err(BusError::InvalidResponse { message_type, .. }) if message_type == "GET_PAGE_CONTENT"
        ));
    }

    #[tokio::test]
    async fn post_reaches_every_listener() {
        let bus = MessageBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let seen = Arc::clone(&seen);
            let _ = bus.on_message(MessageType::SelectionText, move |message| {
                let seen = Arc::clone(&seen);
                async move {
                    if let BusMessage::SelectionText { text } = message {
                        assert_eq!(text, "highlighted");
                        seen.fetch_add(1, Ordering::SeqCst);
                    }
                    None
                }
            });
        }

        let delivered = bus.post(BusMessage::SelectionText {
            text: "highlighted".into(),
        });
        assert_eq!(delivered, 3);
        tokio::time::timeout(Duration::from_secs(2), async {
            while seen.load(Ordering::SeqCst) < 3 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("all listeners should run");
    }

    #[test]
    fn wire_format_is_type_and_payload() {
        let message = BusMessage::ScreenshotCaptured {
            image_data: "data:image/png;base64,AAAA".into(),
            rect: CaptureRect {
                x: 1.0,
                y: 2.0,
                width: 30.0,
                height: 40.0,
            },
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "SCREENSHOT_CAPTURED");
        assert_eq!(value["payload"]["imageData"], "data:image/png;base64,AAAA");
        assert_eq!(value["payload"]["rect"]["width"], 30.0);

        let parsed: BusMessage = serde_json::from_value(json!({"type": "GET_PAGE_STATS"})).unwrap();
        assert_eq!(parsed.message_type(), MessageType::GetPageStats);

        let parsed: BusMessage =
            serde_json::from_value(json!({"type": "OPEN_SIDEPANEL", "payload": {}})).unwrap();
        assert!(matches!(parsed, BusMessage::OpenSidepanel { context: None }));
    }
}
