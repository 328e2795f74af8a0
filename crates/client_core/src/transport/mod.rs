use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use shared::domain::{RoomId, StreamKind, SubscriptionId};
use tokio::sync::broadcast;

mod ddp;
mod http;

pub use ddp::DdpStream;
pub use http::{HttpTransport, ServerTransport};

pub const DEFAULT_SUBSCRIPTION_LIMIT: u32 = 50;
pub(crate) const PUSH_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

impl RestRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
            headers: Vec::new(),
        }
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Status and body exactly as received; interpretation belongs to the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub limit: u32,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_SUBSCRIPTION_LIMIT,
        }
    }
}

/// Server publication backing one (room, stream kind) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub room_id: RoomId,
    pub kind: StreamKind,
    pub name: &'static str,
    pub params: Vec<Value>,
}

impl StreamRequest {
    pub fn for_kind(room_id: &RoomId, kind: StreamKind, options: SubscribeOptions) -> Self {
        let rid = room_id.as_str();
        let (name, target) = match kind {
            StreamKind::RoomMessages => ("stream-room-messages", rid.to_owned()),
            StreamKind::RoomTyping => ("stream-notify-room", format!("{rid}/typing")),
            StreamKind::RoomDelete => ("stream-notify-room", format!("{rid}/deleteMessage")),
            StreamKind::RoomFiles => ("roomFiles", rid.to_owned()),
            StreamKind::MentionedMessages => ("mentionedMessages", rid.to_owned()),
            StreamKind::StarredMessages => ("starredMessages", rid.to_owned()),
            StreamKind::PinnedMessages => ("pinnedMessages", rid.to_owned()),
            StreamKind::SnippetedMessages => ("snippetedMessages", rid.to_owned()),
        };
        // Event streams take a "use collection" flag, record sets a limit.
        let second = if kind.is_record_set() {
            json!(options.limit)
        } else {
            json!(false)
        };
        Self {
            room_id: room_id.clone(),
            kind,
            name,
            params: vec![json!(target), second],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushKind {
    Add,
    Change,
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub subscription_id: SubscriptionId,
    /// Room the owning subscription was opened for.
    pub room_id: RoomId,
    pub kind: PushKind,
    pub payload: Value,
    /// Fields the server dropped from the record; only set on `Change`.
    pub cleared: Vec<String>,
}

impl PushEvent {
    pub fn new(
        subscription_id: SubscriptionId,
        room_id: RoomId,
        kind: PushKind,
        payload: Value,
    ) -> Self {
        Self {
            subscription_id,
            room_id,
            kind,
            payload,
            cleared: Vec::new(),
        }
    }

    pub fn with_cleared(mut self, cleared: Vec<String>) -> Self {
        self.cleared = cleared;
        self
    }
}

/// Process-wide connection to the server. Implementations synchronize
/// internally; many rooms multiplex their subscriptions over one transport.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, request: RestRequest) -> Result<RawResponse>;
    async fn open_subscription(&self, request: &StreamRequest) -> Result<SubscriptionId>;
    /// Best effort.
    async fn close_subscription(&self, subscription_id: &SubscriptionId) -> Result<()>;
    /// Invokes a server method over the streaming channel and returns its result.
    async fn call_method(&self, method: &str, params: Vec<Value>) -> Result<Value>;
    fn push_events(&self) -> broadcast::Receiver<PushEvent>;
}

#[cfg(test)]
#[path = "../tests/transport_tests.rs"]
mod tests;
