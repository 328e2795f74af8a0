use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use futures::{SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use shared::{
    domain::{RoomId, StreamKind, SubscriptionId},
    protocol::Token,
};
use tokio::{
    sync::{broadcast, mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{PushEvent, PushKind, StreamRequest};

#[derive(Debug, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
enum ServerFrame {
    Connected {
        #[serde(default)]
        session: Option<String>,
    },
    Failed {
        #[serde(default)]
        version: Option<String>,
    },
    Ping {
        #[serde(default)]
        id: Option<String>,
    },
    Ready {
        #[serde(default)]
        subs: Vec<String>,
    },
    Nosub {
        id: String,
        #[serde(default)]
        error: Option<Value>,
    },
    Added {
        collection: String,
        id: String,
        #[serde(default)]
        fields: Map<String, Value>,
    },
    Changed {
        collection: String,
        id: String,
        #[serde(default)]
        fields: Map<String, Value>,
        #[serde(default)]
        cleared: Vec<String>,
    },
    Removed {
        collection: String,
        id: String,
    },
    Result {
        id: String,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<Value>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone)]
struct Route {
    room_id: RoomId,
    kind: StreamKind,
    stream_name: &'static str,
    event_name: Option<String>,
    /// Record ids this subscription was sent an `added` or `changed` for.
    records: HashSet<String>,
}

impl Route {
    fn from_request(request: &StreamRequest) -> Self {
        let event_name = if request.name.starts_with("stream-") {
            request
                .params
                .first()
                .and_then(Value::as_str)
                .map(str::to_owned)
        } else {
            None
        };
        Self {
            room_id: request.room_id.clone(),
            kind: request.kind,
            stream_name: request.name,
            event_name,
            records: HashSet::new(),
        }
    }
}

/// Collection name the server publishes record-set streams into.
fn record_collection(kind: StreamKind) -> Option<&'static str> {
    match kind {
        StreamKind::RoomFiles => Some("room_files"),
        StreamKind::MentionedMessages => Some("rocketchat_mentioned_message"),
        StreamKind::StarredMessages => Some("rocketchat_starred_message"),
        StreamKind::PinnedMessages => Some("rocketchat_pinned_message"),
        StreamKind::SnippetedMessages => Some("rocketchat_snippeted_message"),
        StreamKind::RoomMessages | StreamKind::RoomTyping | StreamKind::RoomDelete => None,
    }
}

type AckSender = oneshot::Sender<std::result::Result<(), String>>;
type ResultSender = oneshot::Sender<std::result::Result<Value, String>>;

#[derive(Default)]
struct DdpState {
    pending: HashMap<SubscriptionId, AckSender>,
    routes: HashMap<SubscriptionId, Route>,
    methods: HashMap<String, ResultSender>,
}

pub struct DdpStream {
    outbound: mpsc::UnboundedSender<String>,
    state: Arc<Mutex<DdpState>>,
    connected: Arc<AtomicBool>,
    ack_timeout: Duration,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl DdpStream {
    pub async fn connect(
        url: &str,
        token: Option<Token>,
        pushes: broadcast::Sender<PushEvent>,
        ack_timeout: Duration,
    ) -> Result<Self> {
        let (ws_stream, _) = connect_async(url)
            .await
            .with_context(|| format!("failed to connect websocket: {url}"))?;
        let (mut ws_writer, ws_reader) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let connected = Arc::new(AtomicBool::new(true));

        let writer_connected = Arc::clone(&connected);
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(err) = ws_writer.send(Message::Text(frame)).await {
                    warn!("ddp: websocket send failed: {err}");
                    break;
                }
            }
            writer_connected.store(false, Ordering::SeqCst);
        });

        let state = Arc::new(Mutex::new(DdpState::default()));
        let reader_task = tokio::spawn(read_loop(
            ws_reader,
            outbound.clone(),
            Arc::clone(&state),
            pushes,
            Arc::clone(&connected),
        ));

        let stream = Self {
            outbound,
            state,
            connected,
            ack_timeout,
            reader_task,
            writer_task,
        };
        stream.send_frame(json!({"msg": "connect", "version": "1", "support": ["1"]}))?;
        if let Some(token) = token {
            stream.send_frame(json!({
                "msg": "method",
                "method": "login",
                "id": Uuid::new_v4().simple().to_string(),
                "params": [{"resume": token.auth_token}],
            }))?;
        }
        info!(%url, "ddp: stream connected");
        Ok(stream)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }

    fn send_frame(&self, frame: Value) -> Result<()> {
        self.outbound
            .send(frame.to_string())
            .map_err(|_| anyhow!("ddp stream is closed"))
    }

    pub async fn subscribe(&self, request: &StreamRequest) -> Result<SubscriptionId> {
        let subscription_id = SubscriptionId::new(Uuid::new_v4().simple().to_string());
        let (ack_tx, ack_rx) = oneshot::channel();
        {
            let mut guard = self.state.lock().await;
            guard.pending.insert(subscription_id.clone(), ack_tx);
            guard
                .routes
                .insert(subscription_id.clone(), Route::from_request(request));
        }

        let sent = self.send_frame(json!({
            "msg": "sub",
            "id": subscription_id.as_str(),
            "name": request.name,
            "params": request.params,
        }));
        if let Err(err) = sent {
            self.forget(&subscription_id).await;
            return Err(err);
        }

        match tokio::time::timeout(self.ack_timeout, ack_rx).await {
            Ok(Ok(Ok(()))) => {
                debug!(
                    subscription_id = %subscription_id,
                    stream = request.name,
                    room_id = %request.room_id,
                    "ddp: subscription ready"
                );
                Ok(subscription_id)
            }
            Ok(Ok(Err(reason))) => {
                self.forget(&subscription_id).await;
                Err(anyhow!("subscription {} rejected: {reason}", request.name))
            }
            Ok(Err(_)) => {
                self.forget(&subscription_id).await;
                Err(anyhow!(
                    "ddp stream closed before {} was acknowledged",
                    request.name
                ))
            }
            Err(_) => {
                self.forget(&subscription_id).await;
                let _ = self.send_frame(json!({"msg": "unsub", "id": subscription_id.as_str()}));
                Err(anyhow!(
                    "timed out after {:?} waiting for {} acknowledgment",
                    self.ack_timeout,
                    request.name
                ))
            }
        }
    }

    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let id = Uuid::new_v4().simple().to_string();
        let (result_tx, result_rx) = oneshot::channel();
        self.state.lock().await.methods.insert(id.clone(), result_tx);

        let sent = self.send_frame(json!({
            "msg": "method",
            "method": method,
            "id": id,
            "params": params,
        }));
        if let Err(err) = sent {
            self.state.lock().await.methods.remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(self.ack_timeout, result_rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(reason))) => Err(anyhow!("method {method} failed: {reason}")),
            Ok(Err(_)) => Err(anyhow!("ddp stream closed before {method} returned")),
            Err(_) => {
                self.state.lock().await.methods.remove(&id);
                Err(anyhow!(
                    "timed out after {:?} waiting for {method} result",
                    self.ack_timeout
                ))
            }
        }
    }

    pub async fn unsubscribe(&self, subscription_id: &SubscriptionId) -> Result<()> {
        self.forget(subscription_id).await;
        self.send_frame(json!({"msg": "unsub", "id": subscription_id.as_str()}))
    }

    async fn forget(&self, subscription_id: &SubscriptionId) {
        let mut guard = self.state.lock().await;
        guard.pending.remove(subscription_id);
        guard.routes.remove(subscription_id);
    }
}

impl Drop for DdpStream {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

async fn read_loop<S>(
    mut reader: S,
    outbound: mpsc::UnboundedSender<String>,
    state: Arc<Mutex<DdpState>>,
    pushes: broadcast::Sender<PushEvent>,
    connected: Arc<AtomicBool>,
) where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    while let Some(message) = reader.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                warn!("ddp: websocket receive failed: {err}");
                break;
            }
        };
        match serde_json::from_str::<ServerFrame>(&text) {
            Ok(frame) => handle_frame(frame, &outbound, &state, &pushes).await,
            Err(err) => debug!("ddp: ignoring unrecognised frame: {err}"),
        }
    }

    connected.store(false, Ordering::SeqCst);
    let mut guard = state.lock().await;
    for (_, ack) in guard.pending.drain() {
        let _ = ack.send(Err("stream connection closed".into()));
    }
    for (_, result) in guard.methods.drain() {
        let _ = result.send(Err("stream connection closed".into()));
    }
    guard.routes.clear();
    info!("ddp: stream reader stopped");
}

async fn handle_frame(
    frame: ServerFrame,
    outbound: &mpsc::UnboundedSender<String>,
    state: &Mutex<DdpState>,
    pushes: &broadcast::Sender<PushEvent>,
) {
    match frame {
        ServerFrame::Connected { session } => {
            debug!(session = session.as_deref().unwrap_or_default(), "ddp: handshake complete");
        }
        ServerFrame::Failed { version } => {
            warn!(?version, "ddp: server rejected protocol version");
        }
        ServerFrame::Ping { id } => {
            let pong = match id {
                Some(id) => json!({"msg": "pong", "id": id}),
                None => json!({"msg": "pong"}),
            };
            let _ = outbound.send(pong.to_string());
        }
        ServerFrame::Ready { subs } => {
            let mut guard = state.lock().await;
            for sub in subs {
                if let Some(ack) = guard.pending.remove(&SubscriptionId::new(sub)) {
                    let _ = ack.send(Ok(()));
                }
            }
        }
        ServerFrame::Nosub { id, error } => {
            let subscription_id = SubscriptionId::new(id);
            let mut guard = state.lock().await;
            guard.routes.remove(&subscription_id);
            let reason = error
                .map(|error| describe_error(&error))
                .unwrap_or_else(|| "no such subscription".to_string());
            if let Some(ack) = guard.pending.remove(&subscription_id) {
                let _ = ack.send(Err(reason));
            } else {
                debug!(subscription_id = %subscription_id, "ddp: subscription ended by server: {reason}");
            }
        }
        ServerFrame::Result { id, result, error } => {
            let waiter = state.lock().await.methods.remove(&id);
            match (waiter, error) {
                (Some(waiter), None) => {
                    let _ = waiter.send(Ok(result.unwrap_or(Value::Null)));
                }
                (Some(waiter), Some(error)) => {
                    let _ = waiter.send(Err(describe_error(&error)));
                }
                (None, Some(error)) => {
                    warn!(method_id = %id, "ddp: method call failed: {}", describe_error(&error));
                }
                (None, None) => {}
            }
        }
        ServerFrame::Other => {}
        frame => {
            let events = {
                let mut guard = state.lock().await;
                route_frame(&mut guard.routes, frame)
            };
            for event in events {
                let _ = pushes.send(event);
            }
        }
    }
}

fn describe_error(error: &Value) -> String {
    error
        .get("reason")
        .or_else(|| error.get("message"))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| error.to_string())
}

fn route_frame(routes: &mut HashMap<SubscriptionId, Route>, frame: ServerFrame) -> Vec<PushEvent> {
    match frame {
        ServerFrame::Changed {
            collection, fields, ..
        } if collection.starts_with("stream-") => stream_events(routes, &collection, &fields),
        ServerFrame::Added {
            collection,
            id,
            fields,
        } => record_events(routes, &collection, PushKind::Add, id, fields, Vec::new()),
        ServerFrame::Changed {
            collection,
            id,
            fields,
            cleared,
        } => record_events(routes, &collection, PushKind::Change, id, fields, cleared),
        ServerFrame::Removed { collection, id } => record_events(
            routes,
            &collection,
            PushKind::Remove,
            id,
            Map::new(),
            Vec::new(),
        ),
        _ => Vec::new(),
    }
}

fn stream_events(
    routes: &HashMap<SubscriptionId, Route>,
    collection: &str,
    fields: &Map<String, Value>,
) -> Vec<PushEvent> {
    let Some(event_name) = fields.get("eventName").and_then(Value::as_str) else {
        return Vec::new();
    };
    let args = fields
        .get("args")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut events = Vec::new();
    for (subscription_id, route) in routes {
        if route.stream_name != collection || route.event_name.as_deref() != Some(event_name) {
            continue;
        }
        let converted = match route.kind {
            StreamKind::RoomMessages => args
                .first()
                .cloned()
                .map(|message| (PushKind::Change, message)),
            StreamKind::RoomDelete => args
                .first()
                .and_then(|deleted| deleted.get("_id"))
                .cloned()
                .map(|id| (PushKind::Remove, json!({"_id": id}))),
            StreamKind::RoomTyping => {
                match (
                    args.first().and_then(Value::as_str),
                    args.get(1).and_then(Value::as_bool),
                ) {
                    (Some(username), Some(true)) => {
                        Some((PushKind::Add, json!({"_id": username})))
                    }
                    (Some(username), Some(false)) => {
                        Some((PushKind::Remove, json!({"_id": username})))
                    }
                    _ => None,
                }
            }
            _ => None,
        };
        if let Some((kind, payload)) = converted {
            events.push(PushEvent::new(
                subscription_id.clone(),
                route.room_id.clone(),
                kind,
                payload,
            ));
        }
    }
    events
}

/// Record-set frames go to the subscription whose room matches `rid`. Frames
/// without `rid` (partial changes, removals) only reach subscriptions that
/// already hold the record.
fn record_events(
    routes: &mut HashMap<SubscriptionId, Route>,
    collection: &str,
    kind: PushKind,
    id: String,
    mut fields: Map<String, Value>,
    cleared: Vec<String>,
) -> Vec<PushEvent> {
    let room = fields
        .get("rid")
        .and_then(Value::as_str)
        .map(str::to_owned);
    fields.insert("_id".into(), Value::String(id.clone()));
    let payload = Value::Object(fields);

    let mut events = Vec::new();
    for (subscription_id, route) in routes.iter_mut() {
        if record_collection(route.kind) != Some(collection) {
            continue;
        }
        let owns = match room.as_deref() {
            Some(rid) => rid == route.room_id.as_str(),
            None => route.records.contains(&id),
        };
        if !owns {
            continue;
        }
        if kind == PushKind::Remove {
            route.records.remove(&id);
        } else {
            route.records.insert(id.clone());
        }
        events.push(
            PushEvent::new(
                subscription_id.clone(),
                route.room_id.clone(),
                kind,
                payload.clone(),
            )
            .with_cleared(cleared.clone()),
        );
    }
    if events.is_empty() {
        debug!(collection, id = %id, "ddp: record frame matched no subscription");
    }
    events
}

#[cfg(test)]
#[path = "../tests/ddp_tests.rs"]
mod tests;
