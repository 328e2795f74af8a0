//! Recording in-memory transport shared by the unit tests.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use shared::domain::{StreamKind, SubscriptionId};
use tokio::sync::{broadcast, oneshot};

use crate::transport::{PushEvent, RawResponse, RestRequest, StreamRequest, Transport};

pub(crate) struct FakeTransport {
    requests: Mutex<Vec<RestRequest>>,
    responses: Mutex<VecDeque<Result<RawResponse>>>,
    method_calls: Mutex<Vec<(String, Vec<Value>)>>,
    method_results: Mutex<VecDeque<Result<Value>>>,
    opened: Mutex<Vec<(StreamKind, SubscriptionId)>>,
    closed: Mutex<Vec<SubscriptionId>>,
    refused: Mutex<HashSet<StreamKind>>,
    gates: Mutex<HashMap<StreamKind, oneshot::Receiver<()>>>,
    fail_close: AtomicBool,
    next_id: AtomicUsize,
    pushes: broadcast::Sender<PushEvent>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        let (pushes, _) = broadcast::channel(64);
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            method_calls: Mutex::new(Vec::new()),
            method_results: Mutex::new(VecDeque::new()),
            opened: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            refused: Mutex::new(HashSet::new()),
            gates: Mutex::new(HashMap::new()),
            fail_close: AtomicBool::new(false),
            next_id: AtomicUsize::new(1),
            pushes,
        })
    }

    pub(crate) fn respond_with(&self, status: u16, body: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(RawResponse::new(status, body)));
    }

    pub(crate) fn fail_next_request(&self, reason: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(anyhow!(reason.to_string())));
    }

    pub(crate) fn method_returns(&self, result: Result<Value>) {
        self.method_results.lock().unwrap().push_back(result);
    }

    pub(crate) fn method_calls(&self) -> Vec<(String, Vec<Value>)> {
        self.method_calls.lock().unwrap().clone()
    }

    pub(crate) fn refuse(&self, kind: StreamKind) {
        self.refused.lock().unwrap().insert(kind);
    }

    pub(crate) fn fail_closing(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    /// Holds the acknowledgment for `kind` until the returned sender fires.
    pub(crate) fn hold_ack(&self, kind: StreamKind) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        self.gates.lock().unwrap().insert(kind, gate);
        release
    }

    pub(crate) fn requests(&self) -> Vec<RestRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn opened_kinds(&self) -> Vec<StreamKind> {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .map(|(kind, _)| *kind)
            .collect()
    }

    pub(crate) fn opened_id(&self, kind: StreamKind) -> Option<SubscriptionId> {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(opened, _)| *opened == kind)
            .map(|(_, id)| id.clone())
    }

    pub(crate) fn closed(&self) -> Vec<SubscriptionId> {
        self.closed.lock().unwrap().clone()
    }

    pub(crate) fn push(&self, event: PushEvent) {
        let _ = self.pushes.send(event);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn request(&self, request: RestRequest) -> Result<RawResponse> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(RawResponse::new(200, r#"{"success":true}"#)))
    }

    async fn open_subscription(&self, request: &StreamRequest) -> Result<SubscriptionId> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = SubscriptionId::new(format!("{}-{n}", request.kind.as_str()));
        self.opened.lock().unwrap().push((request.kind, id.clone()));

        let gate = self.gates.lock().unwrap().remove(&request.kind);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.refused.lock().unwrap().contains(&request.kind) {
            return Err(anyhow!("subscription {} refused", request.name));
        }
        Ok(id)
    }

    async fn close_subscription(&self, subscription_id: &SubscriptionId) -> Result<()> {
        self.closed.lock().unwrap().push(subscription_id.clone());
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(anyhow!("connection lost"));
        }
        Ok(())
    }

    async fn call_method(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        self.method_calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));
        self.method_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(Value::Null))
    }

    fn push_events(&self) -> broadcast::Receiver<PushEvent> {
        self.pushes.subscribe()
    }
}
