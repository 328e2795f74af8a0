use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use shared::{
    domain::{MessageId, RoomIdentity, StreamKind},
    error::{ContractViolation, RpcError},
    protocol::{Attachment, FileDescriptor, Message, Paginated, RoomRole, User},
};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    StreamExt,
};
use tracing::{debug, info, warn};

use crate::{
    call::{Liveness, RpcCall},
    collection::{
        CollectionEvent, CollectionItem, CollectionObserver, CollectionState, Document,
        LocalCollection,
    },
    registry::{
        implied_streams, SubscribeOutcome, SubscriptionError, SubscriptionRegistry,
        TeardownReport,
    },
    rest::{FileSort, MemberSort, MessageSort, PageRequest, RestClient},
    transport::{PushEvent, PushKind, SubscribeOptions, Transport},
};

/// Pushes held while a subscribe is awaiting its acknowledgment.
pub const EARLY_PUSH_LIMIT: usize = 256;

#[derive(Default)]
struct SessionState {
    collections: HashMap<StreamKind, LocalCollection<Document>>,
    early: VecDeque<PushEvent>,
}

/// Everything the application does with one opened room. Subscription
/// bookkeeping and collections are owned here and never shared with
/// another room.
pub struct RoomSession {
    identity: RoomIdentity,
    rest: Arc<RestClient>,
    transport: Arc<dyn Transport>,
    registry: SubscriptionRegistry,
    state: Mutex<SessionState>,
    liveness: Liveness,
}

impl RoomSession {
    pub fn new(
        identity: RoomIdentity,
        rest: Arc<RestClient>,
        transport: Arc<dyn Transport>,
        options: SubscribeOptions,
    ) -> Self {
        let registry =
            SubscriptionRegistry::new(identity.room_id().clone(), Arc::clone(&transport), options);
        Self {
            identity,
            rest,
            transport,
            registry,
            state: Mutex::new(SessionState::default()),
            liveness: Liveness::new(),
        }
    }

    pub fn identity(&self) -> &RoomIdentity {
        &self.identity
    }

    pub fn is_closed(&self) -> bool {
        !self.liveness.is_live()
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    /// Registers `observer` for `kind` unless one is already registered,
    /// then subscribes. Repeating the call changes nothing.
    pub async fn subscribe(
        &self,
        kind: StreamKind,
        observer: Arc<dyn CollectionObserver<Document>>,
    ) -> Result<SubscribeOutcome, SubscriptionError> {
        if self.is_closed() {
            return Err(SubscriptionError::Closed);
        }
        {
            let mut state = self.state.lock().await;
            // Teardown may have run while this call waited for the lock.
            if self.is_closed() {
                return Err(SubscriptionError::Closed);
            }
            let collection = state.collections.entry(kind).or_default();
            if !collection.has_observer() {
                collection.set_observer(observer);
            }
            collection.begin_loading();
        }

        let outcome = self.registry.subscribe(kind).await;
        let abandoned = outcome.is_err() && !self.registry.is_tracked(kind).await;
        let mut state = self.state.lock().await;
        if outcome.is_ok() {
            self.replay_early(&mut state).await;
        } else if abandoned {
            if let Some(mut collection) = state.collections.remove(&kind) {
                collection.clear();
            }
        }
        outcome
    }

    /// Local collections for `kind` and its implied kinds are dropped before
    /// the server is told.
    pub async fn unsubscribe(&self, kind: StreamKind) -> Result<(), SubscriptionError> {
        {
            let mut state = self.state.lock().await;
            for target in std::iter::once(kind).chain(implied_streams(kind).iter().copied()) {
                if let Some(mut collection) = state.collections.remove(&target) {
                    collection.clear();
                }
            }
        }
        self.registry.unsubscribe(kind).await
    }

    /// Closes every subscription and releases every collection. Late
    /// completions, acknowledgments and pushes for this room are ignored
    /// afterwards.
    pub async fn teardown(&self) -> TeardownReport {
        let first = self.liveness.is_live();
        self.liveness.invalidate();
        let report = self.registry.close().await;
        {
            let mut state = self.state.lock().await;
            for (_, mut collection) in state.collections.drain() {
                collection.clear();
            }
            state.early.clear();
        }
        if first {
            info!(
                room = %self.identity,
                closed = report.closed.len(),
                failed = report.failures.len(),
                "session: torn down"
            );
        }
        report
    }

    pub async fn active_kinds(&self) -> Vec<StreamKind> {
        self.registry.active_kinds().await
    }

    pub async fn collection_state(&self, kind: StreamKind) -> CollectionState {
        self.state
            .lock()
            .await
            .collections
            .get(&kind)
            .map_or(CollectionState::Empty, LocalCollection::state)
    }

    pub async fn snapshot(&self, kind: StreamKind) -> Vec<Document> {
        self.state
            .lock()
            .await
            .collections
            .get(&kind)
            .map(LocalCollection::snapshot)
            .unwrap_or_default()
    }

    /// Applies one transport push if it belongs to this room.
    pub async fn dispatch_push(&self, event: PushEvent) {
        if self.is_closed() || &event.room_id != self.identity.room_id() {
            return;
        }
        // Routes are read under the session lock; subscribe replays under it too.
        let mut state = self.state.lock().await;
        let route = self.registry.route(&event.subscription_id).await;
        let awaiting_ack = route.is_none() && self.registry.has_pending().await;
        self.replay_early(&mut state).await;
        match route {
            Some(kind) => apply_push(&mut state.collections, kind, event),
            None if awaiting_ack => {
                if state.early.len() >= EARLY_PUSH_LIMIT {
                    warn!(room = %self.identity, "session: early push buffer full; dropping oldest");
                    state.early.pop_front();
                }
                state.early.push_back(event);
            }
            None => {}
        }
    }

    async fn replay_early(&self, state: &mut SessionState) {
        if state.early.is_empty() {
            return;
        }
        let mut unrouted = VecDeque::new();
        for event in std::mem::take(&mut state.early) {
            match self.registry.route(&event.subscription_id).await {
                Some(kind) => apply_push(&mut state.collections, kind, event),
                None => unrouted.push_back(event),
            }
        }
        if !unrouted.is_empty() && !self.registry.has_pending().await {
            unrouted.clear();
        }
        state.early = unrouted;
    }

    /// Drains the transport's push channel into this session until the
    /// session is torn down or dropped.
    pub fn spawn_push_pump(self: &Arc<Self>) -> JoinHandle<()> {
        let session = Arc::downgrade(self);
        let mut events = BroadcastStream::new(self.transport.push_events());
        tokio::spawn(async move {
            while let Some(item) = events.next().await {
                let Some(session) = session.upgrade() else {
                    break;
                };
                if session.is_closed() {
                    break;
                }
                match item {
                    Ok(event) => session.dispatch_push(event).await,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(room = %session.identity, skipped, "session: push receiver lagged");
                    }
                }
            }
            debug!("session: push pump stopped");
        })
    }

    /// Runs `call` and hands the result to `callback` unless the session
    /// was torn down first.
    pub fn deliver<T, F>(&self, call: RpcCall<T>, callback: F) -> JoinHandle<()>
    where
        T: Send + 'static,
        F: FnOnce(Result<T, RpcError>) + Send + 'static,
    {
        call.spawn_guarded(self.liveness.clone(), callback)
    }

    pub fn files(
        &self,
        page: Option<PageRequest<FileSort>>,
    ) -> Result<RpcCall<Paginated<Attachment>>, ContractViolation> {
        self.rest.list_room_files(&self.identity, page)
    }

    pub fn members(
        &self,
        page: Option<PageRequest<MemberSort>>,
    ) -> Result<RpcCall<Paginated<User>>, ContractViolation> {
        self.rest.list_room_members(&self.identity, page)
    }

    pub fn pinned_messages(
        &self,
        page: Option<PageRequest<MessageSort>>,
    ) -> Result<RpcCall<Paginated<Message>>, ContractViolation> {
        self.rest.list_pinned_messages(&self.identity, page)
    }

    pub fn favorite_messages(
        &self,
        page: Option<PageRequest<MessageSort>>,
    ) -> Result<RpcCall<Paginated<Message>>, ContractViolation> {
        self.rest.list_favorite_messages(&self.identity, page)
    }

    pub fn mentioned_messages(
        &self,
        page: Option<PageRequest<MessageSort>>,
    ) -> Result<RpcCall<Paginated<Message>>, ContractViolation> {
        self.rest.list_mentioned_messages(&self.identity, page)
    }

    pub fn history(
        &self,
        count: u32,
        oldest: Option<DateTime<Utc>>,
        latest: Option<DateTime<Utc>>,
    ) -> Result<RpcCall<Vec<Message>>, ContractViolation> {
        self.rest.room_history(&self.identity, count, oldest, latest)
    }

    pub fn roles(&self) -> Result<RpcCall<Vec<RoomRole>>, ContractViolation> {
        self.rest.room_roles(&self.identity)
    }

    pub fn send_message(&self, text: &str) -> Result<RpcCall<Message>, ContractViolation> {
        self.rest.send_message(self.identity.room_id(), text)
    }

    pub fn update_message(
        &self,
        message_id: &MessageId,
        text: &str,
    ) -> Result<RpcCall<Message>, ContractViolation> {
        self.rest
            .update_message(self.identity.room_id(), message_id, text)
    }

    pub fn delete_message(&self, message_id: &MessageId) -> Result<RpcCall<()>, ContractViolation> {
        self.rest.delete_message(self.identity.room_id(), message_id)
    }

    pub fn pin_message(&self, message_id: &MessageId) -> Result<RpcCall<()>, ContractViolation> {
        self.rest.pin_message(message_id)
    }

    pub fn unpin_message(&self, message_id: &MessageId) -> Result<RpcCall<()>, ContractViolation> {
        self.rest.unpin_message(message_id)
    }

    pub fn star_message(
        &self,
        message_id: &MessageId,
        starred: bool,
    ) -> Result<RpcCall<()>, ContractViolation> {
        self.rest.star_message(message_id, starred)
    }

    pub fn react(
        &self,
        message_id: &MessageId,
        emoji: &str,
    ) -> Result<RpcCall<()>, ContractViolation> {
        self.rest.react(message_id, emoji)
    }

    pub fn send_typing(
        &self,
        username: &str,
        typing: bool,
    ) -> Result<RpcCall<()>, ContractViolation> {
        self.rest
            .send_typing(self.identity.room_id(), username, typing)
    }

    pub fn send_file_message(
        &self,
        file: &FileDescriptor,
    ) -> Result<RpcCall<Message>, ContractViolation> {
        self.rest.send_file_message(self.identity.room_id(), file)
    }

    pub fn search(&self, text: &str, limit: u32) -> Result<RpcCall<Vec<Message>>, ContractViolation> {
        self.rest
            .search_messages(self.identity.room_id(), text, limit)
    }

    pub fn archive(&self) -> Result<RpcCall<()>, ContractViolation> {
        self.rest.archive_room(&self.identity)
    }

    pub fn unarchive(&self) -> Result<RpcCall<()>, ContractViolation> {
        self.rest.unarchive_room(&self.identity)
    }

    pub fn leave(&self) -> Result<RpcCall<()>, ContractViolation> {
        self.rest.leave_room(&self.identity)
    }

    pub fn hide(&self) -> Result<RpcCall<()>, ContractViolation> {
        self.rest.hide_room(&self.identity)
    }

    pub fn open(&self) -> Result<RpcCall<()>, ContractViolation> {
        self.rest.open_room(&self.identity)
    }

    pub fn delete(&self) -> Result<RpcCall<()>, ContractViolation> {
        self.rest.delete_room(&self.identity)
    }

    pub fn set_favorite(&self, favorite: bool) -> Result<RpcCall<()>, ContractViolation> {
        self.rest.set_favorite(self.identity.room_id(), favorite)
    }
}

fn apply_push(
    collections: &mut HashMap<StreamKind, LocalCollection<Document>>,
    kind: StreamKind,
    event: PushEvent,
) {
    let Some(document) = Document::from_payload(event.payload) else {
        warn!(%kind, "collection: dropping push without a string _id");
        return;
    };
    // Deletions land in the message list whenever one is being mirrored.
    let target = if kind == StreamKind::RoomDelete
        && event.kind == PushKind::Remove
        && collections.contains_key(&StreamKind::RoomMessages)
    {
        StreamKind::RoomMessages
    } else {
        kind
    };
    let Some(collection) = collections.get_mut(&target) else {
        debug!(%kind, "collection: no local collection for push");
        return;
    };
    let change = match event.kind {
        PushKind::Add => CollectionEvent::Add(document),
        PushKind::Change => CollectionEvent::Change(document.with_cleared(event.cleared)),
        PushKind::Remove => CollectionEvent::Remove(document.key()),
    };
    collection.apply(change);
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
