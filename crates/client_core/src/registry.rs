use std::{collections::HashMap, sync::Arc};

use shared::{
    domain::{RoomId, StreamKind, SubscriptionId},
    error::RpcError,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::transport::{StreamRequest, SubscribeOptions, Transport};

/// Streams that follow another stream's lifecycle. Subscribing the key also
/// subscribes every implied kind; unsubscribing the key tears them down.
pub const IMPLIED_STREAMS: &[(StreamKind, &[StreamKind])] =
    &[(StreamKind::RoomMessages, &[StreamKind::RoomDelete])];

pub fn implied_streams(kind: StreamKind) -> &'static [StreamKind] {
    IMPLIED_STREAMS
        .iter()
        .find(|(primary, _)| *primary == kind)
        .map(|(_, implied)| *implied)
        .unwrap_or(&[])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub room_id: RoomId,
    pub kind: StreamKind,
    pub subscription_id: SubscriptionId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// A new server registration was acknowledged by this call.
    Established(SubscriptionHandle),
    /// The kind was already subscribed; nothing was sent.
    Existing(SubscriptionHandle),
    /// Another subscribe for the kind is still awaiting acknowledgment.
    Pending,
}

impl SubscribeOutcome {
    pub fn handle(&self) -> Option<&SubscriptionHandle> {
        match self {
            Self::Established(handle) | Self::Existing(handle) => Some(handle),
            Self::Pending => None,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum SubscriptionError {
    #[error("subscribing to {kind} failed: {source}")]
    Open {
        kind: StreamKind,
        #[source]
        source: RpcError,
    },
    #[error("subscription to {kind} was cancelled before it was acknowledged")]
    Cancelled { kind: StreamKind },
    #[error("room session is closed")]
    Closed,
    #[error("closing {kind} subscription failed: {source}")]
    Close {
        kind: StreamKind,
        #[source]
        source: RpcError,
    },
}

#[derive(Debug, Default)]
pub struct TeardownReport {
    pub closed: Vec<StreamKind>,
    pub failures: Vec<SubscriptionError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug)]
enum Entry {
    Pending { ticket: u64 },
    Active(SubscriptionId),
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: HashMap<StreamKind, Entry>,
    routes: HashMap<SubscriptionId, StreamKind>,
    next_ticket: u64,
    closed: bool,
}

fn transport_error(err: anyhow::Error) -> RpcError {
    RpcError::unknown(format!("{err:#}")).with_cause(err)
}

/// Per-room bookkeeping of live stream subscriptions. At most one entry per
/// kind; local state changes before the remote call so it always reflects
/// the requested end state.
pub struct SubscriptionRegistry {
    room_id: RoomId,
    transport: Arc<dyn Transport>,
    options: SubscribeOptions,
    state: Mutex<RegistryState>,
}

impl SubscriptionRegistry {
    pub fn new(room_id: RoomId, transport: Arc<dyn Transport>, options: SubscribeOptions) -> Self {
        Self {
            room_id,
            transport,
            options,
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    fn handle(&self, kind: StreamKind, subscription_id: SubscriptionId) -> SubscriptionHandle {
        SubscriptionHandle {
            room_id: self.room_id.clone(),
            kind,
            subscription_id,
        }
    }

    pub async fn subscribe(&self, kind: StreamKind) -> Result<SubscribeOutcome, SubscriptionError> {
        let outcome = self.subscribe_one(kind).await?;
        if outcome.handle().is_some() {
            for implied in implied_streams(kind) {
                match self.subscribe_one(*implied).await {
                    Ok(_) => {}
                    Err(SubscriptionError::Closed) => return Err(SubscriptionError::Closed),
                    Err(err) => warn!(
                        room_id = %self.room_id,
                        kind = %implied,
                        "subscriptions: implied stream failed: {err}"
                    ),
                }
            }
        }
        Ok(outcome)
    }

    async fn subscribe_one(&self, kind: StreamKind) -> Result<SubscribeOutcome, SubscriptionError> {
        let ticket = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(SubscriptionError::Closed);
            }
            match state.entries.get(&kind) {
                Some(Entry::Active(subscription_id)) => {
                    return Ok(SubscribeOutcome::Existing(
                        self.handle(kind, subscription_id.clone()),
                    ))
                }
                Some(Entry::Pending { .. }) => return Ok(SubscribeOutcome::Pending),
                None => {}
            }
            state.next_ticket += 1;
            let ticket = state.next_ticket;
            state.entries.insert(kind, Entry::Pending { ticket });
            ticket
        };

        let request = StreamRequest::for_kind(&self.room_id, kind, self.options);
        let opened = self.transport.open_subscription(&request).await;

        let mut state = self.state.lock().await;
        let closed = state.closed;
        let still_wanted = !closed
            && matches!(
                state.entries.get(&kind),
                Some(Entry::Pending { ticket: current }) if *current == ticket
            );
        match opened {
            Ok(subscription_id) if still_wanted => {
                state
                    .entries
                    .insert(kind, Entry::Active(subscription_id.clone()));
                state.routes.insert(subscription_id.clone(), kind);
                info!(
                    room_id = %self.room_id,
                    %kind,
                    subscription_id = %subscription_id,
                    "subscriptions: acknowledged"
                );
                Ok(SubscribeOutcome::Established(
                    self.handle(kind, subscription_id),
                ))
            }
            Ok(subscription_id) => {
                drop(state);
                warn!(
                    room_id = %self.room_id,
                    %kind,
                    subscription_id = %subscription_id,
                    "subscriptions: acknowledgment arrived after unsubscribe; closing"
                );
                if let Err(err) = self.transport.close_subscription(&subscription_id).await {
                    warn!(
                        subscription_id = %subscription_id,
                        "subscriptions: closing orphaned subscription failed: {err:#}"
                    );
                }
                if closed {
                    Err(SubscriptionError::Closed)
                } else {
                    Err(SubscriptionError::Cancelled { kind })
                }
            }
            Err(err) => {
                if still_wanted {
                    state.entries.remove(&kind);
                }
                warn!(room_id = %self.room_id, %kind, "subscriptions: open failed: {err:#}");
                Err(SubscriptionError::Open {
                    kind,
                    source: transport_error(err),
                })
            }
        }
    }

    /// Clears `kind` and its implied kinds locally, then closes them
    /// remotely. A failed close is reported after local cleanup.
    pub async fn unsubscribe(&self, kind: StreamKind) -> Result<(), SubscriptionError> {
        let mut first_error = None;
        for target in std::iter::once(kind).chain(implied_streams(kind).iter().copied()) {
            if let Err(err) = self.unsubscribe_one(target).await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn unsubscribe_one(&self, kind: StreamKind) -> Result<(), SubscriptionError> {
        let subscription_id = {
            let mut state = self.state.lock().await;
            match state.entries.remove(&kind) {
                Some(Entry::Active(subscription_id)) => {
                    state.routes.remove(&subscription_id);
                    subscription_id
                }
                Some(Entry::Pending { .. }) => {
                    debug!(room_id = %self.room_id, %kind, "subscriptions: cancelled while pending");
                    return Ok(());
                }
                None => return Ok(()),
            }
        };
        self.close_remote(kind, &subscription_id).await
    }

    async fn close_remote(
        &self,
        kind: StreamKind,
        subscription_id: &SubscriptionId,
    ) -> Result<(), SubscriptionError> {
        match self.transport.close_subscription(subscription_id).await {
            Ok(()) => {
                info!(
                    room_id = %self.room_id,
                    %kind,
                    subscription_id = %subscription_id,
                    "subscriptions: closed"
                );
                Ok(())
            }
            Err(err) => {
                warn!(
                    room_id = %self.room_id,
                    %kind,
                    subscription_id = %subscription_id,
                    "subscriptions: close failed; local state already cleared: {err:#}"
                );
                Err(SubscriptionError::Close {
                    kind,
                    source: transport_error(err),
                })
            }
        }
    }

    /// Tears everything down and refuses further subscribes. Opens that are
    /// acknowledged afterwards are closed again.
    pub async fn close(&self) -> TeardownReport {
        self.state.lock().await.closed = true;
        self.teardown_all().await
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Drops every entry, pending ones included, and closes the active ones.
    /// Safe to call repeatedly.
    pub async fn teardown_all(&self) -> TeardownReport {
        let mut active: Vec<(StreamKind, SubscriptionId)> = {
            let mut state = self.state.lock().await;
            state.routes.clear();
            state
                .entries
                .drain()
                .filter_map(|(kind, entry)| match entry {
                    Entry::Active(subscription_id) => Some((kind, subscription_id)),
                    Entry::Pending { .. } => None,
                })
                .collect()
        };
        active.sort_by_key(|(kind, _)| *kind);

        let mut report = TeardownReport::default();
        for (kind, subscription_id) in active {
            match self.close_remote(kind, &subscription_id).await {
                Ok(()) => report.closed.push(kind),
                Err(err) => report.failures.push(err),
            }
        }
        if !report.closed.is_empty() || !report.failures.is_empty() {
            info!(
                room_id = %self.room_id,
                closed = report.closed.len(),
                failed = report.failures.len(),
                "subscriptions: teardown finished"
            );
        }
        report
    }

    pub async fn route(&self, subscription_id: &SubscriptionId) -> Option<StreamKind> {
        self.state.lock().await.routes.get(subscription_id).copied()
    }

    pub async fn active(&self, kind: StreamKind) -> Option<SubscriptionHandle> {
        let state = self.state.lock().await;
        match state.entries.get(&kind) {
            Some(Entry::Active(subscription_id)) => Some(self.handle(kind, subscription_id.clone())),
            _ => None,
        }
    }

    pub async fn active_kinds(&self) -> Vec<StreamKind> {
        let state = self.state.lock().await;
        let mut kinds: Vec<StreamKind> = state
            .entries
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::Active(_)))
            .map(|(kind, _)| *kind)
            .collect();
        kinds.sort();
        kinds
    }

    /// Active or awaiting acknowledgment.
    pub async fn is_tracked(&self, kind: StreamKind) -> bool {
        self.state.lock().await.entries.contains_key(&kind)
    }

    pub async fn has_pending(&self) -> bool {
        self.state
            .lock()
            .await
            .entries
            .values()
            .any(|entry| matches!(entry, Entry::Pending { .. }))
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
