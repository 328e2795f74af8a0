use std::sync::Arc;

use anyhow::Result;
use shared::domain::RoomIdentity;
use tracing::info;

pub mod auth;
pub mod call;
pub mod collection;
pub mod config;
pub mod decoder;
pub mod registry;
pub mod rest;
pub mod session;
pub mod transport;

pub use auth::{MemoryTokenStore, TokenProvider};
pub use call::{Liveness, RpcCall};
pub use collection::{
    CollectionEvent, CollectionItem, CollectionObserver, CollectionState, Document,
    LocalCollection,
};
pub use config::{load_settings, ClientSettings};
pub use decoder::ResponseDecoder;
pub use registry::{
    SubscribeOutcome, SubscriptionError, SubscriptionHandle, SubscriptionRegistry, TeardownReport,
};
pub use rest::{FileSort, MemberSort, MessageSort, PageRequest, RestClient, SortField};
pub use session::RoomSession;
pub use transport::{PushEvent, PushKind, SubscribeOptions, Transport};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

/// Process-wide entry point: one transport and one REST client shared by
/// every room session opened through it.
pub struct ChatClient {
    settings: ClientSettings,
    transport: Arc<dyn Transport>,
    rest: Arc<RestClient>,
}

impl ChatClient {
    /// Builds the production transport. The stream connection is opened
    /// lazily by the first subscription.
    pub fn new(settings: ClientSettings) -> Result<Self> {
        let tokens: Arc<dyn TokenProvider> = Arc::new(MemoryTokenStore::new());
        let transport = transport::ServerTransport::new(settings.clone(), Arc::clone(&tokens))?;
        Ok(Self::with_transport(settings, Arc::new(transport), tokens))
    }

    pub fn with_transport(
        settings: ClientSettings,
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        let rest = Arc::new(RestClient::new(Arc::clone(&transport), tokens));
        info!(server_url = %settings.api_base(), "client: ready");
        Self {
            settings,
            transport,
            rest,
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn rest(&self) -> &Arc<RestClient> {
        &self.rest
    }

    pub fn tokens(&self) -> &Arc<dyn TokenProvider> {
        self.rest.tokens()
    }

    /// Starts a session with its push pump running. Call
    /// [`RoomSession::teardown`] when the room is discarded.
    pub fn open_room(&self, identity: RoomIdentity) -> Arc<RoomSession> {
        let session = Arc::new(RoomSession::new(
            identity,
            Arc::clone(&self.rest),
            Arc::clone(&self.transport),
            SubscribeOptions {
                limit: self.settings.subscription_limit,
            },
        ));
        session.spawn_push_pump();
        info!(room = %session.identity(), "client: room opened");
        session
    }
}
