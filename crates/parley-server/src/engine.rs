//! The engine ties presence, storage and delivery together. One instance is
//! shared by every connection of the process.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use parley_shared::protocol::ServerEvent;
use parley_shared::UserId;

use crate::config::ServerConfig;
use crate::delivery::DeliveryRouter;
use crate::error::AuthError;
use crate::identity::IdentityResolver;
use crate::presence::PresenceRegistry;
use crate::rate_limit::TokenBucket;
use crate::sidebar::SidebarAggregator;
use crate::store::Store;

/// Per-connection knobs taken from [`ServerConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub outbound_queue_capacity: usize,
    pub ping_interval: Duration,
    pub events_per_sec: f64,
    pub event_burst: f64,
}

impl From<&ServerConfig> for SessionSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            outbound_queue_capacity: config.outbound_queue_capacity,
            ping_interval: config.ping_interval,
            events_per_sec: config.events_per_sec,
            event_burst: config.event_burst,
        }
    }
}

pub struct Engine {
    presence: PresenceRegistry,
    store: Store,
    resolver: Arc<dyn IdentityResolver>,
    router: DeliveryRouter,
    sidebar: SidebarAggregator,
    settings: SessionSettings,
}

impl Engine {
    pub fn new(
        store: Store,
        resolver: Arc<dyn IdentityResolver>,
        settings: SessionSettings,
    ) -> Self {
        let presence = PresenceRegistry::new();
        let sidebar = SidebarAggregator::new(store.clone(), presence.clone());
        let router = DeliveryRouter::new(store.clone(), presence.clone(), sidebar.clone());

        Self {
            presence,
            store,
            resolver,
            router,
            sidebar,
            settings,
        }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn router(&self) -> &DeliveryRouter {
        &self.router
    }

    pub fn sidebar(&self) -> &SidebarAggregator {
        &self.sidebar
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    /// Fresh inbound budget for one session.
    pub fn event_limiter(&self) -> TokenBucket {
        TokenBucket::new(self.settings.events_per_sec, self.settings.event_burst)
    }

    /// Resolve a credential to a known user.
    ///
    /// Fails if no credential was presented, if the resolver rejects it, or
    /// if the identity has no account.
    pub async fn authenticate(&self, credential: Option<&str>) -> Result<UserId, AuthError> {
        let credential = credential
            .filter(|c| !c.trim().is_empty())
            .ok_or(AuthError::MissingCredential)?;

        let user = self.resolver.resolve(credential).map_err(|e| {
            debug!(error = %e, "Credential rejected");
            e
        })?;

        if self.store.get_profile(user).await?.is_none() {
            warn!(user = %user, "Valid credential for unknown account");
            return Err(AuthError::UnknownUser(user));
        }

        Ok(user)
    }

    /// Push the current online set to every connection.
    pub async fn broadcast_online_users(&self) -> usize {
        let online = self.presence.snapshot_online_users().await;
        let delivered = self
            .presence
            .broadcast(&ServerEvent::OnlineUsers(online))
            .await;
        debug!(delivered, "Broadcast online users");
        delivered
    }
}
