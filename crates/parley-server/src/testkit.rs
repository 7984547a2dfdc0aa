//! Helpers shared by the server's unit tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use tokio::sync::mpsc;

use parley_shared::protocol::ServerEvent;
use parley_shared::token::create_access_token;
use parley_shared::UserId;
use parley_store::{Database, Profile};

use crate::engine::{Engine, SessionSettings};
use crate::identity::TokenResolver;
use crate::store::Store;

pub(crate) struct TestEnv {
    pub engine: Arc<Engine>,
    issuer: SigningKey,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_store_timeout(Duration::from_secs(5))
    }

    pub fn with_store_timeout(timeout: Duration) -> Self {
        let issuer = SigningKey::generate(&mut OsRng);
        let resolver = Arc::new(TokenResolver::new(issuer.verifying_key().to_bytes()));
        let store = Store::new(Database::open_in_memory().unwrap(), timeout);
        let settings = SessionSettings {
            outbound_queue_capacity: 64,
            ping_interval: Duration::from_secs(30),
            events_per_sec: 1000.0,
            event_burst: 1000.0,
        };

        Self {
            engine: Arc::new(Engine::new(store, resolver, settings)),
            issuer,
        }
    }

    pub async fn add_user(&self, name: &str) -> UserId {
        let id = UserId::new();
        let profile = Profile {
            id,
            name: name.to_string(),
            email: format!("{name}@example.test"),
            profile_pic: String::new(),
            created_at: Utc::now(),
        };
        self.engine
            .store()
            .call(move |db| db.upsert_profile(&profile))
            .await
            .unwrap();
        id
    }

    pub fn token_for(&self, user: UserId) -> String {
        create_access_token(user, Utc::now() + chrono::Duration::hours(1), &self.issuer).encode()
    }

    /// Register a bare connection for `user` without going through a session.
    pub async fn attach(&self, user: UserId) -> mpsc::Receiver<ServerEvent> {
        let presence = self.engine.presence();
        let (handle, rx) = presence.new_handle(64);
        presence.register(user, handle).await;
        rx
    }
}

/// Everything queued on `rx` right now.
pub(crate) fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
