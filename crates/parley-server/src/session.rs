//! Per-connection state machine.
//!
//! `Connecting → Authenticated → Joined → Disconnected`. A session only acts
//! on client events while `Joined`; every other state ignores them. The
//! transport (see `ws.rs`) drives the transitions.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use parley_shared::protocol::{ClientEvent, ErrorKind, ServerEvent};
use parley_shared::UserId;

use crate::engine::Engine;
use crate::error::{AuthError, EngineError};
use crate::presence::ConnectionHandle;
use crate::rate_limit::TokenBucket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticated,
    Joined,
    Disconnected,
}

pub struct Session {
    engine: Arc<Engine>,
    handle: ConnectionHandle,
    state: SessionState,
    user: Option<UserId>,
    limiter: TokenBucket,
}

impl Session {
    /// Allocate a connection handle and a session in `Connecting`. The
    /// receiver feeds the transport's writer.
    pub fn open(engine: Arc<Engine>) -> (Self, mpsc::Receiver<ServerEvent>) {
        let capacity = engine.settings().outbound_queue_capacity;
        let (handle, rx) = engine.presence().new_handle(capacity);
        let limiter = engine.event_limiter();
        let session = Self {
            engine,
            handle,
            state: SessionState::Connecting,
            user: None,
            limiter,
        };
        (session, rx)
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Verify the connection's credential. Any failure ends the session.
    pub async fn authenticate(&mut self, credential: Option<&str>) -> Result<UserId, AuthError> {
        if self.state != SessionState::Connecting {
            warn!(conn = %self.handle.id(), state = ?self.state, "Authenticate out of order");
            self.state = SessionState::Disconnected;
            return Err(AuthError::MissingCredential);
        }

        match self.engine.authenticate(credential).await {
            Ok(user) => {
                self.user = Some(user);
                self.state = SessionState::Authenticated;
                debug!(conn = %self.handle.id(), user = %user, "Session authenticated");
                Ok(user)
            }
            Err(e) => {
                warn!(conn = %self.handle.id(), error = %e, "Authentication failed");
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Register with presence and tell everyone who is online.
    pub async fn join(&mut self) -> bool {
        let (SessionState::Authenticated, Some(user)) = (self.state, self.user) else {
            return false;
        };

        let came_online = self
            .engine
            .presence()
            .register(user, self.handle.clone())
            .await;
        self.state = SessionState::Joined;
        info!(conn = %self.handle.id(), user = %user, came_online, "Session joined");

        self.engine.broadcast_online_users().await;
        true
    }

    /// Parse and handle one inbound text frame.
    pub async fn handle_frame(&mut self, text: &str) {
        if self.state != SessionState::Joined {
            debug!(conn = %self.handle.id(), state = ?self.state, "Ignoring frame");
            return;
        }

        if !self.limiter.try_take() {
            debug!(conn = %self.handle.id(), "Inbound event over budget");
            self.handle.push(EngineError::RateLimited.to_event());
            return;
        }

        match ClientEvent::from_json(text) {
            Ok(event) => self.handle_event(event).await,
            Err(e) => {
                debug!(conn = %self.handle.id(), error = %e, "Malformed frame");
                self.handle
                    .push(ServerEvent::error(ErrorKind::Invalid, "Malformed event"));
            }
        }
    }

    /// Run one event to completion.
    ///
    /// The work happens on its own task so a panic stays contained, and it
    /// is not cancelled if the connection goes away meanwhile.
    pub async fn handle_event(&mut self, event: ClientEvent) {
        let (SessionState::Joined, Some(user)) = (self.state, self.user) else {
            return;
        };

        let name = event.name();
        let engine = self.engine.clone();
        let task = tokio::spawn(async move { dispatch(&engine, user, event).await });

        match task.await {
            Ok(Ok(Some(reply))) => {
                self.handle.push(reply);
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                warn!(conn = %self.handle.id(), user = %user, event = name, error = %e, "Event failed");
                self.handle.push(e.to_event());
            }
            Err(join_err) => {
                error!(conn = %self.handle.id(), user = %user, event = name, error = %join_err, "Event handler panicked");
                self.handle
                    .push(EngineError::Internal(join_err.to_string()).to_event());
            }
        }
    }

    /// Leave presence and tell everyone. Safe to call more than once.
    pub async fn disconnect(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Disconnected);
        if previous != SessionState::Joined {
            return;
        }
        let Some(user) = self.user else {
            return;
        };

        let went_offline = self
            .engine
            .presence()
            .deregister(&user, self.handle.id())
            .await;
        info!(conn = %self.handle.id(), user = %user, went_offline, "Session disconnected");

        self.engine.broadcast_online_users().await;
    }
}

/// Apply a client event on behalf of `user`. Returns the reply meant for the
/// originating connection only, if any.
async fn dispatch(
    engine: &Engine,
    user: UserId,
    event: ClientEvent,
) -> Result<Option<ServerEvent>, EngineError> {
    match event {
        ClientEvent::OpenThread { counterpart } => {
            let thread = engine.router().open_thread(user, counterpart).await?;
            Ok(Some(ServerEvent::ThreadOpened(thread)))
        }
        ClientEvent::SendMessage(outgoing) => {
            engine
                .router()
                .send_message(user, outgoing.receiver, outgoing.content)
                .await?;
            Ok(None)
        }
        ClientEvent::MarkSeen { counterpart } => {
            engine.router().mark_seen(user, counterpart).await?;
            Ok(None)
        }
        ClientEvent::RequestSidebar => {
            let entries = engine.sidebar().sidebar_for(user).await?;
            Ok(Some(ServerEvent::SidebarUpdated(entries)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{drain, TestEnv};
    use parley_shared::protocol::{MessageContent, OutgoingMessage};

    async fn joined(env: &TestEnv, user: UserId) -> (Session, mpsc::Receiver<ServerEvent>) {
        let (mut session, mut rx) = Session::open(env.engine.clone());
        session
            .authenticate(Some(&env.token_for(user)))
            .await
            .unwrap();
        assert!(session.join().await);
        drain(&mut rx);
        (session, rx)
    }

    fn error_kinds(events: &[ServerEvent]) -> Vec<ErrorKind> {
        events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::Error(payload) => Some(payload.kind),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_bad_credential_never_registers() {
        let env = TestEnv::new();
        let (mut session, _rx) = Session::open(env.engine.clone());

        assert!(session.authenticate(Some("forged")).await.is_err());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.join().await);
        assert_eq!(env.engine.presence().connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_join_broadcasts_online_users() {
        let env = TestEnv::new();
        let alice = env.add_user("alice").await;
        let bob = env.add_user("bob").await;
        let (_alice_session, mut alice_rx) = joined(&env, alice).await;

        let (mut bob_session, mut bob_rx) = Session::open(env.engine.clone());
        bob_session
            .authenticate(Some(&env.token_for(bob)))
            .await
            .unwrap();
        assert_eq!(bob_session.state(), SessionState::Authenticated);
        assert!(bob_session.join().await);
        assert_eq!(bob_session.state(), SessionState::Joined);

        let mut expected = vec![alice, bob];
        expected.sort();
        assert_eq!(
            drain(&mut alice_rx),
            vec![ServerEvent::OnlineUsers(expected.clone())]
        );
        assert_eq!(drain(&mut bob_rx), vec![ServerEvent::OnlineUsers(expected)]);
    }

    #[tokio::test]
    async fn test_second_device_keeps_user_online() {
        let env = TestEnv::new();
        let alice = env.add_user("alice").await;
        let bob = env.add_user("bob").await;
        let (_bob_session, mut bob_rx) = joined(&env, bob).await;
        let (mut phone, _phone_rx) = joined(&env, alice).await;
        let (mut laptop, _laptop_rx) = joined(&env, alice).await;
        drain(&mut bob_rx);

        phone.disconnect().await;
        assert!(env.engine.presence().is_online(&alice).await);

        laptop.disconnect().await;
        assert!(!env.engine.presence().is_online(&alice).await);

        // A repeated disconnect must not announce anything again.
        laptop.disconnect().await;

        let mut both = vec![alice, bob];
        both.sort();
        assert_eq!(
            drain(&mut bob_rx),
            vec![
                ServerEvent::OnlineUsers(both),
                ServerEvent::OnlineUsers(vec![bob]),
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_session() {
        let env = TestEnv::new();
        let alice = env.add_user("alice").await;
        let (mut session, mut rx) = joined(&env, alice).await;

        session.handle_frame("{ nope").await;
        assert_eq!(error_kinds(&drain(&mut rx)), vec![ErrorKind::Invalid]);
        assert_eq!(session.state(), SessionState::Joined);

        session.handle_frame(r#"{"event":"request_sidebar"}"#).await;
        assert_eq!(drain(&mut rx), vec![ServerEvent::SidebarUpdated(vec![])]);
    }

    #[tokio::test]
    async fn test_failed_event_acknowledged_and_session_continues() {
        let env = TestEnv::new();
        let alice = env.add_user("alice").await;
        let bob = env.add_user("bob").await;
        let (mut session, mut rx) = joined(&env, alice).await;

        session
            .handle_event(ClientEvent::OpenThread {
                counterpart: UserId::new(),
            })
            .await;
        assert_eq!(error_kinds(&drain(&mut rx)), vec![ErrorKind::NotFound]);

        session
            .handle_event(ClientEvent::SendMessage(OutgoingMessage {
                receiver: bob,
                content: MessageContent::text("still here"),
            }))
            .await;
        let events = drain(&mut rx);
        assert!(error_kinds(&events).is_empty());
        assert!(matches!(events[0], ServerEvent::MessagesUpdated(_)));
    }

    #[tokio::test]
    async fn test_open_thread_reply_goes_to_requester_only() {
        let env = TestEnv::new();
        let alice = env.add_user("alice").await;
        let bob = env.add_user("bob").await;
        let (mut phone, mut phone_rx) = joined(&env, alice).await;
        let (_laptop, mut laptop_rx) = joined(&env, alice).await;
        drain(&mut phone_rx);

        phone
            .handle_event(ClientEvent::OpenThread { counterpart: bob })
            .await;

        assert!(matches!(
            drain(&mut phone_rx).as_slice(),
            [ServerEvent::ThreadOpened(_)]
        ));
        assert!(drain(&mut laptop_rx).is_empty());
    }

    #[tokio::test]
    async fn test_events_ignored_before_join() {
        let env = TestEnv::new();
        let alice = env.add_user("alice").await;
        let (mut session, mut rx) = Session::open(env.engine.clone());

        session.handle_frame(r#"{"event":"request_sidebar"}"#).await;
        session
            .authenticate(Some(&env.token_for(alice)))
            .await
            .unwrap();
        session.handle_frame(r#"{"event":"request_sidebar"}"#).await;

        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_inbound_rate_limit() {
        let env = TestEnv::new();
        let alice = env.add_user("alice").await;
        let (mut session, mut rx) = joined(&env, alice).await;
        session.limiter = TokenBucket::new(0.0, 2.0);

        for _ in 0..3 {
            session.handle_frame(r#"{"event":"request_sidebar"}"#).await;
        }

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert_eq!(error_kinds(&events), vec![ErrorKind::RateLimited]);
    }
}
