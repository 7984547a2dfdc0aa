//! WebSocket transport: one task per connection driving a [`Session`].
//!
//! The socket is split. A writer task owns the sink and drains the session's
//! outbound queue plus a control channel (pings, close frames); the reader
//! loop feeds text frames to the session one at a time.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap},
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use parley_shared::constants::{CLOSE_UNAUTHORIZED, MAX_FRAME_SIZE};
use parley_shared::protocol::{ErrorKind, ServerEvent};

use crate::api::AppState;
use crate::engine::Engine;
use crate::session::Session;

/// How long a ping may stay unanswered.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// What the reader loop has seen lately. Any inbound frame counts as proof
/// of life, and so does a handler that is still running, because the reader
/// cannot pick up pongs until it returns.
#[derive(Debug, Default)]
struct Liveness {
    frames: AtomicU64,
    busy: AtomicBool,
}

impl Liveness {
    fn saw_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::Relaxed);
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// `GET /ws?token=...`
///
/// The credential may also come as `Authorization: Bearer ...`. It is checked
/// after the upgrade so a rejected client gets a proper close code.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let credential = query.token.or_else(|| bearer_token(&headers));
    let engine = state.engine.clone();

    ws.max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| run_connection(socket, engine, credential))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
}

pub async fn run_connection(mut socket: WebSocket, engine: Arc<Engine>, credential: Option<String>) {
    let (mut session, events) = Session::open(engine.clone());
    let conn = session.handle().id();

    let user = match session.authenticate(credential.as_deref()).await {
        Ok(user) => user,
        Err(e) => {
            info!(conn = %conn, error = %e, "Closing unauthenticated connection");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_UNAUTHORIZED,
                    reason: "unauthorized".into(),
                })))
                .await;
            return;
        }
    };
    info!(conn = %conn, user = %user, "WebSocket connection open");

    let (sink, mut stream) = socket.split();
    let (control_tx, control_rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(writer_task(sink, events, control_rx));

    if !session.join().await {
        writer.abort();
        return;
    }

    let liveness = Arc::new(Liveness::default());
    let mut keepalive = tokio::spawn(keepalive_task(
        control_tx.clone(),
        liveness.clone(),
        engine.settings().ping_interval,
        PONG_TIMEOUT,
    ));

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    liveness.saw_frame();
                    liveness.set_busy(true);
                    session.handle_frame(&text).await;
                    liveness.set_busy(false);
                    liveness.saw_frame();
                }
                Some(Ok(Message::Binary(_))) => {
                    liveness.saw_frame();
                    session
                        .handle()
                        .push(ServerEvent::error(ErrorKind::Invalid, "Binary frames are not supported"));
                }
                // tungstenite queues the pong reply to a ping itself
                Some(Ok(Message::Pong(_) | Message::Ping(_))) => liveness.saw_frame(),
                Some(Ok(Message::Close(frame))) => {
                    debug!(conn = %conn, reason = ?frame, "Client initiated close");
                    break;
                }
                Some(Err(e)) => {
                    warn!(conn = %conn, error = %e, "WebSocket receive error");
                    break;
                }
                None => break,
            },
            _ = &mut keepalive => {
                warn!(conn = %conn, "Keep-alive failed, dropping connection");
                break;
            }
        }
    }

    session.disconnect().await;
    keepalive.abort();
    writer.abort();
    info!(conn = %conn, user = %user, "WebSocket connection closed");
}

async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut events: mpsc::Receiver<ServerEvent>,
    mut control: mpsc::UnboundedReceiver<Message>,
) {
    loop {
        let message = tokio::select! {
            Some(event) = events.recv() => match event.to_json() {
                Ok(text) => Message::Text(text),
                Err(e) => {
                    warn!(error = %e, "Failed to encode outbound event");
                    continue;
                }
            },
            Some(message) = control.recv() => message,
            else => break,
        };

        let closing = matches!(message, Message::Close(_));
        if sink.send(message).await.is_err() || closing {
            break;
        }
    }
}

/// Ping every `every` while the reader is idle; give up if nothing at all
/// arrives within `pong_timeout` of a ping. Returns when the connection
/// should be dropped.
async fn keepalive_task(
    control: mpsc::UnboundedSender<Message>,
    liveness: Arc<Liveness>,
    every: Duration,
    pong_timeout: Duration,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if liveness.is_busy() {
            continue;
        }

        let seen = liveness.frames();
        if control.send(Message::Ping(b"parley".to_vec())).is_err() {
            return;
        }
        sleep(pong_timeout).await;

        if liveness.frames() == seen && !liveness.is_busy() {
            let _ = control.send(Message::Close(Some(CloseFrame {
                code: 1001,
                reason: "pong timeout".into(),
            })));
            return;
        }
    }
}
