use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::{HeaderValue, Method},
    middleware,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parley_shared::constants::PROTOCOL_VERSION;
use parley_shared::UserId;

use crate::config::ServerConfig;
use crate::engine::Engine;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::ws::ws_upgrade;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allowed_origin(state.config.frontend_url.as_deref()))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws_upgrade))
        .route("/api/presence", get(online_users))
        .route("/api/presence/:user_id", get(user_presence))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn allowed_origin(frontend_url: Option<&str>) -> AllowOrigin {
    match frontend_url {
        Some(url) => match HeaderValue::from_str(url) {
            Ok(origin) => AllowOrigin::exact(origin),
            Err(_) => {
                warn!(url, "Invalid FRONTEND_URL, allowing any origin");
                AllowOrigin::any()
            }
        },
        None => AllowOrigin::any(),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    protocol: &'static str,
    online_users: usize,
    connections: usize,
    uptime_secs: u64,
}

#[derive(Serialize)]
struct OnlineUsersResponse {
    online: Vec<UserId>,
}

#[derive(Serialize)]
struct UserPresenceResponse {
    user_id: UserId,
    online: bool,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    let presence = state.engine.presence();
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        protocol: PROTOCOL_VERSION,
        online_users: presence.snapshot_online_users().await.len(),
        connections: presence.connection_count().await,
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

async fn online_users(State(state): State<AppState>) -> Json<OnlineUsersResponse> {
    Json(OnlineUsersResponse {
        online: state.engine.presence().snapshot_online_users().await,
    })
}

async fn user_presence(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<UserPresenceResponse>, ServerError> {
    let user_id = UserId::parse_str(&raw_id)
        .map_err(|e| ServerError::BadRequest(format!("Invalid user id: {e}")))?;

    if state.engine.store().get_profile(user_id).await?.is_none() {
        return Err(ServerError::NotFound(format!("user {user_id}")));
    }

    Ok(Json(UserPresenceResponse {
        user_id,
        online: state.engine.presence().is_online(&user_id).await,
    }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
