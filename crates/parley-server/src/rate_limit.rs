use std::collections::HashMap;
use std::hash::Hash;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::warn;

/// Token bucket that refills continuously at `rate` tokens per second up
/// to `capacity`. Starts full.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    rate: f64,
    capacity: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            tokens: capacity,
            rate,
            capacity,
            last_refill: Instant::now(),
        }
    }

    /// Take one token if available.
    pub fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let refill = now.duration_since(self.last_refill).as_secs_f64() * self.rate;
        self.tokens = (self.tokens + refill).min(self.capacity);
        self.last_refill = now;

        let allowed = self.tokens >= 1.0;
        if allowed {
            self.tokens -= 1.0;
        }
        allowed
    }

    fn idle_for(&self, now: Instant) -> f64 {
        now.duration_since(self.last_refill).as_secs_f64()
    }
}

/// Keyed token buckets shared across requests.
#[derive(Clone)]
pub struct RateLimiter<K = IpAddr> {
    buckets: Arc<Mutex<HashMap<K, TokenBucket>>>,
    rate: f64,
    capacity: f64,
}

impl<K: Hash + Eq> RateLimiter<K> {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            rate,
            capacity,
        }
    }

    pub async fn check(&self, key: K) -> bool {
        let (rate, capacity) = (self.rate, self.capacity);
        self.buckets
            .lock()
            .await
            .entry(key)
            .or_insert_with(move || TokenBucket::new(rate, capacity))
            .try_take()
    }

    /// Forget buckets untouched for `max_idle_secs`.
    pub async fn purge_stale(&self, max_idle_secs: f64) {
        let now = Instant::now();
        self.buckets
            .lock()
            .await
            .retain(|_, bucket| bucket.idle_for(now) < max_idle_secs);
    }
}

impl Default for RateLimiter<IpAddr> {
    fn default() -> Self {
        Self::new(10.0, 30.0)
    }
}

pub async fn rate_limit_middleware(
    axum::extract::State(limiter): axum::extract::State<RateLimiter<IpAddr>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(ip) = extract_client_ip(&req) {
        if !limiter.check(ip).await {
            warn!(ip = %ip, path = %req.uri().path(), "Rate limit exceeded");
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
    }

    Ok(next.run(req).await)
}

/// ConnectInfo first, then X-Forwarded-For, then X-Real-IP.
fn extract_client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    if let Some(connect_info) = req.extensions().get::<ConnectInfo<std::net::SocketAddr>>() {
        return Some(connect_info.0.ip());
    }

    let header_ip = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok())
    };

    header_ip("x-forwarded-for").or_else(|| header_ip("x-real-ip"))
}
