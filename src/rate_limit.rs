//! Fixed-window request budget per client address for the `/api/v1` routes.

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::RETRY_AFTER, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::{sync::Mutex, time::Instant};
use tracing::warn;

use crate::{config::RateLimitConfig, error::AppError, state::AppState};

/// Expired windows are swept once this many clients are tracked.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after: Duration },
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// `None` is a client without a known address; all of those share one
    /// budget.
    async fn check(&self, client: Option<IpAddr>) -> RateLimitDecision;
}

struct Window {
    started: Instant,
    hits: u32,
}

pub struct FixedWindowLimiter {
    max_requests: u32,
    window: Duration,
    clients: Mutex<HashMap<Option<IpAddr>, Window>>,
}

impl FixedWindowLimiter {
    pub fn new(cfg: &RateLimitConfig) -> Self {
        Self {
            max_requests: cfg.max_requests,
            window: cfg.window,
            clients: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl RateLimiter for FixedWindowLimiter {
    async fn check(&self, client: Option<IpAddr>) -> RateLimitDecision {
        let now = Instant::now();
        let mut clients = self.clients.lock().await;

        if clients.len() >= PRUNE_THRESHOLD {
            let window = self.window;
            clients.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = clients.entry(client).or_insert(Window {
            started: now,
            hits: 0,
        });
        let elapsed = now.duration_since(entry.started);
        if elapsed >= self.window {
            *entry = Window {
                started: now,
                hits: 0,
            };
        } else if entry.hits >= self.max_requests {
            return RateLimitDecision::Limited {
                retry_after: self.window - elapsed,
            };
        }

        entry.hits += 1;
        RateLimitDecision::Allowed
    }
}

/// Middleware: spends one unit of the caller's budget or answers 429.
pub async fn limit_by_client(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    match state.limiter.check(client).await {
        RateLimitDecision::Allowed => next.run(request).await,
        RateLimitDecision::Limited { retry_after } => {
            warn!(client = ?client, "rate limit exceeded");
            let mut response = AppError::TooManyRequests(
                "Too many requests from this IP, please try again later".into(),
            )
            .into_response();
            let seconds = retry_after.as_secs().max(1).to_string();
            if let Ok(value) = HeaderValue::from_str(&seconds) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, window: Duration) -> FixedWindowLimiter {
        FixedWindowLimiter::new(&RateLimitConfig {
            max_requests,
            window,
        })
    }

    #[tokio::test]
    async fn budget_is_per_client() {
        let limiter = limiter(2, Duration::from_secs(3600));
        let a = Some(IpAddr::from([10, 0, 0, 1]));
        let b = Some(IpAddr::from([10, 0, 0, 2]));

        assert_eq!(limiter.check(a).await, RateLimitDecision::Allowed);
        assert_eq!(limiter.check(a).await, RateLimitDecision::Allowed);
        match limiter.check(a).await {
            RateLimitDecision::Limited { retry_after } => {
                assert!(retry_after <= Duration::from_secs(3600));
                assert!(retry_after > Duration::from_secs(3500));
            }
            other => panic!("expected limit, got {other:?}"),
        }
        assert_eq!(limiter.check(b).await, RateLimitDecision::Allowed);
        assert_eq!(limiter.check(None).await, RateLimitDecision::Allowed);
    }

    #[tokio::test]
    async fn window_reopens_after_it_elapses() {
        let limiter = limiter(1, Duration::from_millis(50));
        let client = Some(IpAddr::from([127, 0, 0, 1]));
        assert_eq!(limiter.check(client).await, RateLimitDecision::Allowed);
        assert!(matches!(
            limiter.check(client).await,
            RateLimitDecision::Limited { .. }
        ));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(limiter.check(client).await, RateLimitDecision::Allowed);
    }
}
