//! Per-client request rate limiting
//!
//! Fixed-window counters keyed by client IP. Once a client has used its
//! window, further requests are answered with `429 RATE_LIMITED` until the
//! window rolls over.

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;
use crate::error::ApiError;

/// Windows kept before expired ones are swept
const PRUNE_THRESHOLD: usize = 10_000;

/// Key used when the peer address is unknown
const ANONYMOUS: &str = "anonymous";

struct Window {
    count: u32,
    started: Instant,
}

/// Fixed-window limiter
pub struct RateLimiter {
    /// Requests per window
    max_requests: u32,

    /// Window duration
    window: Duration,

    /// Per-client windows
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: DashMap::new(),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, config.window())
    }

    /// Count a request for `key`, or return how long until its window resets
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        if self.windows.len() > PRUNE_THRESHOLD {
            self.prune();
        }

        let now = Instant::now();
        let mut window = self.windows.entry(key.to_string()).or_insert_with(|| Window {
            count: 0,
            started: now,
        });

        let elapsed = now.duration_since(window.started);
        if elapsed >= self.window {
            window.count = 0;
            window.started = now;
        } else if window.count >= self.max_requests {
            return Err(self.window - elapsed);
        }
        window.count += 1;
        Ok(())
    }

    /// Requests left in the current window for `key`
    pub fn remaining(&self, key: &str) -> u32 {
        match self.windows.get(key) {
            Some(window) if window.started.elapsed() < self.window => {
                self.max_requests.saturating_sub(window.count)
            }
            _ => self.max_requests,
        }
    }

    /// Drop windows that have rolled over; returns how many were removed
    pub fn prune(&self) -> usize {
        let before = self.windows.len();
        let window = self.window;
        self.windows.retain(|_, entry| entry.started.elapsed() < window);
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

/// Middleware rejecting clients over their limit
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let client = client_key(&request);
    if let Err(retry_after) = limiter.check(&client) {
        tracing::debug!(%client, "Rate limit exceeded");
        return Err(ApiError::RateLimited {
            retry_after_secs: retry_after.as_secs().max(1),
        });
    }
    Ok(next.run(request).await)
}

fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| ANONYMOUS.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_per_client() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check("10.0.0.1").is_ok());
        assert!(limiter.check("10.0.0.1").is_ok());

        let retry_after = limiter.check("10.0.0.1").unwrap_err();
        assert!(retry_after <= Duration::from_secs(60));
        assert_eq!(limiter.remaining("10.0.0.1"), 0);

        assert!(limiter.check("10.0.0.2").is_ok());
        assert_eq!(limiter.remaining("10.0.0.2"), 1);
        assert_eq!(limiter.remaining("10.0.0.3"), 2);
    }

    #[test]
    fn test_window_rolls_over() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("a").is_err());

        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check("a").is_ok());
    }

    #[test]
    fn test_prune_drops_expired() {
        let limiter = RateLimiter::new(5, Duration::from_millis(20));
        limiter.check("a").unwrap();
        limiter.check("b").unwrap();
        assert_eq!(limiter.tracked_clients(), 2);

        std::thread::sleep(Duration::from_millis(30));
        limiter.check("c").unwrap();
        assert_eq!(limiter.prune(), 2);
        assert_eq!(limiter.tracked_clients(), 1);
    }
}
