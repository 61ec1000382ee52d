//! Per-client fixed-window request throttling.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use stowage_core::AppError;
use tokio::sync::Mutex;

use crate::error::HttpAppError;

/// Buckets kept before expired ones are pruned.
const MAX_BUCKETS: usize = 10_000;

#[derive(Clone, Debug)]
struct RateLimitBucket {
    count: u32,
    reset_at: Instant,
}

impl RateLimitBucket {
    fn new(window: Duration) -> Self {
        Self {
            count: 0,
            reset_at: Instant::now() + window,
        }
    }

    fn check_and_increment(&mut self, limit: u32, window: Duration) -> (bool, u32) {
        let now = Instant::now();

        // Reset if window expired
        if now >= self.reset_at {
            self.count = 0;
            self.reset_at = now + window;
        }

        if self.count < limit {
            self.count += 1;
            (true, limit.saturating_sub(self.count))
        } else {
            (false, 0)
        }
    }

    fn reset_in(&self) -> Duration {
        self.reset_at.saturating_duration_since(Instant::now())
    }
}

/// In-memory rate limiter keyed by client address. A limit of zero disables it.
#[derive(Clone)]
pub struct HttpRateLimiter {
    buckets: Arc<Mutex<HashMap<String, RateLimitBucket>>>,
    limit_per_window: u32,
    window: Duration,
    max_buckets: usize,
    trusted_proxy_count: usize,
}

impl HttpRateLimiter {
    pub fn new(limit_per_window: u32, window: Duration) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            limit_per_window,
            window,
            max_buckets: MAX_BUCKETS,
            trusted_proxy_count: 0,
        }
    }

    /// Number of reverse proxies whose `X-Forwarded-For` entries are trusted.
    pub fn with_trusted_proxies(mut self, trusted_proxy_count: usize) -> Self {
        self.trusted_proxy_count = trusted_proxy_count;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.limit_per_window > 0
    }

    pub fn limit_per_window(&self) -> u32 {
        self.limit_per_window
    }

    /// Count one request for `key`. Returns the remaining allowance, or the
    /// time until the window resets when the key is over its limit.
    pub async fn check_rate_limit(&self, key: &str) -> Result<u32, Duration> {
        let mut buckets = self.buckets.lock().await;

        if buckets.len() >= self.max_buckets {
            let now = Instant::now();
            let before = buckets.len();
            buckets.retain(|_, bucket| bucket.reset_at > now);

            // Still full: evict the bucket closest to reset.
            if buckets.len() >= self.max_buckets {
                let oldest = buckets
                    .iter()
                    .min_by_key(|(_, bucket)| bucket.reset_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    buckets.remove(&oldest);
                }
            }

            tracing::debug!(
                removed = before.saturating_sub(buckets.len()),
                remaining_buckets = buckets.len(),
                "Pruned rate limit buckets"
            );
        }

        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| RateLimitBucket::new(self.window));

        let (allowed, remaining) = bucket.check_and_increment(self.limit_per_window, self.window);
        if allowed {
            Ok(remaining)
        } else {
            Err(bucket.reset_in())
        }
    }
}

/// Client key for throttling.
///
/// Each of the `trusted_proxy_count` proxies in front of the service appends
/// the address it received the request from, so the client is the entry that
/// many places from the right of `X-Forwarded-For`. Entries further left are
/// client-controlled and never used. With no trusted proxies, or a chain
/// shorter than expected, the peer address is used.
pub fn client_key(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxy_count: usize,
) -> String {
    let forwarded = (trusted_proxy_count > 0)
        .then(|| headers.get("x-forwarded-for"))
        .flatten()
        .and_then(|value| value.to_str().ok())
        .and_then(|value| forwarded_client(value, trusted_proxy_count));

    match (forwarded, peer) {
        (Some(ip), _) => ip.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => "unknown".to_string(),
    }
}

fn forwarded_client(header_value: &str, trusted_proxy_count: usize) -> Option<IpAddr> {
    let ips: Vec<&str> = header_value
        .split(',')
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .collect();

    let position = ips.len().checked_sub(trusted_proxy_count)?;
    ips.get(position)?.parse().ok()
}

/// HTTP rate limiting middleware
///
/// Adds `X-RateLimit-Limit` and `X-RateLimit-Remaining` to every response and
/// answers `429 Too Many Requests` with `Retry-After` once a client is over its
/// limit for the current window.
pub async fn rate_limit_middleware(
    State(rate_limiter): State<HttpRateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    if !rate_limiter.is_enabled() {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(request.headers(), peer, rate_limiter.trusted_proxy_count);
    let limit = rate_limiter.limit_per_window();

    match rate_limiter.check_rate_limit(&key).await {
        Ok(remaining) => {
            let mut response = next.run(request).await;
            set_rate_limit_headers(&mut response, limit, remaining);
            response
        }
        Err(reset_in) => {
            tracing::warn!(
                client = %key,
                path = %request.uri().path(),
                limit,
                "Rate limit exceeded"
            );

            let mut response = HttpAppError(AppError::RateLimited {
                retry_after_secs: reset_in.as_secs().max(1),
            })
            .into_response();
            set_rate_limit_headers(&mut response, limit, 0);
            response
        }
    }
}

fn set_rate_limit_headers(response: &mut Response, limit: u32, remaining: u32) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", value);
    }
}
