//! Per-IP sliding-window rate limiting, tiered per route group.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::ApiResponse;

type TierMap = DashMap<&'static str, (RateLimitConfig, DashMap<IpAddr, Vec<Instant>>)>;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

/// In-memory limiter: each named tier tracks request timestamps per client IP.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    tiers: Arc<TierMap>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            tiers: Arc::new(DashMap::new()),
        }
    }

    pub fn add_tier(&self, name: &'static str, max_requests: u32, window: Duration) {
        self.tiers.insert(
            name,
            (
                RateLimitConfig {
                    max_requests,
                    window,
                },
                DashMap::new(),
            ),
        );
    }

    /// `Ok(())` when allowed, `Err(retry_after_secs)` when limited.
    ///
    /// A tier name that was never registered fails open: the request goes
    /// through and the misconfiguration is logged, rather than panicking
    /// inside the middleware.
    pub fn check(&self, tier: &'static str, ip: IpAddr) -> Result<(), u64> {
        let Some(tier_entry) = self.tiers.get(tier) else {
            tracing::error!("rate limit check against unregistered tier: {}", tier);
            return Ok(());
        };
        let (config, ip_map) = tier_entry.value();
        let now = Instant::now();
        let window_start = now - config.window;

        let mut entry = ip_map.entry(ip).or_insert_with(Vec::new);
        entry.retain(|t| *t > window_start);

        if entry.len() >= config.max_requests as usize {
            let oldest = entry[0];
            let retry_after = (oldest + config.window)
                .saturating_duration_since(now)
                .as_secs()
                .max(1);
            return Err(retry_after);
        }

        entry.push(now);
        Ok(())
    }

    /// Drop IPs silent for longer than twice their tier window.
    /// Runs from a periodic background task.
    pub fn cleanup(&self) {
        let now = Instant::now();
        for tier_entry in self.tiers.iter() {
            let (config, ip_map) = tier_entry.value();
            let cutoff = config.window * 2;
            ip_map.retain(|_ip, timestamps| {
                timestamps.retain(|t| now.duration_since(*t) < cutoff);
                !timestamps.is_empty()
            });
        }
    }
}

/// Client IP: X-Forwarded-For when behind the reverse proxy, else the socket.
pub fn extract_client_ip(req: &Request) -> IpAddr {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or_else(|| "127.0.0.1".parse().unwrap())
}

fn too_many_requests(retry_after: u64) -> Response {
    let body = ApiResponse::<()>::error(format!(
        "Too many requests. Try again in {} seconds",
        retry_after
    ));
    (
        StatusCode::TOO_MANY_REQUESTS,
        [("Retry-After", retry_after.to_string())],
        Json(body),
    )
        .into_response()
}

/// Single middleware for every tier; the tier name rides in the state.
pub async fn rate_limit(
    State((limiter, tier)): State<(RateLimiter, &'static str)>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let ip = extract_client_ip(&req);
    limiter.check(tier, ip).map_err(too_many_requests)?;
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::thread::sleep;

    fn test_ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn limiter_with(max: u32, window: Duration) -> RateLimiter {
        let limiter = RateLimiter::new();
        limiter.add_tier("test", max, window);
        limiter
    }

    #[test]
    fn test_allows_under_limit() {
        let limiter = limiter_with(3, Duration::from_secs(60));
        let ip = test_ip(1);
        assert!(limiter.check("test", ip).is_ok());
        assert!(limiter.check("test", ip).is_ok());
        assert!(limiter.check("test", ip).is_ok());
    }

    #[test]
    fn test_rejects_over_limit_with_retry_after() {
        let limiter = limiter_with(2, Duration::from_secs(60));
        let ip = test_ip(1);
        limiter.check("test", ip).unwrap();
        limiter.check("test", ip).unwrap();
        let retry_after = limiter.check("test", ip).unwrap_err();
        assert!((1..=60).contains(&retry_after));
    }

    #[test]
    fn test_ips_tracked_independently() {
        let limiter = limiter_with(1, Duration::from_secs(60));
        assert!(limiter.check("test", test_ip(1)).is_ok());
        assert!(limiter.check("test", test_ip(1)).is_err());
        assert!(limiter.check("test", test_ip(2)).is_ok());
    }

    #[test]
    fn test_tiers_tracked_independently() {
        let limiter = RateLimiter::new();
        limiter.add_tier("a", 1, Duration::from_secs(60));
        limiter.add_tier("b", 1, Duration::from_secs(60));
        let ip = test_ip(1);
        assert!(limiter.check("a", ip).is_ok());
        assert!(limiter.check("a", ip).is_err());
        assert!(limiter.check("b", ip).is_ok());
    }

    #[test]
    fn test_unregistered_tier_fails_open() {
        let limiter = limiter_with(1, Duration::from_secs(60));
        let ip = test_ip(1);
        assert!(limiter.check("nope", ip).is_ok());
        assert!(limiter.check("nope", ip).is_ok());
        // the registered tier still enforces its limit
        assert!(limiter.check("test", ip).is_ok());
        assert!(limiter.check("test", ip).is_err());
    }

    #[test]
    fn test_window_expiry_allows_again() {
        let limiter = limiter_with(1, Duration::from_millis(80));
        let ip = test_ip(1);
        assert!(limiter.check("test", ip).is_ok());
        assert!(limiter.check("test", ip).is_err());
        sleep(Duration::from_millis(120));
        assert!(limiter.check("test", ip).is_ok());
    }

    #[test]
    fn test_cleanup_drops_stale_keeps_active() {
        let limiter = limiter_with(2, Duration::from_millis(50));
        limiter.check("test", test_ip(1)).unwrap();
        sleep(Duration::from_millis(120)); // > 2× window
        limiter.cleanup();
        assert!(limiter.check("test", test_ip(1)).is_ok());

        let active = limiter_with(2, Duration::from_secs(60));
        active.check("test", test_ip(2)).unwrap();
        active.cleanup();
        active.check("test", test_ip(2)).unwrap();
        assert!(active.check("test", test_ip(2)).is_err());
    }
}
