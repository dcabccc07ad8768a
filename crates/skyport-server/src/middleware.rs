use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use redis::aio::ConnectionManager;
use redis::Script;

/// Fixed-window request limiter backed by Redis, guarding the release
/// upload route (spec §6: "100 requests / 15 min / IP"). The script
/// increments the window's counter and sets its expiry in one round trip
/// so two requests racing the window boundary can't both reset it.
const FIXED_WINDOW_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

#[derive(Clone)]
pub struct RateLimiter {
    conn: ConnectionManager,
    max_requests: u32,
    window_seconds: u64,
}

impl RateLimiter {
    pub fn new(conn: ConnectionManager, max_requests: u32, window_seconds: u64) -> Self {
        Self { conn, max_requests, window_seconds }
    }

    async fn record(&self, client_ip: &std::net::IpAddr) -> Result<u32, redis::RedisError> {
        let key = format!("ratelimit:upload:{client_ip}");
        let mut conn = self.conn.clone();
        Script::new(FIXED_WINDOW_SCRIPT)
            .key(key)
            .arg(self.window_seconds)
            .invoke_async(&mut conn)
            .await
    }
}

/// Rejects requests past the configured threshold with 429. A Redis
/// failure fails open — the upload path itself already tolerates cache
/// outages (spec §7), and a limiter outage shouldn't take releases down
/// with it.
pub async fn rate_limit_uploads(
    State(limiter): State<std::sync::Arc<RateLimiter>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let is_upload = request.method() == axum::http::Method::POST && request.uri().path().ends_with("/release");
    if !is_upload {
        return Ok(next.run(request).await);
    }

    match limiter.record(&addr.ip()).await {
        Ok(count) if count > limiter.max_requests => Err(StatusCode::TOO_MANY_REQUESTS),
        Ok(_) => Ok(next.run(request).await),
        Err(e) => {
            tracing::warn!(error = %e, "rate limiter unreachable, allowing request");
            Ok(next.run(request).await)
        }
    }
}
