//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Current WebSocket connection count.
    pub connections: usize,
    /// Accepted async items not yet finished.
    pub async_backlog: usize,
    /// Handlers registered by the startup scan.
    pub handlers: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    async_backlog: usize,
    handlers: usize,
) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        async_backlog,
        handlers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), 0, 0, 0);
        assert_eq!(resp.status, "ok");
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, 0, 0, 0);
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn counters_pass_through() {
        let resp = health_check(Instant::now(), 5, 2, 12);
        assert_eq!(resp.connections, 5);
        assert_eq!(resp.async_backlog, 2);
        assert_eq!(resp.handlers, 12);
    }

    #[test]
    fn serialization() {
        let resp = health_check(Instant::now(), 2, 1, 3);
        let parsed: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&resp).unwrap()).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 2);
        assert_eq!(parsed["async_backlog"], 1);
        assert_eq!(parsed["handlers"], 3);
        assert!(parsed["uptime_secs"].is_number());
    }
}
