//! # Rate Limiter
//!
//! Per-client-IP sliding window (§4.5.1), adapted from the single-window
//! `SlidingWindowLog` algorithm: one timestamp log per IP instead of one
//! shared log, pruned lazily on `allow()` and swept in the background so
//! idle IPs don't accumulate forever.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct Window {
    timestamps: Vec<Instant>,
}

/// Per-IP sliding window. `limit == 0` disables enforcement entirely:
/// `allow()` always returns `true` and no sweeper is spawned.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    visitors: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window, visitors: Mutex::new(HashMap::new()) }
    }

    pub fn is_disabled(&self) -> bool {
        self.limit == 0
    }

    /// Prunes `ip`'s timestamp list to entries strictly within the window,
    /// rejects if the pruned count already meets the limit, otherwise
    /// records `now` and accepts.
    pub fn allow(&self, ip: &str) -> bool {
        if self.limit == 0 {
            return true;
        }
        let now = Instant::now();
        let mut visitors = self.visitors.lock();
        let entry = visitors.entry(ip.to_string()).or_insert_with(|| Window { timestamps: Vec::new() });
        entry.timestamps.retain(|ts| now.duration_since(*ts) < self.window);

        if entry.timestamps.len() as u32 >= self.limit {
            return false;
        }
        entry.timestamps.push(now);
        true
    }

    pub fn tracked_visitors(&self) -> usize {
        self.visitors.lock().len()
    }

    /// Drops any visitor whose window has emptied out since the last sweep.
    fn sweep(&self) {
        let now = Instant::now();
        let window = self.window;
        let mut visitors = self.visitors.lock();
        visitors.retain(|_, w| {
            w.timestamps.retain(|ts| now.duration_since(*ts) < window);
            !w.timestamps.is_empty()
        });
    }
}

/// Owns the limiter plus the background sweeper task. `limit == 0`
/// suppresses the sweeper as well as enforcement.
pub struct RateLimiterHandle {
    pub limiter: std::sync::Arc<RateLimiter>,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl RateLimiterHandle {
    pub fn spawn(limit: u32, window: Duration) -> Self {
        let limiter = std::sync::Arc::new(RateLimiter::new(limit, window));
        if limit == 0 {
            return Self { limiter, shutdown_tx: None, handle: None };
        }

        let (tx, mut rx) = watch::channel(false);
        let sweep_limiter = std::sync::Arc::clone(&limiter);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(window) => {
                        sweep_limiter.sweep();
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        Self { limiter, shutdown_tx: Some(tx), handle: Some(handle) }
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

/// IP extraction precedence (§4.5.1): `X-Forwarded-For` first hop, trimmed,
/// before the first comma; else `X-Real-IP`; else the socket's peer host.
pub fn extract_client_ip(forwarded_for: Option<&str>, real_ip: Option<&str>, remote_addr: &str) -> String {
    if let Some(xff) = forwarded_for {
        if let Some(first) = xff.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    if let Some(real) = real_ip {
        let trimmed = real.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    remote_addr.rsplit_once(':').map(|(host, _)| host).unwrap_or(remote_addr).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_plus_one_call_within_window_is_denied() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.allow("1.2.3.4"));
        assert!(limiter.allow("1.2.3.4"));
        assert!(!limiter.allow("1.2.3.4"));
    }

    #[test]
    fn call_after_window_elapses_is_allowed_again() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));
        assert!(limiter.allow("1.2.3.4"));
        assert!(!limiter.allow("1.2.3.4"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.allow("1.2.3.4"));
    }

    #[test]
    fn zero_limit_disables_enforcement() {
        let limiter = RateLimiter::new(0, Duration::from_secs(60));
        for _ in 0..1000 {
            assert!(limiter.allow("1.2.3.4"));
        }
        assert!(limiter.is_disabled());
    }

    #[test]
    fn each_ip_has_an_independent_window() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.allow("1.1.1.1"));
        assert!(limiter.allow("2.2.2.2"));
        assert!(!limiter.allow("1.1.1.1"));
    }

    #[test]
    fn extract_client_ip_prefers_forwarded_for_first_hop() {
        let ip = extract_client_ip(Some("10.0.0.1, 10.0.0.2"), Some("10.0.0.3"), "10.0.0.4:8080");
        assert_eq!(ip, "10.0.0.1");
    }

    #[test]
    fn extract_client_ip_falls_back_to_real_ip() {
        let ip = extract_client_ip(None, Some("10.0.0.3"), "10.0.0.4:8080");
        assert_eq!(ip, "10.0.0.3");
    }

    #[test]
    fn extract_client_ip_falls_back_to_remote_addr_host() {
        let ip = extract_client_ip(None, None, "10.0.0.4:8080");
        assert_eq!(ip, "10.0.0.4");
    }

    #[tokio::test]
    async fn sweeper_removes_idle_visitors() {
        let handle = RateLimiterHandle::spawn(5, Duration::from_millis(30));
        assert!(handle.limiter.allow("1.2.3.4"));
        assert_eq!(handle.limiter.tracked_visitors(), 1);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(handle.limiter.tracked_visitors(), 0);
        handle.shutdown().await;
    }
}
