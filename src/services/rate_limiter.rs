//! Rate limiter for login attempts
//!
//! Sliding-window counters kept in memory:
//! - failed logins per username (5 per 15 minutes)
//! - login requests per client IP (10 per minute)

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::net::IpAddr;
use tokio::sync::RwLock;

const USERNAME_MAX_FAILURES: usize = 5;
const USERNAME_WINDOW_MINUTES: i64 = 15;
const IP_MAX_REQUESTS: usize = 10;
const IP_WINDOW_MINUTES: i64 = 1;

/// Timestamps of recent events per key
struct SlidingWindow<K> {
    limit: usize,
    window: Duration,
    events: RwLock<HashMap<K, Vec<DateTime<Utc>>>>,
}

impl<K: Eq + Hash> SlidingWindow<K> {
    fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            events: RwLock::new(HashMap::new()),
        }
    }

    async fn is_limited(&self, key: &K) -> bool {
        let cutoff = Utc::now() - self.window;
        let events = self.events.read().await;
        events
            .get(key)
            .map(|times| times.iter().filter(|t| **t > cutoff).count() >= self.limit)
            .unwrap_or(false)
    }

    async fn record(&self, key: K) {
        let now = Utc::now();
        let cutoff = now - self.window;
        let mut events = self.events.write().await;
        let times = events.entry(key).or_default();
        times.retain(|t| *t > cutoff);
        times.push(now);
    }

    async fn clear(&self, key: &K) {
        self.events.write().await.remove(key);
    }

    async fn prune(&self) {
        let cutoff = Utc::now() - self.window;
        self.events.write().await.retain(|_, times| {
            times.retain(|t| *t > cutoff);
            !times.is_empty()
        });
    }

    async fn len(&self) -> usize {
        self.events.read().await.len()
    }
}

/// Login rate limiter
pub struct LoginRateLimiter {
    usernames: SlidingWindow<String>,
    ips: SlidingWindow<IpAddr>,
}

impl LoginRateLimiter {
    pub fn new() -> Self {
        Self {
            usernames: SlidingWindow::new(
                USERNAME_MAX_FAILURES,
                Duration::minutes(USERNAME_WINDOW_MINUTES),
            ),
            ips: SlidingWindow::new(IP_MAX_REQUESTS, Duration::minutes(IP_WINDOW_MINUTES)),
        }
    }

    /// Check if a username has too many recent failures (case-insensitive)
    pub async fn is_username_limited(&self, username: &str) -> bool {
        self.usernames.is_limited(&username.to_lowercase()).await
    }

    /// Record a failed login attempt for a username
    pub async fn record_failed_attempt(&self, username: &str) {
        self.usernames.record(username.to_lowercase()).await;
    }

    /// Forget failures for a username after a successful login
    pub async fn clear_username_attempts(&self, username: &str) {
        self.usernames.clear(&username.to_lowercase()).await;
    }

    /// Check if an IP has sent too many login requests
    pub async fn is_ip_limited(&self, ip: IpAddr) -> bool {
        self.ips.is_limited(&ip).await
    }

    /// Record a login request from an IP
    pub async fn record_ip_request(&self, ip: IpAddr) {
        self.ips.record(ip).await;
    }

    /// Drop keys whose events have all aged out; called by a periodic task
    pub async fn cleanup(&self) {
        self.usernames.prune().await;
        self.ips.prune().await;
    }

    /// Number of tracked usernames and IPs
    pub async fn tracked_keys(&self) -> (usize, usize) {
        (self.usernames.len().await, self.ips.len().await)
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn test_username_rate_limit() {
        let limiter = LoginRateLimiter::new();

        for _ in 0..4 {
            assert!(!limiter.is_username_limited("warlock").await);
            limiter.record_failed_attempt("warlock").await;
        }
        limiter.record_failed_attempt("warlock").await;
        assert!(limiter.is_username_limited("warlock").await);

        limiter.clear_username_attempts("warlock").await;
        assert!(!limiter.is_username_limited("warlock").await);
    }

    #[tokio::test]
    async fn test_ip_rate_limit() {
        let limiter = LoginRateLimiter::new();
        let ip = IpAddr::from_str("127.0.0.1").unwrap();
        let other = IpAddr::from_str("10.0.0.2").unwrap();

        for _ in 0..9 {
            assert!(!limiter.is_ip_limited(ip).await);
            limiter.record_ip_request(ip).await;
        }
        limiter.record_ip_request(ip).await;

        assert!(limiter.is_ip_limited(ip).await);
        assert!(!limiter.is_ip_limited(other).await);
    }

    #[tokio::test]
    async fn test_case_insensitive_username() {
        let limiter = LoginRateLimiter::new();

        limiter.record_failed_attempt("Druid").await;
        limiter.record_failed_attempt("druid").await;
        limiter.record_failed_attempt("DRUID").await;
        assert!(!limiter.is_username_limited("druid").await);

        limiter.record_failed_attempt("druid").await;
        limiter.record_failed_attempt("druid").await;
        assert!(limiter.is_username_limited("Druid").await);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_recent_entries() {
        let limiter = LoginRateLimiter::new();
        limiter.record_failed_attempt("monk").await;
        limiter
            .record_ip_request(IpAddr::from_str("127.0.0.1").unwrap())
            .await;

        limiter.cleanup().await;

        assert_eq!(limiter.tracked_keys().await, (1, 1));
    }

    #[tokio::test]
    async fn test_expired_events_do_not_count() {
        let window = SlidingWindow::new(1, Duration::minutes(1));
        window
            .events
            .write()
            .await
            .insert("old", vec![Utc::now() - Duration::minutes(5)]);

        assert!(!window.is_limited(&"old").await);
        window.prune().await;
        assert_eq!(window.len().await, 0);
    }
}
