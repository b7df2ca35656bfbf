// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fixed-window admission control per wallet and per client IP.
//!
//! Both dimensions are tracked independently. The IP threshold is set higher
//! than the wallet threshold: it is a Sybil backstop, the wallet limit is the
//! primary one. State lives in process memory only, so a restart resets all
//! counters.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// Limiter thresholds and timings.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Length of one counting window.
    pub window: Duration,
    /// Requests allowed per wallet per window.
    pub max_wallet_requests: u32,
    /// Requests allowed per client IP per window.
    pub max_ip_requests: u32,
    /// Minimum spacing between expired-entry sweeps.
    pub cleanup_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_wallet_requests: 10,
            max_ip_requests: 50,
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

/// Which dimension denied (or most constrained) a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LimitDimension {
    Wallet,
    Ip,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// Set only when the request was denied.
    pub limited_by: Option<LimitDimension>,
}

/// Counters snapshot for monitoring.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RateLimitStats {
    pub wallet_entries: usize,
    pub ip_entries: usize,
    pub last_cleanup: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u32,
    reset_at: DateTime<Utc>,
}

type Counters = Mutex<HashMap<String, RateLimitEntry>>;

/// In-memory dual-dimension rate limiter.
pub struct RateLimiter {
    config: RateLimitConfig,
    window: TimeDelta,
    cleanup_interval: TimeDelta,
    wallets: Counters,
    ips: Counters,
    last_cleanup: Mutex<DateTime<Utc>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let window = TimeDelta::from_std(config.window).unwrap_or(TimeDelta::MAX);
        let cleanup_interval =
            TimeDelta::from_std(config.cleanup_interval).unwrap_or(TimeDelta::MAX);
        Self {
            config,
            window,
            cleanup_interval,
            wallets: Mutex::new(HashMap::new()),
            ips: Mutex::new(HashMap::new()),
            last_cleanup: Mutex::new(Utc::now()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count one request against `wallet`.
    pub fn check_wallet(&self, wallet: &str) -> RateLimitDecision {
        self.check(
            &self.wallets,
            wallet,
            self.config.max_wallet_requests,
            LimitDimension::Wallet,
        )
    }

    /// Count one request against `ip`.
    pub fn check_ip(&self, ip: &str) -> RateLimitDecision {
        self.check(&self.ips, ip, self.config.max_ip_requests, LimitDimension::Ip)
    }

    /// Wallet first, then IP. A request without a resolvable client IP is
    /// only limited per wallet.
    ///
    /// When both allow, the result carries the smaller remaining count and
    /// the later reset time of the two.
    pub fn check_combined(&self, wallet: &str, ip: Option<&str>) -> RateLimitDecision {
        let wallet_limit = self.check_wallet(wallet);
        if !wallet_limit.allowed {
            return wallet_limit;
        }

        let Some(ip) = ip else {
            return wallet_limit;
        };

        let ip_limit = self.check_ip(ip);
        if !ip_limit.allowed {
            return ip_limit;
        }

        RateLimitDecision {
            allowed: true,
            remaining: wallet_limit.remaining.min(ip_limit.remaining),
            reset_at: wallet_limit.reset_at.max(ip_limit.reset_at),
            limited_by: None,
        }
    }

    pub fn stats(&self) -> RateLimitStats {
        RateLimitStats {
            wallet_entries: lock_counters(&self.wallets).len(),
            ip_entries: lock_counters(&self.ips).len(),
            last_cleanup: *self
                .last_cleanup
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    fn check(
        &self,
        counters: &Counters,
        key: &str,
        max: u32,
        dimension: LimitDimension,
    ) -> RateLimitDecision {
        self.cleanup_expired();

        let now = Utc::now();
        let key = key.to_lowercase();
        let mut entries = lock_counters(counters);

        if let Some(entry) = entries.get_mut(&key) {
            if entry.reset_at > now {
                if entry.count >= max {
                    tracing::debug!(key = %key, ?dimension, "Rate limit exceeded");
                    return RateLimitDecision {
                        allowed: false,
                        remaining: 0,
                        reset_at: entry.reset_at,
                        limited_by: Some(dimension),
                    };
                }
                entry.count += 1;
                return RateLimitDecision {
                    allowed: true,
                    remaining: max - entry.count,
                    reset_at: entry.reset_at,
                    limited_by: None,
                };
            }
        }

        // First touch in this window: replace, never increment.
        let reset_at = now
            .checked_add_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        entries.insert(key, RateLimitEntry { count: 1, reset_at });
        RateLimitDecision {
            allowed: true,
            remaining: max.saturating_sub(1),
            reset_at,
            limited_by: None,
        }
    }

    /// Drop expired windows, at most once per cleanup interval.
    fn cleanup_expired(&self) {
        let now = Utc::now();
        {
            let mut last = self
                .last_cleanup
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if now.signed_duration_since(*last) < self.cleanup_interval {
                return;
            }
            *last = now;
        }

        let mut removed = 0;
        for counters in [&self.wallets, &self.ips] {
            let mut entries = lock_counters(counters);
            let before = entries.len();
            entries.retain(|_, entry| entry.reset_at > now);
            removed += before - entries.len();
        }

        if removed > 0 {
            tracing::debug!(removed, "Purged expired rate-limit windows");
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

// Counters are plain integers, a panic mid-update cannot leave them invalid.
fn lock_counters(counters: &Counters) -> std::sync::MutexGuard<'_, HashMap<String, RateLimitEntry>> {
    counters.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_wallet: u32, max_ip: u32, window: Duration) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            window,
            max_wallet_requests: max_wallet,
            max_ip_requests: max_ip,
            cleanup_interval: Duration::from_secs(300),
        })
    }

    #[test]
    fn wallet_denies_exactly_the_call_past_max() {
        let limiter = limiter(3, 10, Duration::from_secs(60));

        let remaining: Vec<u32> = (0..3)
            .map(|_| {
                let decision = limiter.check_wallet("0xabc");
                assert!(decision.allowed);
                decision.remaining
            })
            .collect();
        assert_eq!(remaining, vec![2, 1, 0]);

        let denied = limiter.check_wallet("0xabc");
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.limited_by, Some(LimitDimension::Wallet));
    }

    #[test]
    fn window_elapse_resets_counter() {
        let limiter = limiter(2, 10, Duration::from_millis(40));
        assert!(limiter.check_wallet("0xabc").allowed);
        assert!(limiter.check_wallet("0xabc").allowed);
        assert!(!limiter.check_wallet("0xabc").allowed);

        std::thread::sleep(Duration::from_millis(80));

        let decision = limiter.check_wallet("0xabc");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }

    #[test]
    fn denial_keeps_original_reset_time() {
        let limiter = limiter(1, 10, Duration::from_secs(60));
        let first = limiter.check_wallet("0xabc");
        let denied = limiter.check_wallet("0xabc");
        assert_eq!(first.reset_at, denied.reset_at);
    }

    #[test]
    fn keys_are_case_insensitive() {
        let limiter = limiter(1, 10, Duration::from_secs(60));
        assert!(limiter.check_wallet("0xABCDEF").allowed);
        assert!(!limiter.check_wallet("0xabcdef").allowed);
    }

    #[test]
    fn ip_store_is_separate_with_its_own_threshold() {
        let limiter = limiter(1, 3, Duration::from_secs(60));
        assert!(limiter.check_wallet("10.0.0.1").allowed);
        assert!(!limiter.check_wallet("10.0.0.1").allowed);

        // Same key, different store.
        assert_eq!(limiter.check_ip("10.0.0.1").remaining, 2);
        assert_eq!(limiter.check_ip("10.0.0.1").remaining, 1);
        assert_eq!(limiter.check_ip("10.0.0.1").remaining, 0);
        assert!(!limiter.check_ip("10.0.0.1").allowed);
    }

    #[test]
    fn combined_reports_wallet_denial_first() {
        let limiter = limiter(1, 1, Duration::from_secs(60));
        assert!(limiter.check_combined("0xabc", Some("1.2.3.4")).allowed);

        let denied = limiter.check_combined("0xabc", Some("1.2.3.4"));
        assert!(!denied.allowed);
        assert_eq!(denied.limited_by, Some(LimitDimension::Wallet));
    }

    #[test]
    fn combined_reports_ip_denial() {
        let limiter = limiter(5, 1, Duration::from_secs(60));
        assert!(limiter.check_combined("0xaaa", Some("1.2.3.4")).allowed);

        let denied = limiter.check_combined("0xbbb", Some("1.2.3.4"));
        assert!(!denied.allowed);
        assert_eq!(denied.limited_by, Some(LimitDimension::Ip));
        assert_eq!(denied.remaining, 0);
    }

    #[test]
    fn combined_returns_min_remaining_and_latest_reset() {
        let limiter = limiter(5, 3, Duration::from_secs(60));
        // Burn one IP slot under another wallet so the IP is the tighter one.
        // Its window opens first, so the wallet window ends later.
        let ip_window = limiter.check_ip("1.2.3.4");
        std::thread::sleep(Duration::from_millis(5));

        let decision = limiter.check_combined("0xabc", Some("1.2.3.4"));
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
        assert_eq!(decision.limited_by, None);

        let wallet_window = limiter.check_wallet("0xabc");
        assert!(wallet_window.reset_at > ip_window.reset_at);
        assert_eq!(decision.reset_at, wallet_window.reset_at);

        // Reverse the order: an older wallet window and a fresh IP.
        let older_wallet = limiter.check_wallet("0xdef");
        std::thread::sleep(Duration::from_millis(5));
        let decision = limiter.check_combined("0xdef", Some("5.6.7.8"));
        let ip_window = limiter.check_ip("5.6.7.8");
        assert!(ip_window.reset_at > older_wallet.reset_at);
        assert_eq!(decision.reset_at, ip_window.reset_at);
    }

    #[test]
    fn combined_without_ip_uses_wallet_only() {
        let limiter = limiter(2, 1, Duration::from_secs(60));
        let decision = limiter.check_combined("0xabc", None);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
        assert_eq!(limiter.stats().ip_entries, 0);
    }

    #[test]
    fn cleanup_removes_expired_windows() {
        let limiter = RateLimiter::new(RateLimitConfig {
            window: Duration::from_millis(20),
            max_wallet_requests: 5,
            max_ip_requests: 5,
            cleanup_interval: Duration::ZERO,
        });
        limiter.check_wallet("0xone");
        limiter.check_ip("1.1.1.1");
        assert_eq!(limiter.stats().wallet_entries, 1);

        std::thread::sleep(Duration::from_millis(50));
        limiter.check_wallet("0xtwo");

        let stats = limiter.stats();
        assert_eq!(stats.wallet_entries, 1);
        assert_eq!(stats.ip_entries, 0);
    }
}
