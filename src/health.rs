//! Per-provider health tracking with a time-gated blacklist.
//!
//! The [`HealthMonitor`] is a circuit breaker keyed by [`ProviderId`]. Each
//! failure is timestamped; failures older than `failure_window` are pruned on
//! every [`HealthMonitor::record_failure`]. Once the pruned count reaches
//! `failure_threshold`, the provider is blacklisted for
//! `recovery_check_interval`.
//!
//! Recovery is purely time-gated. A success clears the failure history but
//! does not lift an active blacklist, so one lucky response during an outage
//! cannot mask a flapping provider. When the blacklist runs out, the entry
//! and the failure history are both cleared (fresh start).
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use litfetch_core::{HealthConfig, HealthMonitor, ProviderId};
//!
//! let monitor = HealthMonitor::new(HealthConfig {
//!     failure_threshold: 2,
//!     ..HealthConfig::default()
//! });
//! let crossref = ProviderId::new("crossref").unwrap();
//!
//! monitor.record_failure(&crossref);
//! assert!(monitor.is_available(&crossref));
//! monitor.record_failure(&crossref);
//! assert!(!monitor.is_available(&crossref));
//! assert!(monitor.blacklist_remaining(&crossref) > Duration::ZERO);
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::provider::ProviderId;

/// Default number of failures within the window that trips the blacklist.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default sliding window for counting failures (60 seconds).
pub const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(60);

/// Default blacklist duration (5 minutes).
pub const DEFAULT_RECOVERY_CHECK_INTERVAL: Duration = Duration::from_secs(300);

/// Health monitor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    /// When false, every provider is always available.
    pub enabled: bool,
    /// Failures within `failure_window` that blacklist a provider.
    pub failure_threshold: u32,
    /// How far back failures count.
    pub failure_window: Duration,
    /// How long a blacklist lasts.
    pub recovery_check_interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            failure_window: DEFAULT_FAILURE_WINDOW,
            recovery_check_interval: DEFAULT_RECOVERY_CHECK_INTERVAL,
        }
    }
}

/// Point-in-time view of one provider's health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderHealth {
    /// The provider.
    pub provider: ProviderId,
    /// Failures currently held in the window.
    pub recent_failures: usize,
    /// Remaining blacklist time, if blacklisted.
    pub blacklisted_for: Option<Duration>,
}

#[derive(Debug, Default)]
struct ProviderState {
    failures: VecDeque<Instant>,
    blacklisted_until: Option<Instant>,
}

impl ProviderState {
    /// Clears an elapsed blacklist together with the failure history.
    /// Returns true when a blacklist was lifted.
    fn expire_blacklist(&mut self, now: Instant) -> bool {
        match self.blacklisted_until {
            Some(until) if now >= until => {
                self.blacklisted_until = None;
                self.failures.clear();
                true
            }
            _ => false,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.failures.front() {
            if now.duration_since(oldest) > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Sliding-window circuit breaker for providers.
///
/// Designed to be shared through `Arc`. State lives in a `DashMap`, and no
/// shard lock is held across an await.
#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthConfig,
    providers: DashMap<ProviderId, ProviderState>,
}

impl HealthMonitor {
    /// Creates a monitor with the given settings.
    #[must_use]
    pub fn new(config: HealthConfig) -> Self {
        debug!(
            enabled = config.enabled,
            threshold = config.failure_threshold,
            window_secs = config.failure_window.as_secs_f64(),
            recovery_secs = config.recovery_check_interval.as_secs_f64(),
            "creating health monitor"
        );
        Self {
            config,
            providers: DashMap::new(),
        }
    }

    /// Creates a monitor that never blacklists.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(HealthConfig {
            enabled: false,
            ..HealthConfig::default()
        })
    }

    /// Returns true when the monitor tracks failures.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Returns the active settings.
    #[must_use]
    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Records a failed call, blacklisting the provider once the threshold
    /// is reached within the window.
    pub fn record_failure(&self, provider: &ProviderId) {
        if !self.config.enabled {
            return;
        }

        let now = Instant::now();
        let mut state = self.providers.entry(provider.clone()).or_default();
        if state.expire_blacklist(now) {
            info!(provider = %provider, "provider blacklist expired");
        }

        state.failures.push_back(now);
        state.prune(now, self.config.failure_window);

        let count = state.failures.len();
        let threshold = usize::try_from(self.config.failure_threshold).unwrap_or(usize::MAX);
        if count >= threshold {
            state.blacklisted_until = Some(now + self.config.recovery_check_interval);
            warn!(
                provider = %provider,
                failures = count,
                recovery_secs = self.config.recovery_check_interval.as_secs_f64(),
                "provider blacklisted"
            );
        } else {
            debug!(provider = %provider, failures = count, "provider failure recorded");
        }
    }

    /// Records a successful call.
    ///
    /// Clears the failure history; an active blacklist stays in place.
    pub fn record_success(&self, provider: &ProviderId) {
        if !self.config.enabled {
            return;
        }
        if let Some(mut state) = self.providers.get_mut(provider) {
            state.failures.clear();
        }
    }

    /// Returns whether the provider may be called.
    ///
    /// An elapsed blacklist is lifted here, resetting the failure history.
    #[must_use]
    pub fn is_available(&self, provider: &ProviderId) -> bool {
        if !self.config.enabled {
            return true;
        }
        let Some(mut state) = self.providers.get_mut(provider) else {
            return true;
        };
        let now = Instant::now();
        if state.expire_blacklist(now) {
            info!(provider = %provider, "provider blacklist expired");
        }
        state.blacklisted_until.is_none()
    }

    /// Time left on the provider's blacklist, zero when not blacklisted.
    #[must_use]
    pub fn blacklist_remaining(&self, provider: &ProviderId) -> Duration {
        if !self.config.enabled {
            return Duration::ZERO;
        }
        self.providers
            .get(provider)
            .and_then(|state| state.blacklisted_until)
            .map_or(Duration::ZERO, |until| {
                until.saturating_duration_since(Instant::now())
            })
    }

    /// Failures currently held for the provider (not pruned by this call).
    #[must_use]
    pub fn failure_count(&self, provider: &ProviderId) -> usize {
        self.providers
            .get(provider)
            .map_or(0, |state| state.failures.len())
    }

    /// Health of every provider seen so far, sorted by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ProviderHealth> {
        let now = Instant::now();
        let mut health: Vec<ProviderHealth> = self
            .providers
            .iter()
            .map(|entry| ProviderHealth {
                provider: entry.key().clone(),
                recent_failures: entry.failures.len(),
                blacklisted_for: entry
                    .blacklisted_until
                    .filter(|until| *until > now)
                    .map(|until| until - now),
            })
            .collect();
        health.sort_by(|a, b| a.provider.cmp(&b.provider));
        health
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn provider(name: &str) -> ProviderId {
        ProviderId::new(name).unwrap()
    }

    fn monitor(threshold: u32, window_secs: u64, recovery_secs: u64) -> HealthMonitor {
        HealthMonitor::new(HealthConfig {
            enabled: true,
            failure_threshold: threshold,
            failure_window: Duration::from_secs(window_secs),
            recovery_check_interval: Duration::from_secs(recovery_secs),
        })
    }

    // ==================== Blacklist Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_threshold_failures_blacklist_provider() {
        let monitor = monitor(5, 60, 300);
        let a = provider("a");

        for _ in 0..4 {
            monitor.record_failure(&a);
        }
        assert!(monitor.is_available(&a));

        monitor.record_failure(&a);
        assert!(!monitor.is_available(&a));
        assert_eq!(monitor.blacklist_remaining(&a), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_resets_failure_history() {
        let monitor = monitor(5, 60, 300);
        let a = provider("a");

        for _ in 0..5 {
            monitor.record_failure(&a);
        }
        assert!(!monitor.is_available(&a));

        tokio::time::advance(Duration::from_secs(300)).await;
        assert!(monitor.is_available(&a));
        assert_eq!(monitor.failure_count(&a), 0);
        assert_eq!(monitor.blacklist_remaining(&a), Duration::ZERO);

        // A sixth failure right after recovery starts a fresh count.
        monitor.record_failure(&a);
        assert!(monitor.is_available(&a));
        assert_eq!(monitor.failure_count(&a), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_outside_window_are_pruned() {
        let monitor = monitor(3, 60, 300);
        let a = provider("a");

        monitor.record_failure(&a);
        monitor.record_failure(&a);
        tokio::time::advance(Duration::from_secs(61)).await;
        monitor.record_failure(&a);

        assert!(monitor.is_available(&a));
        assert_eq!(monitor.failure_count(&a), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_does_not_lift_blacklist() {
        let monitor = monitor(2, 60, 300);
        let a = provider("a");

        monitor.record_failure(&a);
        monitor.record_failure(&a);
        monitor.record_success(&a);

        assert!(!monitor.is_available(&a));
        assert_eq!(monitor.failure_count(&a), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_clears_failure_history() {
        let monitor = monitor(3, 60, 300);
        let a = provider("a");

        monitor.record_failure(&a);
        monitor.record_failure(&a);
        monitor.record_success(&a);
        monitor.record_failure(&a);

        assert!(monitor.is_available(&a));
        assert_eq!(monitor.failure_count(&a), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_while_blacklisted_extend_blacklist() {
        let monitor = monitor(2, 60, 100);
        let a = provider("a");

        monitor.record_failure(&a);
        monitor.record_failure(&a);
        tokio::time::advance(Duration::from_secs(50)).await;
        monitor.record_failure(&a);

        assert_eq!(monitor.blacklist_remaining(&a), Duration::from_secs(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_providers_are_tracked_independently() {
        let monitor = monitor(1, 60, 300);
        let a = provider("a");
        let b = provider("b");

        monitor.record_failure(&a);
        assert!(!monitor.is_available(&a));
        assert!(monitor.is_available(&b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blacklist_remaining_counts_down() {
        let monitor = monitor(1, 60, 300);
        let a = provider("a");

        monitor.record_failure(&a);
        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(monitor.blacklist_remaining(&a), Duration::from_secs(180));
    }

    // ==================== Disabled / Snapshot Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_disabled_monitor_is_noop() {
        let monitor = HealthMonitor::disabled();
        let a = provider("a");

        for _ in 0..100 {
            monitor.record_failure(&a);
        }
        assert!(monitor.is_available(&a));
        assert_eq!(monitor.failure_count(&a), 0);
        assert_eq!(monitor.blacklist_remaining(&a), Duration::ZERO);
        assert!(monitor.snapshot().is_empty());
    }

    #[test]
    fn test_unknown_provider_is_available() {
        let monitor = HealthMonitor::default();
        assert!(monitor.is_available(&provider("never_seen")));
        assert_eq!(monitor.failure_count(&provider("never_seen")), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_reports_sorted_state() {
        let monitor = monitor(2, 60, 300);
        let a = provider("a");
        let b = provider("b");

        monitor.record_failure(&b);
        monitor.record_failure(&b);
        monitor.record_failure(&a);

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].provider, a);
        assert_eq!(snapshot[0].recent_failures, 1);
        assert_eq!(snapshot[0].blacklisted_for, None);
        assert_eq!(snapshot[1].provider, b);
        assert_eq!(snapshot[1].blacklisted_for, Some(Duration::from_secs(300)));
    }

    // ==================== Concurrency Tests ====================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_are_not_lost() {
        const TASKS: u32 = 10;
        const PER_TASK: u32 = 10;
        let monitor = Arc::new(monitor(TASKS * PER_TASK, 60, 300));
        let a = provider("a");

        let mut handles = Vec::new();
        for _ in 0..TASKS {
            let monitor = Arc::clone(&monitor);
            let a = a.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..PER_TASK {
                    monitor.record_failure(&a);
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(monitor.failure_count(&a), 100);
        assert!(!monitor.is_available(&a));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_success_and_failure_on_separate_providers() {
        let monitor = Arc::new(monitor(50, 60, 300));
        let failing = provider("failing");
        let healthy = provider("healthy");

        let mut handles = Vec::new();
        for _ in 0..5 {
            let monitor = Arc::clone(&monitor);
            let failing = failing.clone();
            let healthy = healthy.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    monitor.record_failure(&failing);
                    monitor.record_success(&healthy);
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(!monitor.is_available(&failing));
        assert!(monitor.is_available(&healthy));
        assert_eq!(monitor.failure_count(&healthy), 0);
    }
}
