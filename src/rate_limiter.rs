//! Process-wide rate limiting across all providers.
//!
//! The [`GlobalRateLimiter`] keeps one rolling 60-second window of dispatched
//! requests shared by every provider. Admission is a two-step protocol:
//!
//! 1. [`GlobalRateLimiter::can_request`] asks for permission and never
//!    consumes budget.
//! 2. [`GlobalRateLimiter::record_request`] is called only after a request is
//!    actually dispatched.
//!
//! When a check finds the window full, the limiter enters a cooldown for
//! `cooldown_on_limit`. During cooldown every check is denied, whatever the
//! window holds. Leaving cooldown does not clear the window; old entries keep
//! counting until they age out.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use litfetch_core::{GlobalRateLimiter, RateLimitConfig};
//!
//! # async fn example() {
//! let limiter = GlobalRateLimiter::new(RateLimitConfig {
//!     max_per_minute: 2,
//!     cooldown_on_limit: Duration::from_secs(30),
//! });
//!
//! for _ in 0..2 {
//!     assert!(limiter.can_request().allowed);
//!     limiter.record_request();
//! }
//! let denied = limiter.can_request();
//! assert!(!denied.allowed);
//! assert!(limiter.in_cooldown());
//! # }
//! ```

use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Length of the rolling admission window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Default requests admitted per rolling minute.
pub const DEFAULT_MAX_PER_MINUTE: u32 = 120;

/// Default cooldown once the budget is exhausted (30 seconds).
pub const DEFAULT_COOLDOWN_ON_LIMIT: Duration = Duration::from_secs(30);

/// Global limiter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests admitted per rolling minute across all providers.
    pub max_per_minute: u32,
    /// How long every request is denied after the budget is hit.
    pub cooldown_on_limit: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_minute: DEFAULT_MAX_PER_MINUTE,
            cooldown_on_limit: DEFAULT_COOLDOWN_ON_LIMIT,
        }
    }
}

/// Why an admission check was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DenialReason {
    /// A cooldown entered earlier is still running.
    CoolingDown,
    /// This check found the window full and started a cooldown.
    WindowFull {
        /// Requests in the window.
        count: usize,
        /// Configured budget.
        limit: u32,
    },
}

impl Display for DenialReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CoolingDown => f.write_str("global rate limit cooldown active"),
            Self::WindowFull { count, limit } => write!(
                f,
                "global rate limit reached ({count}/{limit} requests in the last minute)"
            ),
        }
    }
}

/// Answer to an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Admission {
    /// Whether the caller may dispatch a request now.
    pub allowed: bool,
    /// Set when denied.
    pub reason: Option<DenialReason>,
    /// Remaining cooldown, zero when allowed.
    pub cooldown_remaining: Duration,
}

impl Admission {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            cooldown_remaining: Duration::ZERO,
        }
    }

    fn denied(reason: DenialReason, cooldown_remaining: Duration) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            cooldown_remaining,
        }
    }
}

#[derive(Debug, Default)]
struct LimiterState {
    window: VecDeque<Instant>,
    cooldown_until: Option<Instant>,
}

impl LimiterState {
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.window.front() {
            if now.duration_since(oldest) >= RATE_WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Sliding-window admission control shared by every provider.
///
/// Wrap in `Arc` to share across tasks. The internal mutex is never held
/// across an await.
#[derive(Debug)]
pub struct GlobalRateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

impl GlobalRateLimiter {
    /// Creates a limiter with the given budget.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        debug!(
            max_per_minute = config.max_per_minute,
            cooldown_secs = config.cooldown_on_limit.as_secs_f64(),
            "creating global rate limiter"
        );
        Self {
            config,
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// Returns the active settings.
    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Checks whether a request may be dispatched now.
    ///
    /// Does not consume budget. A full window denies this check and starts a
    /// cooldown that denies every following check until it runs out.
    pub fn can_request(&self) -> Admission {
        let now = Instant::now();
        let mut state = self.lock();

        if let Some(until) = state.cooldown_until {
            if now < until {
                return Admission::denied(DenialReason::CoolingDown, until - now);
            }
            state.cooldown_until = None;
            debug!("rate limit cooldown ended");
        }

        state.prune(now);
        let count = state.window.len();
        let limit = usize::try_from(self.config.max_per_minute).unwrap_or(usize::MAX);
        if count >= limit {
            state.cooldown_until = Some(now + self.config.cooldown_on_limit);
            warn!(
                count,
                limit = self.config.max_per_minute,
                cooldown_secs = self.config.cooldown_on_limit.as_secs_f64(),
                "global rate limit reached, entering cooldown"
            );
            return Admission::denied(
                DenialReason::WindowFull {
                    count,
                    limit: self.config.max_per_minute,
                },
                self.config.cooldown_on_limit,
            );
        }

        Admission::allowed()
    }

    /// Records a dispatched request in the window.
    pub fn record_request(&self) {
        let now = Instant::now();
        let mut state = self.lock();
        state.window.push_back(now);
    }

    /// Checks admission, sleeping out an active cooldown once if it ends
    /// within `max_wait`.
    #[instrument(skip(self), fields(max_wait_ms = max_wait.as_millis()))]
    pub async fn wait_for_admission(&self, max_wait: Duration) -> Admission {
        let admission = self.can_request();
        if admission.allowed
            || admission.cooldown_remaining.is_zero()
            || admission.cooldown_remaining > max_wait
        {
            return admission;
        }

        debug!(
            wait_ms = admission.cooldown_remaining.as_millis(),
            "waiting out rate limit cooldown"
        );
        tokio::time::sleep(admission.cooldown_remaining).await;
        self.can_request()
    }

    /// Requests currently held in the window (pruned as of now).
    #[must_use]
    pub fn window_len(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        state.prune(now);
        state.window.len()
    }

    /// Returns true while a cooldown is running.
    #[must_use]
    pub fn in_cooldown(&self) -> bool {
        let now = Instant::now();
        self.lock().cooldown_until.is_some_and(|until| now < until)
    }
}

impl Default for GlobalRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
