//! Rate limiting and account lockout.
//!
//! Rate limits are fixed-window counters in the shared TTL store, keyed by
//! operation-scoped strings (`login:<email>`, `register:<ip>`). Lockout is
//! a separate consecutive-failure counter carried on the user record, so
//! the two throttles move independently.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::LockoutConfig;
use crate::models::User;
use crate::services::error::AuthError;
use crate::services::store::KeyValueStore;

/// Ceiling for one operation key within one window.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSpec {
    pub max_attempts: u32,
    pub window: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Hint for denied requests: when the window resets.
    pub retry_after: Option<Duration>,
}

/// Fixed-window rate limiter over the shared store.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Count an attempt against `key` and decide whether it may proceed.
    pub async fn consume(
        &self,
        key: &str,
        spec: &RateLimitSpec,
    ) -> Result<RateLimitDecision, AuthError> {
        let counter = self
            .store
            .increment(&format!("ratelimit:{}", key), spec.window)
            .await?;

        if counter.count > spec.max_attempts as u64 {
            tracing::debug!(key = %key, count = counter.count, "Rate limit exceeded");
            return Ok(RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after: Some(counter.reset_in),
            });
        }

        Ok(RateLimitDecision {
            allowed: true,
            remaining: spec.max_attempts - counter.count as u32,
            retry_after: None,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LockoutDecision {
    pub locked: bool,
    pub locked_until: Option<DateTime<Utc>>,
}

/// Consecutive-failure lockout policy.
///
/// Operates on the counters carried by the user record; the orchestrator
/// persists the mutation. Checked before password verification so a locked
/// account never pays for a hash comparison.
#[derive(Debug, Clone)]
pub struct LockoutPolicy {
    config: LockoutConfig,
}

impl LockoutPolicy {
    pub fn new(config: LockoutConfig) -> Self {
        Self { config }
    }

    pub fn clear_on_reset(&self) -> bool {
        self.config.clear_lockout_on_reset
    }

    /// Record a failed credential check. Reaching the threshold sets
    /// `locked_until`.
    pub fn register_failure(&self, user: &mut User) -> LockoutDecision {
        user.failed_login_count += 1;

        if user.failed_login_count >= self.config.max_failed_attempts {
            let until = Utc::now() + chrono::Duration::minutes(self.config.lockout_duration_minutes);
            user.locked_until = Some(until);
            tracing::warn!(
                user_id = %user.id,
                failed_attempts = user.failed_login_count,
                locked_until = %until,
                "Account locked after repeated failures"
            );
            return LockoutDecision {
                locked: true,
                locked_until: Some(until),
            };
        }

        LockoutDecision {
            locked: false,
            locked_until: None,
        }
    }

    /// Reset counters after a successful authentication.
    pub fn reset(&self, user: &mut User) {
        user.failed_login_count = 0;
        user.locked_until = None;
    }
}
