//! Per-user fixed-window rate limiting.
//!
//! Each (user, action) pair owns a window record `{count, resetAt}`. The decision for a
//! check is computed by [`next_window`] from the stored record and the current time; the
//! [`RateLimitStore`] runs that computation inside a single atomic read-modify-write.
//! Any store failure denies the request.

pub mod store;

use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::{clock::Clock, config::ConfigError};

pub use store::{InMemoryRateLimitStore, RateLimitStore, SqliteRateLimitStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ReflectionMessage,
    DataExport,
    AccountDeletion,
}

impl Action {
    pub const ALL: [Action; 3] = [
        Action::ReflectionMessage,
        Action::DataExport,
        Action::AccountDeletion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ReflectionMessage => "reflection_message",
            Action::DataExport => "data_export",
            Action::AccountDeletion => "account_deletion",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown action `{s}`"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub limit: u32,
    pub window_secs: i64,
}

impl Policy {
    pub const fn new(limit: u32, window_secs: i64) -> Self {
        Self { limit, window_secs }
    }

    pub fn window(&self) -> Duration {
        Duration::try_seconds(self.window_secs).unwrap_or(Duration::MAX)
    }

    /// End of a window opened at `now`, saturating at the latest representable instant.
    pub fn reset_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.window())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Longest window an override may ask for.
pub const MAX_WINDOW_SECS: i64 = 366 * 24 * 60 * 60;

/// Action name to policy mapping.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    policies: HashMap<Action, Policy>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new([
            (Action::ReflectionMessage, Policy::new(10, 60 * 60)),
            (Action::DataExport, Policy::new(3, 60 * 60 * 24)),
            (Action::AccountDeletion, Policy::new(1, 60 * 60 * 24)),
        ])
    }
}

impl RateLimitConfig {
    pub fn new(policies: impl IntoIterator<Item = (Action, Policy)>) -> Self {
        Self {
            policies: policies.into_iter().collect(),
        }
    }

    pub fn policy(&self, action: Action) -> Result<Policy, ConfigError> {
        self.policies
            .get(&action)
            .copied()
            .ok_or(ConfigError::UnknownAction(action))
    }

    /// Apply `action=limit/windowSecs` overrides, comma separated.
    pub fn with_overrides(mut self, overrides: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            key: "RATE_LIMITS",
            reason,
        };

        for entry in overrides.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, rule) = entry
                .split_once('=')
                .ok_or_else(|| invalid(format!("`{entry}` is not action=limit/window")))?;
            let action: Action = name.trim().parse().map_err(invalid)?;
            let (limit, window) = rule
                .split_once('/')
                .ok_or_else(|| invalid(format!("`{rule}` is not limit/window")))?;
            let limit: u32 = limit
                .trim()
                .parse()
                .map_err(|e| invalid(format!("limit for {action}: {e}")))?;
            let window_secs: i64 = window
                .trim()
                .parse()
                .map_err(|e| invalid(format!("window for {action}: {e}")))?;
            if limit == 0 || window_secs <= 0 {
                return Err(invalid(format!(
                    "{action} needs a positive limit and window"
                )));
            }
            if window_secs > MAX_WINDOW_SECS {
                return Err(invalid(format!(
                    "window for {action} exceeds {MAX_WINDOW_SECS} seconds"
                )));
            }
            self.policies.insert(action, Policy::new(limit, window_secs));
        }

        Ok(self)
    }
}

/// Stored state of one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowRecord {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    fn denied(reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_at,
        }
    }
}

/// Outcome of one check: the answer, plus the record to persist when it changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub decision: RateLimitDecision,
    pub write: Option<WindowRecord>,
}

/// Fixed-window step. An absent record behaves like an expired one.
pub fn next_window(
    current: Option<WindowRecord>,
    policy: Policy,
    now: DateTime<Utc>,
) -> Transition {
    let current = current.unwrap_or(WindowRecord {
        count: 0,
        reset_at: now,
    });

    if now >= current.reset_at {
        let record = WindowRecord {
            count: 1,
            reset_at: policy.reset_from(now),
        };
        return Transition {
            decision: RateLimitDecision {
                allowed: true,
                remaining: policy.limit.saturating_sub(1),
                reset_at: record.reset_at,
            },
            write: Some(record),
        };
    }

    if current.count >= policy.limit {
        return Transition {
            decision: RateLimitDecision::denied(current.reset_at),
            write: None,
        };
    }

    let record = WindowRecord {
        count: current.count + 1,
        reset_at: current.reset_at,
    };
    Transition {
        decision: RateLimitDecision {
            allowed: true,
            remaining: policy.limit - record.count,
            reset_at: record.reset_at,
        },
        write: Some(record),
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        config: RateLimitConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Count one attempt of `action` by `user_id`.
    ///
    /// Only a missing policy is an error; an unreachable store yields a denial.
    pub async fn check(
        &self,
        user_id: &str,
        action: Action,
    ) -> Result<RateLimitDecision, ConfigError> {
        let policy = self.config.policy(action)?;
        let now = self.clock.now();

        let step = move |current: Option<WindowRecord>| next_window(current, policy, now);
        match self.store.transact(user_id, action, &step).await {
            Ok(decision) => {
                debug!(
                    uid = %user_id,
                    %action,
                    allowed = decision.allowed,
                    remaining = decision.remaining,
                    "Rate limit checked"
                );
                Ok(decision)
            }
            Err(e) => {
                error!(uid = %user_id, %action, "Rate limit store failed, denying: {e}");
                Ok(RateLimitDecision::denied(policy.reset_from(now)))
            }
        }
    }
}
