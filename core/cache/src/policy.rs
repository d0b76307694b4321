//! Time-to-live policy per resource class.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// How long cached values stay usable, by resource class.
///
/// The class of a key is its first `_`-separated segment, so `events_5`
/// and `events_upcoming` share the `events` budget while `logs_mine_page_0`
/// falls under `logs`. Keys without a configured class use the default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlPolicy {
    rules: HashMap<String, Duration>,
    default_ttl: Duration,
}

impl TtlPolicy {
    /// Create a policy with no per-class rules, only a default.
    pub fn uniform(default_ttl: Duration) -> Self {
        Self {
            rules: HashMap::new(),
            default_ttl,
        }
    }

    /// Add or replace the TTL for a resource class.
    pub fn with_rule(mut self, class: impl Into<String>, ttl: Duration) -> Self {
        self.rules.insert(class.into(), ttl);
        self
    }

    /// TTL for a cache key, resolved through its resource class.
    pub fn ttl_for(&self, key: &str) -> Duration {
        let class = key.split('_').next().unwrap_or(key);
        self.rules.get(class).copied().unwrap_or(self.default_ttl)
    }
}

impl Default for TtlPolicy {
    /// Event listings change rarely, registration state changes often,
    /// activity logs churn constantly.
    fn default() -> Self {
        const HOUR: Duration = Duration::from_secs(60 * 60);
        const HALF_HOUR: Duration = Duration::from_secs(30 * 60);
        const TEN_MINUTES: Duration = Duration::from_secs(10 * 60);

        Self::uniform(HOUR)
            .with_rule("events", HOUR)
            .with_rule("subscriptions", HALF_HOUR)
            .with_rule("attendances", HALF_HOUR)
            .with_rule("users", HALF_HOUR)
            .with_rule("registrations", HALF_HOUR)
            .with_rule("logs", TEN_MINUTES)
    }
}
