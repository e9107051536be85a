//! Per-tenant suppression of repeated flag notifications.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const DEFAULT_FLAG_COOLDOWN: Duration = Duration::from_secs(2 * 60 * 60);

/// Decides whether a flag-level result may be surfaced for a tenant.
pub trait FlagGate {
    fn should_flag(&self, tenant_id: &str) -> bool;
}

/// Rate limiter for flag notifications.
///
/// Only flag results go through the cooldown; investigations are surfaced
/// unconditionally by the caller.
#[derive(Debug)]
pub struct TriageCooldown {
    last_flag: Mutex<HashMap<String, Instant>>,
    duration: Duration,
}

impl Default for TriageCooldown {
    fn default() -> Self {
        Self::new(DEFAULT_FLAG_COOLDOWN)
    }
}

impl TriageCooldown {
    /// A zero duration falls back to [`DEFAULT_FLAG_COOLDOWN`].
    pub fn new(duration: Duration) -> Self {
        let duration = if duration.is_zero() {
            DEFAULT_FLAG_COOLDOWN
        } else {
            duration
        };
        Self {
            last_flag: Mutex::new(HashMap::new()),
            duration,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    fn should_flag_at(&self, tenant_id: &str, now: Instant) -> bool {
        let mut last_flag = self
            .last_flag
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(last) = last_flag.get(tenant_id) {
            if now.saturating_duration_since(*last) < self.duration {
                return false;
            }
        }
        last_flag.insert(tenant_id.to_string(), now);
        true
    }

    /// Drop records whose window has elapsed. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let mut last_flag = self
            .last_flag
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = last_flag.len();
        last_flag.retain(|_, last| now.saturating_duration_since(*last) < self.duration);
        before - last_flag.len()
    }

    pub fn tracked_tenants(&self) -> usize {
        self.last_flag
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl FlagGate for TriageCooldown {
    fn should_flag(&self, tenant_id: &str) -> bool {
        self.should_flag_at(tenant_id, Instant::now())
    }
}

/// An absent cooldown always allows.
impl<G: FlagGate> FlagGate for Option<G> {
    fn should_flag(&self, tenant_id: &str) -> bool {
        match self {
            Some(gate) => gate.should_flag(tenant_id),
            None => true,
        }
    }
}

impl<G: FlagGate + ?Sized> FlagGate for std::sync::Arc<G> {
    fn should_flag(&self, tenant_id: &str) -> bool {
        (**self).should_flag(tenant_id)
    }
}
