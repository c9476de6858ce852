use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Minimum spacing between two accepted events of the same reason.
pub const EVENT_COOLDOWN: Duration = Duration::from_millis(5000);

/// Suppresses repeated detections of the same reason within the cooldown
/// window. Per-reason, not global: distinct reasons are independent.
///
/// Cleared on every session start/stop boundary so stale entries can never
/// outlive the session they belong to.
#[derive(Debug, Default)]
pub struct ThrottleFilter {
    last_accepted: HashMap<String, Instant>,
}

impl ThrottleFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true and records `now` if the reason has not been accepted
    /// within the cooldown window. A rejected call leaves the recorded
    /// timestamp untouched.
    pub fn accept(&mut self, reason: &str, now: Instant) -> bool {
        if let Some(&last) = self.last_accepted.get(reason) {
            if now.duration_since(last) <= EVENT_COOLDOWN {
                return false;
            }
        }
        self.last_accepted.insert(reason.to_string(), now);
        true
    }

    pub fn reset(&mut self) {
        self.last_accepted.clear();
    }
}
