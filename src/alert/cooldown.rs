// src/alert/cooldown.rs
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Per-child cooldown gate against notification bursts.
/// - First alert for a child always passes.
/// - Inside the cooldown window further alerts for that child are suppressed.
/// - A reservation is taken atomically and released again if delivery fails.
#[derive(Debug, Default)]
pub struct AlertCooldown {
    cooldown: ChronoDuration,
    last_sent: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl AlertCooldown {
    /// `cooldown_secs` < 0 is treated as 0 (no cooldown).
    pub fn new(cooldown_secs: i64) -> Self {
        Self {
            cooldown: ChronoDuration::seconds(cooldown_secs.max(0)),
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Check and reserve in one step. `false` means suppressed.
    /// Entries whose window has passed are dropped on the way.
    pub fn try_reserve(&self, child_id: &str, now: DateTime<Utc>) -> bool {
        let mut map = self.last_sent.lock().unwrap_or_else(|p| p.into_inner());
        map.retain(|_, ts| now.signed_duration_since(*ts) < self.cooldown);
        if map.contains_key(child_id) {
            return false;
        }
        map.insert(child_id.to_string(), now);
        true
    }

    /// Undo a reservation taken at `reserved_at` (no-op if a newer one exists).
    pub fn release(&self, child_id: &str, reserved_at: DateTime<Utc>) {
        let mut map = self.last_sent.lock().unwrap_or_else(|p| p.into_inner());
        if map.get(child_id) == Some(&reserved_at) {
            map.remove(child_id);
        }
    }
}
