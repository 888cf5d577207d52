/// Cooldown gate for refresh passes.
///
/// Stores a single "last triggered" timestamp (ms since epoch) in the
/// key-value store and answers how long the scheduler still has to wait
/// before the next pass may start. The gate only spaces out pass *triggers*;
/// how long a pass takes is not its concern.

use std::sync::Arc;
use std::time::Duration;

use log::warn;
use serde_json::Value;

use crate::core::state::KeyValueStore;
use crate::utils::now_millis;

pub struct ThrottleGate {
    store: Arc<dyn KeyValueStore>,
    key: String,
    cooldown: Duration,
}

impl ThrottleGate {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>, cooldown: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            cooldown,
        }
    }

    pub fn time_remaining(&self) -> Duration {
        self.time_remaining_at(now_millis())
    }

    /// Zero when nothing usable is stored. Never fails the caller.
    pub fn time_remaining_at(&self, now_ms: u64) -> Duration {
        let Some(last) = self.last_triggered() else {
            return Duration::ZERO;
        };
        let cooldown_ms = u64::try_from(self.cooldown.as_millis()).unwrap_or(u64::MAX);
        let ready_at = last.saturating_add(cooldown_ms);
        Duration::from_millis(ready_at.saturating_sub(now_ms))
    }

    pub fn mark_triggered(&self) -> anyhow::Result<()> {
        self.mark_triggered_at(now_millis())
    }

    pub fn mark_triggered_at(&self, now_ms: u64) -> anyhow::Result<()> {
        self.store.put(&self.key, Value::from(now_ms))
    }

    fn last_triggered(&self) -> Option<u64> {
        let value = match self.store.get(&self.key) {
            Ok(Some(value)) => value,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read '{}' from store, treating as unset: {:#}", self.key, e);
                return None;
            }
        };

        match parse_timestamp(&value) {
            Some(ts) => Some(ts),
            None => {
                warn!("Stored '{}' is not a valid timestamp ({}), ignoring it", self.key, value);
                None
            }
        }
    }
}

/// Accepts non-negative integers and finite non-negative floats.
fn parse_timestamp(value: &Value) -> Option<u64> {
    if let Some(ts) = value.as_u64() {
        return Some(ts);
    }
    match value.as_f64() {
        Some(f) if f.is_finite() && f >= 0.0 => Some(f as u64),
        _ => None,
    }
}
