pub mod core;
pub mod modules;
pub mod utils;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

pub use crate::core::engine::{FetchExecutor, PassOutcome};
pub use crate::core::scheduler::{RefreshScheduler, SchedulerHandle};
pub use crate::core::selector::CandidateSelector;
pub use crate::core::state::{JsonFileStore, KeyValueStore, MemoryStore};
pub use crate::core::throttle::ThrottleGate;
pub use crate::core::{
    Candidate, Contact, ContactKind, ContactProvider, ProfileCredential, ProfileFetcher,
};
pub use crate::modules::directory::ContactDirectory;
pub use crate::modules::fetcher::CommandFetcher;
pub use crate::utils::now_millis;

const HOUR_SECS: u64 = 60 * 60;
const DAY_SECS: u64 = 24 * HOUR_SECS;

/// Refresh tunables shared by the scheduler, selector and executor.
///
/// Every field has a default, so a config file only needs the keys it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RefreshConfig {
    /// Minimum spacing between two triggered passes.
    pub cooldown_secs: u64,
    pub max_per_pass: usize,
    pub concurrency: usize,
    pub fetch_timeout_secs: u64,
    /// Delay before the loop retries after an error or a missing local identity.
    pub retry_delay_secs: u64,
    pub active_window_secs: u64,
    pub fetched_window_secs: u64,
    pub storage_key: String,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 12 * HOUR_SECS,
            max_per_pass: 50,
            concurrency: 5,
            fetch_timeout_secs: 30 * 60,
            retry_delay_secs: 60,
            active_window_secs: 30 * DAY_SECS,
            fetched_window_secs: DAY_SECS,
            storage_key: "lastAttemptAt".to_string(),
        }
    }
}

impl RefreshConfig {
    /// Reads a JSON config file. Missing keys fall back to their defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&data)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn active_window_ms(&self) -> u64 {
        self.active_window_secs.saturating_mul(1000)
    }

    pub fn fetched_window_ms(&self) -> u64 {
        self.fetched_window_secs.saturating_mul(1000)
    }
}

/// Output abstraction for refresh passes.
/// The CLI renders to the terminal; tests capture into memory.
pub trait RefreshEventSink: Send + Sync {
    fn on_log(&self, level: &str, message: &str);
    fn on_pass_complete(&self, outcome: &PassOutcome);
}

pub type SinkRef = Arc<dyn RefreshEventSink>;

/// Terminal output sink for CLI usage.
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new_ref() -> SinkRef {
        Arc::new(Self)
    }
}

impl RefreshEventSink for ConsoleSink {
    fn on_log(&self, level: &str, message: &str) {
        use colored::*;
        use std::io::Write;
        let colored = match level {
            "success" => message.green().to_string(),
            "error"   => message.red().to_string(),
            "warn"    => message.yellow().to_string(),
            "phase"   => message.bright_cyan().bold().to_string(),
            _         => message.to_string(),
        };
        print!("{}\r\n", colored);
        std::io::stdout().flush().ok();
    }

    fn on_pass_complete(&self, outcome: &PassOutcome) {
        use colored::*;
        use std::io::Write;
        let line = format!(
            "[+] Refresh pass complete: {}/{} profile(s) fetched",
            outcome.succeeded, outcome.attempted
        );
        if outcome.attempted > 0 && outcome.succeeded == 0 {
            print!("{}\r\n", line.yellow().bold());
        } else {
            print!("{}\r\n", line.green().bold());
        }
        std::io::stdout().flush().ok();
    }
}
