use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::engine::{FetchExecutor, PassOutcome};
use crate::core::selector::CandidateSelector;
use crate::core::state::KeyValueStore;
use crate::core::throttle::ThrottleGate;
use crate::core::{Candidate, ContactProvider, ProfileFetcher};
use crate::modules::directory::ContactDirectory;
use crate::utils::now_millis;
use crate::{RefreshConfig, SinkRef};

/// Outer refresh loop.
///
/// Each iteration waits out the cooldown, checks that the local identity is
/// known, then runs one pass: mark the gate, select candidates, fetch them.
/// A missing identity or a failed pass costs one retry delay; nothing that
/// happens inside a pass ends the loop. Only `SchedulerHandle::stop` does,
/// and only at a wait point, so an in-flight pass always runs to completion.
pub struct RefreshScheduler {
    config: RefreshConfig,
    gate: ThrottleGate,
    provider: Arc<dyn ContactProvider>,
    executor: FetchExecutor,
    sink: SinkRef,
}

impl RefreshScheduler {
    pub fn new(
        config: RefreshConfig,
        store: Arc<dyn KeyValueStore>,
        provider: Arc<dyn ContactProvider>,
        fetcher: Arc<dyn ProfileFetcher>,
        sink: SinkRef,
    ) -> Self {
        let gate = ThrottleGate::new(store, config.storage_key.clone(), config.cooldown());
        let executor = FetchExecutor::new(fetcher, config.concurrency, config.fetch_timeout());
        Self {
            config,
            gate,
            provider,
            executor,
            sink,
        }
    }

    pub fn gate(&self) -> &ThrottleGate {
        &self.gate
    }

    /// Starts the loop on the runtime. Dropping the handle also stops it.
    pub fn spawn(self) -> SchedulerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let join = tokio::spawn(self.run_loop(stop_rx));
        SchedulerHandle { stop_tx, join }
    }

    /// One pass, ignoring the cooldown (the gate is still marked).
    pub async fn run_pass(&self) -> anyhow::Result<PassOutcome> {
        let local_id = self.local_identity().await?;
        self.refresh(&local_id).await
    }

    /// What the next pass would select, without clearing credentials,
    /// marking the gate or fetching anything.
    pub async fn preview(&self) -> anyhow::Result<Vec<Candidate>> {
        let local_id = self.local_identity().await?;
        let contacts = self.provider.list_all_contacts().await?;
        let scratch = ContactDirectory::in_memory(Some(local_id.clone()), contacts.clone());
        CandidateSelector::new(contacts, &local_id, now_millis(), &self.config, &scratch).collect()
    }

    async fn local_identity(&self) -> anyhow::Result<String> {
        self.provider
            .local_identity_id()
            .await
            .ok_or_else(|| anyhow::anyhow!("local identity is not known yet"))
    }

    async fn refresh(&self, local_id: &str) -> anyhow::Result<PassOutcome> {
        self.gate.mark_triggered()?;

        let contacts = self.provider.list_all_contacts().await?;
        let total = contacts.len();
        let selection = CandidateSelector::new(
            contacts,
            local_id,
            now_millis(),
            &self.config,
            self.provider.as_ref(),
        )
        .collect::<anyhow::Result<Vec<_>>>()?;

        info!("Refreshing {} of {} contact profile(s)", selection.len(), total);
        self.sink.on_log(
            "phase",
            &format!("[*] Refreshing {} profile(s) ({} contact(s) known)", selection.len(), total),
        );

        let outcome = self.executor.run(selection).await;
        info!(
            "Profile refresh pass done: {}/{} succeeded",
            outcome.succeeded, outcome.attempted
        );
        self.sink.on_pass_complete(&outcome);
        Ok(outcome)
    }

    async fn run_loop(self, mut stop: watch::Receiver<bool>) {
        let retry_delay = self.config.retry_delay();
        loop {
            let wait = self.gate.time_remaining();
            if !wait.is_zero() {
                info!("Next profile refresh in {}s", wait.as_secs());
            }
            if pause(wait, &mut stop).await {
                break;
            }

            let Some(local_id) = self.provider.local_identity_id().await else {
                warn!("Local identity not known yet, retrying in {}s", retry_delay.as_secs());
                if pause(retry_delay, &mut stop).await {
                    break;
                }
                continue;
            };

            if let Err(e) = self.refresh(&local_id).await {
                error!("Profile refresh pass failed: {:#}", e);
                self.sink.on_log("error", &format!("[!] Refresh pass failed: {:#}", e));
                if pause(retry_delay, &mut stop).await {
                    break;
                }
            }
        }
        info!("Profile refresh scheduler stopped");
    }
}

/// Sleeps for `duration` unless a stop arrives first. Returns true when stopping.
async fn pause(duration: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    if *stop.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = stop.changed() => changed.is_err() || *stop.borrow(),
    }
}

/// Owned handle to a running scheduler loop.
pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals the loop and waits for it to exit.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.join.await {
            warn!("Profile refresh scheduler ended abnormally: {}", e);
        }
    }

    /// Like `stop`, but abandons an in-flight pass once `interrupt` completes.
    /// Returns false when the loop was aborted instead of exiting on its own.
    /// Fetches already running are detached, not cancelled.
    pub async fn stop_or<F>(self, interrupt: F) -> bool
    where
        F: Future<Output = ()>,
    {
        let _ = self.stop_tx.send(true);
        let mut join = self.join;
        tokio::select! {
            joined = &mut join => {
                if let Err(e) = joined {
                    warn!("Profile refresh scheduler ended abnormally: {}", e);
                }
                true
            }
            _ = interrupt => {
                warn!("Abandoning the running profile refresh pass");
                join.abort();
                false
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
