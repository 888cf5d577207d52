use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use log::{debug, warn};
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::core::{Candidate, ProfileFetcher};

/// Aggregate result of one refresh pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassOutcome {
    pub attempted: usize,
    pub succeeded: usize,
}

impl PassOutcome {
    pub fn failed(&self) -> usize {
        self.attempted - self.succeeded
    }
}

#[derive(Default)]
struct Counters {
    attempted: AtomicUsize,
    succeeded: AtomicUsize,
}

/// Bounded-concurrency profile fetch executor.
///
/// Every candidate is spawned immediately; a semaphore limits how many fetches
/// actually run at once. Each fetch has its own timeout, and a failing,
/// hanging or panicking fetch never affects its siblings. `run` returns only
/// after every spawned fetch has settled.
pub struct FetchExecutor {
    fetcher: Arc<dyn ProfileFetcher>,
    concurrency_limit: usize,
    fetch_timeout: Duration,
}

impl FetchExecutor {
    pub fn new(fetcher: Arc<dyn ProfileFetcher>, concurrency_limit: usize, fetch_timeout: Duration) -> Self {
        Self {
            fetcher,
            concurrency_limit: concurrency_limit.clamp(1, Semaphore::MAX_PERMITS),
            fetch_timeout,
        }
    }

    pub async fn run(&self, candidates: Vec<Candidate>) -> PassOutcome {
        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));
        let counters = Arc::new(Counters::default());
        let mut tasks = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let semaphore = Arc::clone(&semaphore);
            let counters = Arc::clone(&counters);
            let fetcher = Arc::clone(&self.fetcher);
            let fetch_timeout = self.fetch_timeout;

            tasks.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("Fetch queue closed before {} was dispatched", candidate.id);
                        return;
                    }
                };
                counters.attempted.fetch_add(1, Relaxed);

                let start = Instant::now();
                let fetch = fetcher.fetch_profile(&candidate.id, candidate.e164.as_deref());
                match timeout(fetch_timeout, fetch).await {
                    Ok(Ok(())) => {
                        counters.succeeded.fetch_add(1, Relaxed);
                        debug!("Refreshed profile for {} in {}ms", candidate.id, start.elapsed().as_millis());
                    }
                    Ok(Err(e)) => {
                        warn!("Profile fetch failed for {}: {:#}", candidate.id, e);
                    }
                    Err(_) => {
                        warn!(
                            "Profile fetch for {} abandoned after {}s",
                            candidate.id,
                            fetch_timeout.as_secs()
                        );
                    }
                }
            }));
        }

        for joined in join_all(tasks).await {
            if let Err(e) = joined {
                warn!("Profile fetch task aborted: {}", e);
            }
        }

        PassOutcome {
            attempted: counters.attempted.load(Relaxed),
            succeeded: counters.succeeded.load(Relaxed),
        }
    }
}
