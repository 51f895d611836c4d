//! Leader-elected cross-reporter aggregation.
//!
//! One instance at a time holds the `{service}:{report_key}:leader` lock.
//! While leader it periodically discovers the healthy reporters, multi-GETs
//! their reports, merges every entry through a max-heap, and writes the
//! global top-N list under the canonical report key. Losing the lock aborts
//! the cycle and sends the instance back to election.

use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use guardian_client::{CacheClient, ClientError};
use hotkey_engine::HotKeyEntry;

use crate::coordination::Coordination;
use crate::metrics::{AGGREGATION_ERRORS, AGGREGATIONS};

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Encode(#[from] serde_json::Error),
}

/// Merges per-reporter views into the cluster-wide top-N.
pub struct Aggregator<C> {
    service_name: String,
    report_key: String,
    top_n: usize,
    interval: Duration,
    client: CacheClient,
    coordination: C,
}

impl<C: Coordination> Aggregator<C> {
    pub fn new(
        service_name: String,
        report_key: String,
        top_n: usize,
        interval: Duration,
        client: CacheClient,
        coordination: C,
    ) -> Self {
        Self {
            service_name,
            report_key,
            top_n,
            interval,
            client,
            coordination,
        }
    }

    /// Start the election loop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.elect())
    }

    /// Re-enter election after every leadership loss.
    async fn elect(self) {
        let lock_key = format!("{}:{}:leader", self.service_name, self.report_key);
        loop {
            match self.coordination.acquire_lock(&lock_key).await {
                Ok(mut lease) => {
                    info!(key = %lock_key, "acquired aggregation leadership");
                    let mut ticker = tokio::time::interval(self.interval);
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    ticker.tick().await; // the first tick is immediate

                    loop {
                        ticker.tick().await;
                        if lease.is_lost() {
                            info!(key = %lock_key, "aggregation leadership lost");
                            break;
                        }
                        AGGREGATIONS.increment();
                        if let Err(error) = self.aggregate().await {
                            AGGREGATION_ERRORS.increment();
                            warn!(%error, "aggregation cycle failed");
                        }
                    }
                }
                Err(error) => {
                    warn!(%error, "recovering from leadership election error");
                    tokio::time::sleep(self.interval).await;
                }
            }
        }
    }

    /// The per-reporter cache keys of the currently healthy instances.
    async fn discover(&self) -> Vec<String> {
        match self.coordination.healthy_instances(&self.service_name).await {
            Ok(instances) => instances
                .into_iter()
                .map(|node| format!("{}:{}", self.report_key, node))
                .collect(),
            Err(error) => {
                warn!(service = %self.service_name, %error, "reporter discovery failed");
                Vec::new()
            }
        }
    }

    /// Run one aggregation cycle.
    ///
    /// Unreachable reporters are skipped; reports that fail to decode are
    /// dropped individually. With no reporters discovered the cycle is a
    /// no-op.
    pub async fn aggregate(&self) -> Result<(), AggregateError> {
        let reporter_keys = self.discover().await;
        if reporter_keys.is_empty() {
            return Ok(());
        }

        let reports = self.client.get_multi(&reporter_keys).await?;
        let mut entries: Vec<HotKeyEntry> = Vec::new();
        for (reporter, raw) in reports {
            match serde_json::from_slice::<HashMap<String, u64>>(&raw) {
                Ok(candidates) => {
                    entries.extend(
                        candidates
                            .into_iter()
                            .map(|(key, score)| HotKeyEntry { key, score }),
                    );
                }
                Err(error) => {
                    debug!(%reporter, %error, "dropping undecodable report");
                }
            }
        }

        let mut heap = BinaryHeap::from(entries);
        let mut tops = Vec::with_capacity(self.top_n);
        for _ in 0..self.top_n {
            let Some(entry) = heap.pop() else { break };
            tops.push(entry);
        }

        let payload = serde_json::to_vec(&tops)?;
        self.client.set(&self.report_key, &payload).await?;
        Ok(())
    }
}
