//! Per-reporter publish loop.
//!
//! Once per second the reporter rolls the window ring and publishes the
//! resulting top-N as JSON under `{report_key}:{identity}` on the
//! registry-routed cache. Publish failures are logged and the loop keeps
//! going; until a router registers, the report only lands in the log.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use guardian_client::CacheClient;
use hotkey_engine::RollingWindows;

use crate::metrics::{REPORT_ERRORS, REPORTS_PUBLISHED};

/// The cadence of roll-and-report.
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Publishes one instance's rolling top-N upstream.
pub struct Reporter {
    windows: Arc<RollingWindows>,
    identity: String,
    report_key: String,
    client: CacheClient,
}

/// A reporter's identity string, defaulting the host to the machine
/// hostname when the bind host is empty.
pub fn identity(host: &str, port: u16) -> String {
    let host = if host.is_empty() {
        hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_default()
    } else {
        host.to_string()
    };
    format!("{host}:{port}")
}

impl Reporter {
    pub fn new(
        windows: Arc<RollingWindows>,
        identity: String,
        report_key: String,
        client: CacheClient,
    ) -> Self {
        Self {
            windows,
            identity,
            report_key,
            client,
        }
    }

    /// Start the 1-Hz roll-and-report loop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REPORT_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let tops = self.windows.roll();
                self.report(tops).await;
            }
        })
    }

    /// Publish one rolled top-N.
    async fn report(&self, tops: HashMap<String, u64>) {
        let payload = match serde_json::to_vec(&tops) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%error, "unable to encode report");
                return;
            }
        };

        let key = format!("{}:{}", self.report_key, self.identity);
        match self.client.set(&key, &payload).await {
            Ok(()) => {
                REPORTS_PUBLISHED.increment();
                debug!(identity = %self.identity, keys = tops.len(), "report published");
            }
            Err(error) => {
                REPORT_ERRORS.increment();
                info!(identity = %self.identity, %error, report = ?tops, "report not published");
            }
        }
    }
}
