//! CLI configuration for the eavesdropper.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Hot-key eavesdropper for memcached routing tiers.
#[derive(Parser, Debug, Clone)]
#[command(name = "mc-guardian")]
#[command(about = "Hot-key eavesdropper for memcached routing tiers")]
#[command(version)]
pub struct Options {
    /// Bind host for incoming memcached text connections (empty = all)
    #[arg(long, default_value = "")]
    pub host: String,

    /// Bind port for incoming memcached text connections
    #[arg(long, default_value_t = 11211)]
    pub port: u16,

    /// Number of rolling windows (each is 1s)
    #[arg(long, default_value_t = 10)]
    pub rolling_width: usize,

    /// Number of top hot keys to report
    #[arg(long, default_value_t = 10)]
    pub top_n: usize,

    /// Minimum number of requests in the aggregate windows
    #[arg(long, default_value_t = 100)]
    pub threshold: u64,

    /// Chunk size (bytes) of the smallest slab; score floor for unknown keys
    #[arg(long, default_value_t = 96)]
    pub min_slab_bytes: u64,

    /// Port used when probing registered peers for router identity
    #[arg(long, default_value_t = 8989)]
    pub mcrouter_port: u16,

    /// Cache key the hot-key reports are published under
    #[arg(long, default_value = "MEMCACHED_HOT_KEYS")]
    pub memcached_key: String,

    /// Service name for peer discovery
    #[arg(long, default_value = "mc_hotkeys")]
    pub service_name: String,

    /// Secrets file holding the discovery token
    #[arg(long, default_value = "/etc/consul/mc_hotkeys.json")]
    pub secrets_path: PathBuf,
}

impl Options {
    /// The listener bind address; an empty host binds every interface.
    pub fn bind_address(&self) -> String {
        let host = if self.host.is_empty() {
            "0.0.0.0"
        } else {
            &self.host
        };
        format!("{host}:{}", self.port)
    }

    /// Shard count for the counter and scorer hot paths.
    pub fn buckets(&self) -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|parallelism| parallelism.get())
            .unwrap_or(1);
        (cpus + 1) * 4
    }

    /// How often each scorer shard sweeps expired entries.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.rolling_width as u64 * 60)
    }

    /// How often the elected leader aggregates peer reports.
    pub fn aggregate_interval(&self) -> Duration {
        Duration::from_secs(self.rolling_width as u64)
    }
}
