//! mc-guardian eavesdropper binary.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use guardian_client::{CacheClient, RouterRegistry};
use hotkey_engine::{KeyScorer, RollingWindows, ShardedCounter, ShardedScorer};
use mc_guardian::aggregator::Aggregator;
use mc_guardian::coordination::SoloCoordination;
use mc_guardian::reporter::{self, Reporter};
use mc_guardian::secrets::{self, SecretsStore};
use mc_guardian::session::Eavesdropper;
use mc_guardian::{Options, listener, logging};

fn main() {
    logging::init();
    let options = Options::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            error!(%error, "cannot build runtime");
            std::process::exit(1);
        }
    };

    if let Err(error) = runtime.block_on(run(options)) {
        error!(%error, "cannot start listener");
        std::process::exit(1);
    }
}

async fn run(options: Options) -> std::io::Result<()> {
    let listener = TcpListener::bind(options.bind_address()).await?;
    info!(
        address = %options.bind_address(),
        rolling_width = options.rolling_width,
        top_n = options.top_n,
        threshold = options.threshold,
        "eavesdropper starting"
    );

    // Secrets gate the aggregator, as the coordination backend needs the
    // discovery token.
    let secrets = SecretsStore::new();
    let secrets_loaded = secrets.reload_from(&options.secrets_path);
    if let Err(ref error) = secrets_loaded {
        warn!(path = %options.secrets_path.display(), %error, "secrets unavailable");
    }
    secrets.spawn_refresh(options.secrets_path.clone(), secrets::REFRESH_INTERVAL);

    // Engine: sharded scorer and counter factory behind the window ring.
    let buckets = options.buckets();
    let scorer = Arc::new(ShardedScorer::new(buckets, options.min_slab_bytes));
    scorer.start_sweepers(options.sweep_interval());
    let windows = Arc::new(RollingWindows::new(
        scorer.clone() as Arc<dyn KeyScorer>,
        move || Arc::new(ShardedCounter::new(buckets)),
        options.rolling_width,
        options.top_n,
        options.threshold,
    ));
    let eavesdropper = Arc::new(Eavesdropper::new(
        windows.clone(),
        scorer.clone() as Arc<dyn KeyScorer>,
    ));

    // Upstream side: router registry, report publisher, aggregator.
    let registry = Arc::new(RouterRegistry::new(options.mcrouter_port));
    let client = CacheClient::new(registry.clone());
    let identity = reporter::identity(&options.host, options.port);

    Reporter::new(
        windows.clone(),
        identity.clone(),
        options.memcached_key.clone(),
        client.clone(),
    )
    .spawn();

    if secrets_loaded.is_ok() {
        let mut rotations = secrets.subscribe();
        tokio::spawn(async move {
            while rotations.changed().await.is_ok() {
                info!("discovery token rotated; coordination clients rebuild on next use");
            }
        });

        Aggregator::new(
            options.service_name.clone(),
            options.memcached_key.clone(),
            options.top_n,
            options.aggregate_interval(),
            client,
            SoloCoordination::new(identity),
        )
        .spawn();
    } else {
        warn!("aggregator disabled: secrets unavailable at startup");
    }

    tokio::select! {
        _ = listener::run(listener, eavesdropper, registry) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal, exiting");
        }
    }
    Ok(())
}
