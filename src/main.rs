use std::env;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use ledger_core::config::EngineKind;
use ledger_core::csv::{read_events, write_balances};
use ledger_core::{
    AccountingEngine, Batcher, CachedSpecStore, Config, Ledger, MemoryEngine, MemorySpecStore,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let path = args
        .next()
        .expect("usage: ledger-core <events.csv> [config]");
    let config_path = args.next().map(PathBuf::from);

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let config = Config::load(config_path.as_deref()).expect("failed to load configuration");
    info!(batch_size = config.batch_size, engine = ?config.engine, "configuration loaded");

    let engine: Arc<dyn AccountingEngine> = match config.engine {
        EngineKind::Memory => Arc::new(MemoryEngine::new()),
        EngineKind::TigerBeetle => tigerbeetle_engine(&config),
    };
    let store = Arc::new(CachedSpecStore::new(
        Arc::new(MemorySpecStore::new()),
        config.transfer_cache_max,
    ));
    let batcher = Batcher::spawn(engine.clone(), config.batcher());
    let ledger = Ledger::new(config, store, engine, batcher);

    let events = read_events(path.clone()).expect("failed to open csv file");
    let (event_sender, event_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in events {
            match result {
                Ok(event) => {
                    if event_sender.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    ledger.run(ReceiverStream::new(event_receiver)).await;

    match ledger.all_balances().await {
        Ok(balances) => {
            write_balances(io::stdout().lock(), &balances, ledger.config())
                .expect("failed to write csv report");
        }
        Err(e) => {
            error!(reason = %e, "balance report failed");
            std::process::exit(1);
        }
    }
}

#[cfg(feature = "tigerbeetle")]
fn tigerbeetle_engine(config: &Config) -> Arc<dyn AccountingEngine> {
    let engine = ledger_core::engine::TigerBeetleEngine::connect(
        u128::from(config.tigerbeetle_cluster_id),
        &config.tigerbeetle_addresses,
    )
    .expect("failed to connect to tigerbeetle");
    Arc::new(engine)
}

#[cfg(not(feature = "tigerbeetle"))]
fn tigerbeetle_engine(_config: &Config) -> Arc<dyn AccountingEngine> {
    error!("engine \"tigerbeetle\" needs a build with the tigerbeetle feature");
    std::process::exit(1);
}
