//! CLI for mqcore
//!
//! Subcommands:
//! - `inspect`: open the message store, restore the configured durable
//!   queues and report what would be redelivered
//! - `purge`: drop every stored message of one queue

use std::sync::Arc;

use clap::Parser;
use mqcore::broker::Broker;
use mqcore::config::{Settings, StorageBackend, load_config};
use mqcore::persistence::{DbStorage, MemoryStore, MsgStorage, SledStore};
use mqcore::utils::{Result, logging};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "mqcore")]
enum Command {
    /// Restore stored messages into the configured durable queues and report them
    Inspect,
    /// Remove every stored message of a queue
    Purge {
        /// Queue whose messages are dropped
        #[arg(long)]
        queue: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    logging::init(&settings.log.level);

    let result = match cmd {
        Command::Inspect => inspect(&settings),
        Command::Purge { queue } => purge(&settings, &queue),
    };
    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn open_storage(settings: &Settings) -> Result<Arc<MsgStorage>> {
    let db: Arc<dyn DbStorage> = match settings.storage.backend {
        StorageBackend::Sled => Arc::new(SledStore::open(&settings.storage.path)?),
        StorageBackend::Memory => {
            warn!("memory backend selected, nothing survives this process");
            Arc::new(MemoryStore::new())
        }
    };
    Ok(Arc::new(MsgStorage::new(db, settings.broker.protocol_version)))
}

fn inspect(settings: &Settings) -> Result<()> {
    let storage = open_storage(settings)?;
    let broker = Broker::new(Some(storage.clone())).with_default_prefetch(
        settings.broker.default_prefetch_count,
        settings.broker.default_prefetch_size,
    );
    for name in &settings.broker.durable_queues {
        broker.declare_queue(name, true)?;
    }

    let report = broker.restore()?;
    for (queue, ready) in &report.per_queue {
        info!(queue = %queue, ready, "restored");
    }
    for (queue, stored) in storage.counts()? {
        if broker.get_queue(&queue).is_none() {
            info!(queue = %queue, stored, "stored messages for an undeclared queue");
        }
    }
    info!(
        restored = report.restored,
        skipped = report.skipped,
        corrupt = report.corrupt,
        "inspection finished"
    );
    broker.close()?;
    Ok(())
}

fn purge(settings: &Settings, queue: &str) -> Result<()> {
    let storage = open_storage(settings)?;
    let removed = storage.purge(queue)?;
    info!(queue, removed, "purged stored messages");
    storage.close()?;
    Ok(())
}
