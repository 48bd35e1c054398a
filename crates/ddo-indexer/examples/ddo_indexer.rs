//! Example: index every chain in `RPCS` into an in-memory store and print each persisted DDO.
//!
//! Configuration comes from the environment (`RPCS`, `INDEXER_INTERVAL`, `ALLOWED_VALIDATORS`,
//! ...). Optionally pass `--reindex-chain <CHAIN_ID>` to rewind one chain at startup.
//!
//! Usage:
//!
//!   RPCS='{"8996":"http://127.0.0.1:8545"}' RUST_LOG=ddo_indexer=debug \
//!     cargo run -p ddo-indexer --example ddo_indexer

use ddo_indexer::{AdminCommand, Indexer, IndexerConfig, Stores};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut reindex_chain = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--reindex-chain" => {
                i += 1;
                reindex_chain = args.get(i).map(|s| s.parse::<u64>()).transpose()?;
            }
            "--help" | "-h" => {
                eprintln!("Usage: ddo_indexer [--reindex-chain <CHAIN_ID>]  (config from RPCS etc.)");
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    let config = match IndexerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(reason = %e, "invalid configuration");
            std::process::exit(1);
        }
    };
    let indexer = Arc::new(Indexer::new(config, Stores::in_memory())?);
    if let Some(chain_id) = reindex_chain {
        let job = indexer.submit(AdminCommand::ReindexChain {
            chain_id,
            block: None,
        })?;
        println!("{}", serde_json::to_string(&job)?);
    }

    let mut events = indexer.subscribe();
    let runner = tokio::spawn(Arc::clone(&indexer).run());
    loop {
        tokio::select! {
            ev = events.recv() => match ev {
                Ok(ev) => println!(
                    "chain={} event={} did={} tx={}",
                    ev.chain_id, ev.event_type, ev.did, ev.tx_hash
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event printer lagging");
                }
                Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                indexer.shutdown();
                break;
            }
        }
    }
    runner.await??;
    Ok(())
}
