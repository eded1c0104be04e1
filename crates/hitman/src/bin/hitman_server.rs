//! # Hitman Server
//!
//! Standalone headless host for the hit lifecycle. Reads commands from stdin,
//! persists hits in a write-ahead log and expires them in the background.
//!
//! ```bash
//! # hitman_server [config.toml] [hits.wal]
//! RUST_LOG=hitman_core=debug ./hitman_server hitman.toml hits.wal
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use hitman::{Command, Console, ConsoleNotifier, HitmanService, HELP};
use hitman_core::{
    Collaborators, HitmanConfig, LedgerEconomy, SharedConfig, StaticDirectory, StaticPermissions,
    WalHitStore,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = PathBuf::from(args.next().unwrap_or_else(|| "hitman.toml".into()));
    let wal_path = PathBuf::from(args.next().unwrap_or_else(|| "hitman.wal".into()));

    // === CONFIGURATION ===
    let config = match HitmanConfig::load_from(&config_path).and_then(SharedConfig::new) {
        Ok(config) => config,
        Err(e) => {
            error!("FATAL: {}: {}", config_path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    // === STORAGE ===
    let store = match WalHitStore::open(&wal_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("FATAL: cannot open {}: {}", wal_path.display(), e);
            return ExitCode::FAILURE;
        }
    };
    info!("Loaded {} active hits from {}", store.len(), wal_path.display());

    // === COLLABORATORS ===
    let directory = Arc::new(StaticDirectory::new());
    let collaborators = Collaborators {
        economy: Arc::new(LedgerEconomy::default()),
        directory: directory.clone(),
        permissions: Arc::new(StaticPermissions::allow_all()),
        notifier: Arc::new(ConsoleNotifier),
    };

    let service = match HitmanService::start(config, store.clone(), collaborators) {
        Ok(service) => service,
        Err(e) => {
            error!("FATAL: cannot start service: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let mut console = Console::new(&service, directory, config_path);

    println!("{HELP}");
    println!("quit                              stop the server");

    // === MAIN LOOP ===
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if line == "quit" || line == "exit" {
                        break;
                    }
                    let result = match line.parse::<Command>() {
                        Ok(command) => console.execute(&service, command).await,
                        Err(e) => Err(e),
                    };
                    match result {
                        Ok(out) => println!("{out}"),
                        Err(e) => println!("error: {e}"),
                    }
                }
                Ok(None) => {
                    info!("Console closed, waiting for Ctrl+C");
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Cannot listen for Ctrl+C: {}", e);
                    }
                    break;
                }
                Err(e) => {
                    error!("Failed to read console input: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received");
                break;
            }
        }
    }

    // === SHUTDOWN ===
    console.close(&service);
    service.shutdown().await;
    if let Err(e) = store.compact() {
        error!("WAL compaction failed: {}", e);
    }
    info!("Goodbye");
    ExitCode::SUCCESS
}
