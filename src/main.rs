//! CLI for mqdb
//!
//! Subcommands:
//! - `run`: restore the snapshot (if enabled) and run the maintenance loop
//!   until ctrl-c, saving on the way out
//! - `inspect`: print what a snapshot directory holds

use std::sync::{Arc, Mutex};

use clap::Parser;
use mqdb::broker::{Database, Maintenance};
use mqdb::config::{Settings, load_config};
use mqdb::persistence::Persistence;
use mqdb::transport::ChannelTransport;
use mqdb::utils::{Clock, SystemClock, lock_unpoisoned};
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "mqdb")]
enum Command {
    /// Run the delivery core
    Run,
    /// Summarise a snapshot directory
    Inspect {
        /// Snapshot directory (default: the configured persistence path)
        #[arg(long)]
        path: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            mqdb::utils::logging::init("info");
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    mqdb::utils::logging::init(&settings.log.level);

    let cmd = Command::parse();

    let result = match cmd {
        Command::Run => run(settings).await,
        Command::Inspect { path } => {
            inspect(path.as_deref().unwrap_or(&settings.persistence.path))
        }
    };
    if let Err(e) = result {
        error!("mqdb failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let mut db = Database::new(settings.broker.limits());

    let persistence = if settings.persistence.enabled {
        let persistence = Persistence::open(&settings.persistence.path)?;
        persistence.restore(&mut db)?;
        Some(persistence)
    } else {
        None
    };

    let maintenance = Maintenance::new(&settings, persistence, SystemClock.now());
    let db = Arc::new(Mutex::new(db));
    let transport = Arc::new(Mutex::new(ChannelTransport::new()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let loop_handle = tokio::spawn(maintenance.run(db.clone(), transport.clone(), shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully.");

    if shutdown_tx.send(true).is_err() {
        warn!("maintenance loop already stopped");
    }
    let maintenance = loop_handle.await?;

    let mut guard = lock_unpoisoned(&*db);
    if let Some(persistence) = maintenance.persistence() {
        persistence.save(&*guard)?;
    }
    guard.close();
    Ok(())
}

fn inspect(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let persistence = Persistence::open(path)?;
    let records = persistence.load_records()?;
    let sessions = persistence.load_sessions()?;
    let bytes: usize = records.iter().map(|r| r.payload.len()).sum();
    let entries: usize = sessions.iter().map(|s| s.entries.len()).sum();

    println!("snapshot: {path}");
    println!("stored messages: {} ({} payload bytes)", records.len(), bytes);
    println!("last store id: {}", persistence.last_db_id()?.unwrap_or(0));
    println!("sessions: {}", sessions.len());
    println!("delivery entries: {entries}");
    for session in &sessions {
        println!("  {}: {} entries", session.id, session.entries.len());
    }
    Ok(())
}
