mod migrations;
mod server;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use movienight_core::{
    bootstrap::{init_database, init_services, load_config},
    logging,
    repository::{MemoryRoomStore, PgRoomRepository, RoomStore},
};

use server::MovieNightServer;

#[derive(Parser, Debug)]
#[command(name = "movienight")]
#[command(about = "MovieNight room coordination and signaling server", long_about = None)]
struct Args {
    /// Path to a YAML/TOML config file
    #[arg(short, long, env = "MOVIENIGHT_CONFIG_PATH")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration
    let config = load_config(args.config.as_deref())?;

    // 2. Initialize logging; the guard flushes the file writer on exit
    let _log_guard = logging::init_logging(&config.logging)?;
    info!("MovieNight server starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Pick the Room Store
    let (store, pool) = if config.uses_database() {
        let pool = init_database(&config.database).await?;
        migrations::run_migrations(&pool).await?;
        let store: Arc<dyn RoomStore> = Arc::new(PgRoomRepository::new(pool.clone()));
        (store, Some(pool))
    } else {
        info!("No database configured, rooms are kept in memory");
        let store: Arc<dyn RoomStore> = Arc::new(MemoryRoomStore::new());
        (store, None)
    };

    // 4. Wire relay, lifecycle manager and scheduler
    let services = init_services(store, &config)?;

    // 5. Serve until a shutdown signal arrives
    MovieNightServer::new(config, services, pool).run().await
}
