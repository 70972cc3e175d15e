use clap::Parser;
use log::info;
use server::network::{Server, ServerConfig};
use server::room::{RoomConfig, DEFAULT_MAX_PLAYERS};
use shared::{DEFAULT_PORT, DEFAULT_TICK_RATE, SESSION_TIMEOUT_MS};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Snapshot broadcasts per second
    #[arg(short, long, default_value_t = DEFAULT_TICK_RATE)]
    tick_rate: u32,

    /// Maximum players per room
    #[arg(short, long, default_value_t = DEFAULT_MAX_PLAYERS)]
    max_players: usize,

    /// Milliseconds of silence before a session is dropped
    #[arg(long, default_value_t = SESSION_TIMEOUT_MS)]
    session_timeout_ms: u64,

    /// Comma-separated model identifiers assigned round-robin
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "WomanSkirtCharacter,ManCasualCharacter,RobotCharacter"
    )]
    models: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        join_timeout: Duration::from_millis(args.session_timeout_ms),
        room: RoomConfig {
            max_players: args.max_players,
            tick_rate: args.tick_rate,
            session_timeout: Duration::from_millis(args.session_timeout_ms),
            models: args.models,
        },
    };

    info!(
        "Starting room server: {} Hz, {} players per room, models {:?}",
        config.room.tick_rate, config.room.max_players, config.room.models
    );

    let server = Server::bind(config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
