use clap::Parser;
use log::info;
use server::game_server::DEFAULT_MAX_CLIENTS;
use server::network::Server;
use shared::{GameWorld, SyncOptions};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Tick rate (syncer timer checks per second)
    #[arg(short, long, default_value = "60")]
    tick_rate: u32,

    /// Coalesce outbound changes and flush every N milliseconds
    #[arg(short, long)]
    update_interval: Option<f64>,

    /// Disable jitter-driven rate control
    #[arg(long)]
    no_socket_cleaner: bool,

    /// Maximum number of connected clients
    #[arg(short, long, default_value_t = DEFAULT_MAX_CLIENTS)]
    max_clients: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut options = SyncOptions::default();
    if let Some(interval) = args.update_interval {
        options = options.with_update_interval(interval);
    }
    if args.no_socket_cleaner {
        options = options.without_socket_cleaner();
    }

    let world = Rc::new(RefCell::new(GameWorld::new("server")));
    info!("Hub world {}", world.borrow().identifier());

    let address = format!("{}:{}", args.host, args.port);
    let tick_duration = Duration::from_secs_f64(1.0 / args.tick_rate.max(1) as f64);
    let mut server = Server::new(&address, world, options, tick_duration, args.max_clients).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
