use clap::Parser;
use client::network::{Client, ClientConfig};
use log::info;
use shared::SyncOptions;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Name of the local world
    #[arg(short = 'n', long, default_value = "client")]
    name: String,

    /// Number of orbiting objects to spawn
    #[arg(short = 'o', long, default_value = "5")]
    objects: usize,

    /// Coalesce outbound changes and flush every N milliseconds
    #[arg(short = 'u', long)]
    update_interval: Option<f64>,

    /// Simulation steps per second
    #[arg(short = 'r', long, default_value = "30")]
    sim_rate: u32,

    /// Disable jitter-driven rate control and extrapolation
    #[arg(long)]
    no_socket_cleaner: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut sync = SyncOptions::default();
    if let Some(interval) = args.update_interval {
        sync = sync.with_update_interval(interval);
    }
    if args.no_socket_cleaner {
        sync = sync.without_socket_cleaner();
    }

    info!("Starting client...");
    info!("Spawning {} objects at {} steps per second", args.objects, args.sim_rate);

    let config = ClientConfig {
        server_addr: args.server,
        name: args.name,
        objects: args.objects,
        sim_rate: args.sim_rate,
        sync,
    };

    let mut client = Client::connect(config).await?;

    tokio::select! {
        result = client.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, disconnecting...");
        }
    }

    Ok(())
}
