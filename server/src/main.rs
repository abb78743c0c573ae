use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use shared::platform::parse_dimension;
use shared::{PlatformLayout, DIRECTORY_PORT, HANDSHAKE_PORT, PUBLISH_HZ, SIMULATION_HZ, WORLD_PORT};
use std::net::IpAddr;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address every service binds to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: IpAddr,

    #[arg(long, default_value_t = HANDSHAKE_PORT)]
    handshake_port: u16,

    #[arg(long, default_value_t = WORLD_PORT)]
    world_port: u16,

    #[arg(long, default_value_t = DIRECTORY_PORT)]
    directory_port: u16,

    /// World simulation rate
    #[arg(long, default_value_t = SIMULATION_HZ)]
    sim_hz: f64,

    /// World publish rate
    #[arg(long, default_value_t = PUBLISH_HZ)]
    publish_hz: f64,

    /// Seconds a directory entry survives without re-registration
    #[arg(long, default_value = "5")]
    directory_timeout: u64,

    /// Screen width the platform layout is derived from
    #[arg(long, default_value = "1920", value_parser = parse_dimension)]
    width: f32,

    #[arg(long, default_value = "1080", value_parser = parse_dimension)]
    height: f32,

    /// Horizontally moving platforms
    #[arg(long, default_value = "2", value_parser = clap::value_parser!(u8).range(1..=20))]
    horizontal: u8,

    /// Vertically moving platforms
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u8).range(0..=10))]
    vertical: u8,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind_ip: self.host,
            handshake_port: self.handshake_port,
            world_port: self.world_port,
            directory_port: self.directory_port,
            simulation_hz: self.sim_hz,
            publish_hz: self.publish_hz,
            directory_timeout: Duration::from_secs(self.directory_timeout),
            layout: PlatformLayout {
                width: self.width,
                height: self.height,
                horizontal_movers: usize::from(self.horizontal),
                vertical_movers: usize::from(self.vertical),
            },
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = Args::parse().into_config();
    info!(
        "Starting server on {} (handshake {}, world {}, directory {})",
        config.bind_ip, config.handshake_port, config.world_port, config.directory_port
    );

    let mut server = Server::start(config);

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");

    tokio::task::spawn_blocking(move || server.stop()).await?;

    Ok(())
}
