use clap::Parser;
use client::config::{ClientConfig, SERVER_HOST_ENV};
use client::network::NetworkClient;
use client::wander::Wanderer;
use log::{info, warn};
use shared::platform::parse_dimension;
use shared::{PlatformLayout, DIRECTORY_PORT, HANDSHAKE_PORT, WORLD_PORT};
use tokio::time::{interval, Duration, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host running the server services
    #[arg(short = 's', long, env = SERVER_HOST_ENV, default_value = "127.0.0.1")]
    server_host: String,

    /// Display name sent with the handshake
    #[arg(short = 'n', long, default_value = "player")]
    name: String,

    #[arg(long, default_value_t = HANDSHAKE_PORT)]
    handshake_port: u16,

    #[arg(long, default_value_t = WORLD_PORT)]
    world_port: u16,

    #[arg(long, default_value_t = DIRECTORY_PORT)]
    directory_port: u16,

    /// Local pose publish rate
    #[arg(short = 'r', long, default_value = "60")]
    rate: u32,

    /// Also run the legacy pose exchange once per second
    #[arg(long)]
    legacy_pose: bool,

    /// Screen width; confines the wandering pose and sizes the takeover layout
    #[arg(short = 'w', long, default_value = "1920", value_parser = parse_dimension)]
    width: f32,

    /// Screen height (no short flag to avoid conflict with --help)
    #[arg(long, default_value = "1080", value_parser = parse_dimension)]
    height: f32,

    /// Horizontally moving platforms simulated while holding world authority
    #[arg(long, default_value = "2", value_parser = clap::value_parser!(u8).range(1..=20))]
    horizontal: u8,

    /// Vertically moving platforms simulated while holding world authority
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u8).range(0..=10))]
    vertical: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = ClientConfig {
        server_host: args.server_host.clone(),
        name: args.name.clone(),
        handshake_port: args.handshake_port,
        world_port: args.world_port,
        directory_port: args.directory_port,
        layout: PlatformLayout {
            width: args.width,
            height: args.height,
            horizontal_movers: usize::from(args.horizontal),
            vertical_movers: usize::from(args.vertical),
        },
        ..ClientConfig::default()
    };

    info!("Connecting to: {}", config.server_host);
    let network = match tokio::task::spawn_blocking(move || NetworkClient::start(config)).await? {
        Ok(network) => Some(network),
        Err(e) => {
            warn!("Running offline: {}", e);
            None
        }
    };

    let mut wanderer = Wanderer::new(args.width, args.height);
    let dt = 1.0 / args.rate.max(1) as f32;
    let mut ticker = interval(Duration::from_secs_f32(dt));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick: u64 = 0;
    let mut was_authority = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }

        tick += 1;
        let pose = wanderer.step(dt);
        let Some(network) = network.as_ref() else {
            continue;
        };

        if let Err(e) = network.publish_player(
            tick, pose.x, pose.y, pose.vx, pose.vy, pose.facing, pose.anim,
        ) {
            warn!("Failed to publish pose: {}", e);
        }

        if args.legacy_pose && tick % u64::from(args.rate.max(1)) == 0 {
            match tokio::task::block_in_place(|| network.send_pose(pose.x, pose.y)) {
                Ok(true) => {}
                Ok(false) => info!("Pose exchange unanswered"),
                Err(e) => warn!("Pose exchange failed: {}", e),
            }
        }

        let authority = network.is_authority();
        if authority != was_authority {
            info!(
                "Player {} authority: {} ({} peers, {} platforms)",
                network.my_id(),
                authority,
                network.peers_snapshot().len(),
                network.platforms().len()
            );
            was_authority = authority;
        }
    }

    if let Some(mut network) = network {
        tokio::task::spawn_blocking(move || network.shutdown()).await?;
    }

    Ok(())
}
