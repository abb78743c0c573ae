//! Server runtime owning the service sockets and their threads

use crate::config::ServerConfig;
use crate::directory::{Directory, DirectoryService};
use crate::handshake::HandshakeService;
use crate::world::{WorldBoard, WorldService};
use log::{error, info, warn};
use parking_lot::Mutex;
use shared::{PlatformWorld, SocketRole, Transport, UdpTransport};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Addresses the services actually bound; `None` when a bind failed
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundAddrs {
    pub handshake: Option<SocketAddr>,
    pub world: Option<SocketAddr>,
    pub directory: Option<SocketAddr>,
}

/// Handshake, directory and world services running on their own threads
pub struct Server {
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    addrs: BoundAddrs,
    board: Arc<WorldBoard>,
    directory: Arc<Mutex<Directory>>,
}

fn bind(role: SocketRole, addr: SocketAddr, timeout: Duration) -> Option<UdpTransport> {
    let transport = match UdpTransport::bind(role, addr) {
        Ok(transport) => transport,
        Err(e) => {
            error!("Failed to bind {} socket on {}: {}", role.name(), addr, e);
            return None;
        }
    };
    if let Err(e) = transport.set_timeout(Some(timeout)) {
        warn!("Failed to set timeout on {}: {}", addr, e);
    }
    Some(transport)
}

fn local_addr(transport: &Option<UdpTransport>) -> Option<SocketAddr> {
    transport.as_ref().and_then(|t| t.local_addr().ok())
}

impl Server {
    /// Binds every service and starts its thread
    ///
    /// A service whose socket cannot be bound is logged and left idle; the
    /// remaining services still start.
    pub fn start(config: ServerConfig) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let board = Arc::new(WorldBoard::default());
        let directory_service = Arc::new(DirectoryService::new(config.directory_timeout));
        let directory = directory_service.directory();
        let mut handles = Vec::new();

        let handshake_socket = bind(SocketRole::Reply, config.handshake_addr(), config.poll_timeout);
        let world_socket = bind(SocketRole::Publish, config.world_addr(), config.poll_timeout);
        let directory_socket =
            bind(SocketRole::Reply, config.directory_addr(), config.poll_timeout);

        let addrs = BoundAddrs {
            handshake: local_addr(&handshake_socket),
            world: local_addr(&world_socket),
            directory: local_addr(&directory_socket),
        };

        if let Some(transport) = handshake_socket {
            let cmd_port = addrs.handshake.map_or(config.handshake_port, |a| a.port());
            let pub_port = addrs.world.map_or(config.world_port, |a| a.port());
            let mut service = HandshakeService::new(cmd_port, pub_port, Arc::clone(&board));
            let running = Arc::clone(&running);
            handles.push(thread::spawn(move || service.run(&transport, &running)));
        }

        if let Some(transport) = world_socket {
            let world = PlatformWorld::from_layout(&config.layout);
            let mut service =
                WorldService::new(world, config.simulation_hz, config.publish_hz, Instant::now());
            let board = Arc::clone(&board);
            let running = Arc::clone(&running);
            handles.push(thread::spawn(move || {
                service.run(&transport, &board, &running)
            }));
        }

        if let Some(transport) = directory_socket {
            let service = Arc::clone(&directory_service);
            let running = Arc::clone(&running);
            handles.push(thread::spawn(move || service.run(&transport, &running)));
        }

        {
            let service = Arc::clone(&directory_service);
            let running = Arc::clone(&running);
            let interval = config.janitor_interval;
            handles.push(thread::spawn(move || service.run_janitor(interval, &running)));
        }

        info!(
            "Server started (handshake {:?}, world {:?}, directory {:?})",
            addrs.handshake, addrs.world, addrs.directory
        );

        Self {
            running,
            handles,
            addrs,
            board,
            directory,
        }
    }

    /// Where each service listens; ports are resolved when binding to port 0
    pub fn addrs(&self) -> BoundAddrs {
        self.addrs
    }

    /// Poses and platforms shared by the handshake and world services
    pub fn board(&self) -> Arc<WorldBoard> {
        Arc::clone(&self.board)
    }

    /// Registry shared by the directory request loop and its janitor
    pub fn directory(&self) -> Arc<Mutex<Directory>> {
        Arc::clone(&self.directory)
    }

    /// False once [`Server::stop`] has been called
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Clears the running flag and joins every service thread
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::Relaxed) && self.handles.is_empty() {
            return;
        }
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("Server thread panicked");
            }
        }
        info!("Server stopped");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}
