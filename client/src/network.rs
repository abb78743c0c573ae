//! Client network stack: handshake, world subscription, peer mesh and authority failover

use crate::authority::{AuthorityMachine, AuthorityState};
use crate::config::ClientConfig;
use crate::mesh::{DirectoryClient, PeerMesh};
use crate::peers::{PeerState, PeerTable};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use shared::{
    Hello, HelloAck, Message, MsgKind, NetError, NetResult, P2pPlayer, PlatformRecord, PlayerId,
    PoseSnapshot, SocketRole, Transport, UdpTransport, UpdatePos, WorldSnapshot, MAX_DATAGRAM,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Upper bound on one idle wait of the P2P loop
const P2P_IDLE: Duration = Duration::from_millis(5);
/// Peer datagrams handled per P2P loop iteration
const MAX_DRAIN: usize = 256;

/// Requests an id until the server answers or `attempts` run out
pub fn handshake(
    transport: &dyn Transport,
    name: &str,
    attempts: u32,
    interval: Duration,
) -> NetResult<HelloAck> {
    let hello = Message::Hello(Hello {
        name: name.to_string(),
    })
    .encode()?;
    let mut buf = vec![0u8; MAX_DATAGRAM];

    for attempt in 1..=attempts {
        match transport.request(&hello, &mut buf) {
            Ok(Some(len)) => match Message::decode_expecting(&buf[..len], MsgKind::HelloAck) {
                Ok(Message::HelloAck(ack)) => return Ok(ack),
                Ok(_) => {}
                Err(e) => debug!("Bad handshake reply on attempt {}: {}", attempt, e),
            },
            Ok(None) => debug!("Handshake attempt {}/{} timed out", attempt, attempts),
            Err(e) => debug!("Handshake attempt {}/{} failed: {}", attempt, attempts, e),
        }
        if attempt < attempts {
            thread::sleep(interval);
        }
    }

    Err(NetError::HandshakeFailed { attempts })
}

/// State written by the background threads and read by the game thread
struct SharedState {
    peers: Mutex<PeerTable>,
    platforms: Mutex<Vec<PlatformRecord>>,
    server: Mutex<ServerView>,
    pose_snapshot: Mutex<Option<PoseSnapshot>>,
    authority: AtomicBool,
}

#[derive(Default)]
struct ServerView {
    /// When the last central world snapshot arrived; `None` until one does
    last_snapshot: Option<Instant>,
    /// Newest world state seen from the server or an authoritative peer
    last_world: Option<WorldSnapshot>,
}

impl SharedState {
    fn accept_server_world(&self, snapshot: WorldSnapshot, now: Instant) {
        *self.platforms.lock() = snapshot.platforms.clone();
        let mut server = self.server.lock();
        server.last_snapshot = Some(now);
        server.last_world = Some(snapshot);
    }

    /// Peer-published world; never counts as server freshness
    fn accept_peer_world(&self, snapshot: WorldSnapshot) {
        *self.platforms.lock() = snapshot.platforms.clone();
        self.server.lock().last_world = Some(snapshot);
    }
}

/// Handle to a running client network stack
pub struct NetworkClient {
    my_id: PlayerId,
    control: UdpTransport,
    publisher: Arc<UdpTransport>,
    shared: Arc<SharedState>,
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl NetworkClient {
    /// Performs the handshake, joins the mesh and starts the background threads
    ///
    /// Fails when the server never answers the handshake; the caller decides
    /// whether to continue offline.
    pub fn start(config: ClientConfig) -> NetResult<Self> {
        let server_ip = config.server_ipv4()?;
        let server = |port| SocketAddr::new(IpAddr::V4(server_ip), port);

        let control = UdpTransport::bind(SocketRole::Request, config.local_addr())?;
        control.set_timeout(Some(config.handshake_timeout))?;
        control.connect(server(config.handshake_port))?;
        let ack = handshake(
            &control,
            &config.name,
            config.handshake_attempts,
            config.handshake_interval,
        )?;
        let my_id = ack.assigned_id;
        control.set_timeout(Some(config.pose_timeout))?;
        info!("Handshake complete, assigned id {}", my_id);

        let world_port = u16::try_from(ack.pub_port)
            .ok()
            .filter(|port| *port > 0)
            .unwrap_or(config.world_port);
        let world = UdpTransport::bind(SocketRole::Subscribe, config.local_addr())?;
        world.set_conflate(true);
        world.set_timeout(Some(config.world_poll))?;
        world.connect(server(world_port))?;

        let publisher = Arc::new(UdpTransport::bind(SocketRole::Publish, config.local_addr())?);
        let publish_port = publisher.local_addr()?.port();

        let directory_socket = UdpTransport::bind(SocketRole::Request, config.local_addr())?;
        directory_socket.set_timeout(Some(config.directory_timeout))?;
        directory_socket.connect(server(config.directory_port))?;
        let directory = DirectoryClient::new(directory_socket);

        let peer_socket = UdpTransport::bind(SocketRole::Subscribe, config.local_addr())?;
        peer_socket.set_conflate(false);
        let mut mesh = PeerMesh::new(peer_socket, server_ip);

        match directory.register(my_id, publish_port) {
            Ok(Some(reply)) => {
                mesh.connect_peers(my_id, &reply.peers, Instant::now());
            }
            Ok(None) => warn!("Directory did not answer; starting without peers"),
            Err(e) => warn!("Directory registration failed: {}", e),
        }

        let shared = Arc::new(SharedState {
            peers: Mutex::new(PeerTable::new(
                my_id,
                config.peer_hide_after,
                config.peer_prune_after,
            )),
            platforms: Mutex::new(Vec::new()),
            server: Mutex::new(ServerView::default()),
            pose_snapshot: Mutex::new(None),
            authority: AtomicBool::new(false),
        });
        let running = Arc::new(AtomicBool::new(true));
        let mut handles = Vec::new();

        {
            let shared = Arc::clone(&shared);
            let running = Arc::clone(&running);
            let renew = config.world_renew;
            handles.push(thread::spawn(move || {
                run_world_subscription(world, &shared, renew, &running)
            }));
        }

        {
            let worker = P2pWorker {
                my_id,
                publish_port,
                refresh: config.directory_refresh,
                peer_grace: config.peer_prune_after,
                directory,
                mesh,
                publisher: Arc::clone(&publisher),
                authority: AuthorityMachine::new(
                    config.layout,
                    config.server_stale_after,
                    config.simulation_hz,
                    config.publish_hz,
                ),
                shared: Arc::clone(&shared),
            };
            let running = Arc::clone(&running);
            handles.push(thread::spawn(move || worker.run(&running)));
        }

        Ok(Self {
            my_id,
            control,
            publisher,
            shared,
            running,
            handles,
        })
    }

    /// Id assigned by the handshake service
    pub fn my_id(&self) -> PlayerId {
        self.my_id
    }

    /// True while this client simulates and publishes the world for its peers
    pub fn is_authority(&self) -> bool {
        self.shared.authority.load(Ordering::Relaxed)
    }

    /// Local endpoint peers subscribe to for this client's state
    pub fn publish_addr(&self) -> NetResult<SocketAddr> {
        self.publisher.local_addr()
    }

    /// Copies of the peers recent enough to render
    pub fn peers_snapshot(&self) -> Vec<PeerState> {
        self.shared.peers.lock().visible(Instant::now())
    }

    /// Current platform list, replaced wholesale by every accepted world snapshot
    pub fn platforms(&self) -> Vec<PlatformRecord> {
        self.shared.platforms.lock().clone()
    }

    /// When the last central world snapshot arrived
    pub fn last_server_snapshot(&self) -> Option<Instant> {
        self.shared.server.lock().last_snapshot
    }

    /// Reply of the most recent successful [`NetworkClient::send_pose`]
    pub fn pose_snapshot(&self) -> Option<PoseSnapshot> {
        self.shared.pose_snapshot.lock().clone()
    }

    /// Legacy pose exchange with the handshake service
    ///
    /// Returns `false` when the server did not answer in time or refused.
    pub fn send_pose(&self, x: f32, y: f32) -> NetResult<bool> {
        let request = Message::UpdatePos(UpdatePos {
            id: self.my_id,
            x,
            y,
        })
        .encode()?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let Some(len) = self.control.request(&request, &mut buf)? else {
            return Ok(false);
        };
        match Message::decode_expecting(&buf[..len], MsgKind::PoseSnapshot) {
            Ok(Message::PoseSnapshot(snapshot)) => {
                *self.shared.pose_snapshot.lock() = Some(snapshot);
                Ok(true)
            }
            Ok(_) | Err(NetError::UnknownKind(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Publishes the local player's state to every subscribed peer
    #[allow(clippy::too_many_arguments)]
    pub fn publish_player(
        &self,
        tick: u64,
        x: f32,
        y: f32,
        vx: f32,
        vy: f32,
        facing: u8,
        anim: u8,
    ) -> NetResult<()> {
        let bytes = Message::P2pPlayer(P2pPlayer {
            tick,
            player_id: self.my_id,
            x,
            y,
            vx,
            vy,
            facing,
            anim,
        })
        .encode()?;
        self.publisher.send(&bytes)
    }

    /// Stops the background threads and waits for them
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("Client network thread panicked");
            }
        }
    }
}

impl Drop for NetworkClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Follows the central world publisher and renews the subscription
fn run_world_subscription(
    subscriber: UdpTransport,
    shared: &SharedState,
    renew: Duration,
    running: &AtomicBool,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut next_renew = Instant::now() + renew;

    while running.load(Ordering::Relaxed) {
        match subscriber.recv(&mut buf) {
            Ok(Some(len)) => {
                if let Ok(Message::WorldSnapshot(snapshot)) = Message::decode(&buf[..len]) {
                    shared.accept_server_world(snapshot, Instant::now());
                }
            }
            Ok(None) => {}
            Err(e) => {
                debug!("World receive failed: {}", e);
                thread::sleep(P2P_IDLE);
            }
        }

        let now = Instant::now();
        if now >= next_renew {
            if let Err(e) = subscriber.renew() {
                debug!("World subscription renewal failed: {}", e);
            }
            next_renew = now + renew;
        }
    }
}

/// Background half of the client: directory refresh, peer intake and authority
struct P2pWorker {
    my_id: PlayerId,
    publish_port: u16,
    refresh: Duration,
    /// How long a peer link may stay silent before it is dropped
    peer_grace: Duration,
    directory: DirectoryClient<UdpTransport>,
    mesh: PeerMesh<UdpTransport>,
    publisher: Arc<UdpTransport>,
    authority: AuthorityMachine,
    shared: Arc<SharedState>,
}

impl P2pWorker {
    fn run(mut self, running: &AtomicBool) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut next_refresh = Instant::now() + self.refresh;

        while running.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= next_refresh {
                self.refresh_directory();
                next_refresh = Instant::now() + self.refresh;
            }

            self.drain_peers(&mut buf);
            self.update_authority(Instant::now());

            let idle = self
                .authority
                .until_next(Instant::now())
                .map_or(P2P_IDLE, |wait| wait.min(P2P_IDLE));
            thread::sleep(idle);
        }

        debug!("P2P loop for player {} stopped", self.my_id);
    }

    /// On timeout the last peer list stands
    fn refresh_directory(&mut self) {
        match self.directory.register(self.my_id, self.publish_port) {
            Ok(Some(reply)) => {
                self.mesh.connect_peers(self.my_id, &reply.peers, Instant::now());
            }
            Ok(None) => debug!("Directory refresh timed out"),
            Err(e) => debug!("Directory refresh failed: {}", e),
        }
        self.mesh.renew();
    }

    fn drain_peers(&mut self, buf: &mut [u8]) {
        let last_server = self.shared.server.lock().last_snapshot;
        for _ in 0..MAX_DRAIN {
            let message = match self.mesh.poll(buf) {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    debug!("Peer receive failed: {}", e);
                    break;
                }
            };

            match message {
                Message::P2pPlayer(player) => {
                    self.shared.peers.lock().apply(&player, Instant::now());
                }
                Message::P2pWorld(snapshot)
                    if self.authority.accepts_peer_world(last_server, Instant::now()) =>
                {
                    self.shared.accept_peer_world(snapshot);
                }
                _ => {}
            }
        }
    }

    fn update_authority(&mut self, now: Instant) {
        let live = {
            let mut peers = self.shared.peers.lock();
            peers.prune(now);
            peers.live_ids(now)
        };
        self.mesh.forget_silent(&live, now, self.peer_grace);
        let (last_snapshot, last_world) = {
            let server = self.shared.server.lock();
            (server.last_snapshot, server.last_world.clone())
        };

        let state = self
            .authority
            .evaluate(self.my_id, &live, last_snapshot, last_world.as_ref(), now);
        self.shared
            .authority
            .store(state == AuthorityState::Authority, Ordering::Relaxed);

        if let Some(snapshot) = self.authority.advance(now) {
            match Message::P2pWorld(snapshot).encode() {
                Ok(bytes) => {
                    if let Err(e) = self.publisher.send(&bytes) {
                        warn!("Failed to publish P2P world: {}", e);
                    }
                }
                Err(e) => warn!("Failed to encode P2P world: {}", e),
            }
        }
        if let Some(platforms) = self.authority.platforms() {
            *self.shared.platforms.lock() = platforms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_gives_up_after_attempts() {
        let silent = UdpTransport::bind(SocketRole::Reply, "127.0.0.1:0").unwrap();
        let request = UdpTransport::bind(SocketRole::Request, "127.0.0.1:0").unwrap();
        request
            .set_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        request.connect(silent.local_addr().unwrap()).unwrap();

        let started = Instant::now();
        let result = handshake(&request, "nobody", 3, Duration::from_millis(10));
        assert!(matches!(
            result,
            Err(NetError::HandshakeFailed { attempts: 3 })
        ));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_peer_world_does_not_refresh_server() {
        let shared = SharedState {
            peers: Mutex::new(PeerTable::new(
                1,
                Duration::from_secs(2),
                Duration::from_secs(3),
            )),
            platforms: Mutex::new(Vec::new()),
            server: Mutex::new(ServerView::default()),
            pose_snapshot: Mutex::new(None),
            authority: AtomicBool::new(false),
        };
        let snapshot = WorldSnapshot {
            tick: 9,
            players: Vec::new(),
            platforms: vec![PlatformRecord::default(); 2],
        };

        shared.accept_peer_world(snapshot.clone());
        assert_eq!(shared.platforms.lock().len(), 2);
        assert!(shared.server.lock().last_snapshot.is_none());

        shared.accept_server_world(snapshot, Instant::now());
        assert!(shared.server.lock().last_snapshot.is_some());
    }
}
