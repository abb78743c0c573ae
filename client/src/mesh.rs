//! Directory registration and the subscribe side of the peer mesh

use log::{debug, info, warn};
use shared::{
    DirectoryRegister, DirectoryReply, Message, MsgKind, NetResult, PeerEndpoint, PlayerId,
    Transport, MAX_DATAGRAM,
};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

/// Registers this client's publish endpoint and fetches the peer list
pub struct DirectoryClient<T: Transport> {
    transport: T,
}

impl<T: Transport> DirectoryClient<T> {
    /// `transport` must be a request socket already connected to the directory
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// One registration round trip; `Ok(None)` when the directory did not answer in time
    pub fn register(
        &self,
        player_id: PlayerId,
        publish_port: u16,
    ) -> NetResult<Option<DirectoryReply>> {
        let request = Message::DirectoryRegister(DirectoryRegister {
            want_list: true,
            player_id,
            publish_port,
        })
        .encode()?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let Some(len) = self.transport.request(&request, &mut buf)? else {
            return Ok(None);
        };
        match Message::decode_expecting(&buf[..len], MsgKind::DirectoryReply)? {
            Message::DirectoryReply(reply) => Ok(Some(reply)),
            _ => Ok(None),
        }
    }
}

/// One live subscription to a peer publisher
#[derive(Debug, Clone, Copy)]
struct PeerLink {
    addr: SocketAddr,
    since: Instant,
}

/// Subscriptions to every peer's publish endpoint
///
/// Each live peer id is connected at most once, even if the directory later
/// reports a different endpoint for it. Once a peer goes silent its link is
/// dropped, and a later directory listing may connect it again.
pub struct PeerMesh<T: Transport> {
    subscriber: T,
    links: HashMap<PlayerId, PeerLink>,
    directory_host: Ipv4Addr,
}

impl<T: Transport> PeerMesh<T> {
    /// Peers advertised with an unspecified address are reached at `directory_host`
    pub fn new(subscriber: T, directory_host: Ipv4Addr) -> Self {
        Self {
            subscriber,
            links: HashMap::new(),
            directory_host,
        }
    }

    /// Subscribes to every listed peer not connected yet; returns how many were added
    pub fn connect_peers(
        &mut self,
        own_id: PlayerId,
        peers: &[PeerEndpoint],
        now: Instant,
    ) -> usize {
        let mut added = 0;
        for peer in peers {
            if peer.id == own_id || self.links.contains_key(&peer.id) {
                continue;
            }

            let ip = if peer.address.is_unspecified() {
                self.directory_host
            } else {
                peer.address
            };
            let addr = SocketAddr::V4(SocketAddrV4::new(ip, peer.publish_port));
            match self.subscriber.connect(addr) {
                Ok(()) => {
                    info!("Connected to peer {} at {}", peer.id, addr);
                    self.links.insert(peer.id, PeerLink { addr, since: now });
                    added += 1;
                }
                Err(e) => warn!("Failed to connect to peer {} at {}: {}", peer.id, addr, e),
            }
        }
        added
    }

    /// Drops links to peers missing from `live` once they have had `grace` to speak up
    ///
    /// Returns the ids disconnected.
    pub fn forget_silent(
        &mut self,
        live: &[PlayerId],
        now: Instant,
        grace: Duration,
    ) -> Vec<PlayerId> {
        let silent: Vec<PlayerId> = self
            .links
            .iter()
            .filter(|(id, link)| {
                !live.contains(*id) && now.saturating_duration_since(link.since) > grace
            })
            .map(|(id, _)| *id)
            .collect();

        for id in &silent {
            if let Some(link) = self.links.remove(id) {
                info!("Disconnected from silent peer {} at {}", id, link.addr);
                if let Err(e) = self.subscriber.disconnect(link.addr) {
                    warn!("Failed to disconnect from peer {}: {}", id, e);
                }
            }
        }
        silent
    }

    /// True while a link to `id` is held
    pub fn is_connected(&self, id: PlayerId) -> bool {
        self.links.contains_key(&id)
    }

    /// Number of peers currently subscribed to
    pub fn connected_count(&self) -> usize {
        self.links.len()
    }

    /// Keeps this client's subscriptions alive at every peer publisher
    pub fn renew(&self) {
        if let Err(e) = self.subscriber.renew() {
            debug!("Peer subscription renewal failed: {}", e);
        }
    }

    /// Next pending peer message, decoded; malformed datagrams are skipped
    pub fn poll(&self, buf: &mut [u8]) -> NetResult<Option<Message>> {
        while let Some(len) = self.subscriber.recv_non_blocking(buf)? {
            if let Ok(message) = Message::decode(&buf[..len]) {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }
}
