//! Peer directory mapping player ids to advertised publish endpoints
//!
//! This module handles the server side of peer discovery:
//! - Registration and refresh of each client's publish endpoint
//! - Fresh id assignment for clients that register without one
//! - Peer list replies that exclude the caller
//! - Background pruning of clients that stopped re-registering
//!
//! The request loop and the janitor share one [`Directory`] behind a single
//! lock. Pruning only happens in the janitor, so a reply may still list a
//! stale peer that has not been pruned yet.

use log::{debug, info, warn};
use parking_lot::Mutex;
use shared::{
    DirectoryRegister, DirectoryReply, Message, PeerEndpoint, PlayerId, Transport, MAX_DATAGRAM,
};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A registered peer and when it was last heard from
#[derive(Debug, Clone, Copy)]
pub struct DirectoryEntry {
    /// Where the peer publishes its state
    pub endpoint: PeerEndpoint,
    /// Time of the most recent registration
    pub last_seen: Instant,
}

impl DirectoryEntry {
    /// True when the peer has not re-registered within `timeout`
    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }
}

/// Registry of every peer currently known to the directory
#[derive(Debug)]
pub struct Directory {
    entries: BTreeMap<PlayerId, DirectoryEntry>,
    next_id: PlayerId,
    timeout: Duration,
}

impl Directory {
    /// Empty registry pruning entries silent for longer than `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 1,
            timeout,
        }
    }

    /// Registers or refreshes a peer
    ///
    /// An `id <= 0` asks for a fresh id, which never collides with an id already
    /// present. Every call overwrites the endpoint and refreshes `last_seen`.
    /// Returns the caller's id and every other known peer, or `None` when a
    /// fresh id was asked for and every positive id is taken.
    pub fn register(
        &mut self,
        id: PlayerId,
        address: Ipv4Addr,
        publish_port: u16,
        now: Instant,
    ) -> Option<(PlayerId, Vec<PeerEndpoint>)> {
        let id = if id > 0 { id } else { self.fresh_id()? };

        let endpoint = PeerEndpoint {
            id,
            address,
            publish_port,
        };
        if self
            .entries
            .insert(
                id,
                DirectoryEntry {
                    endpoint,
                    last_seen: now,
                },
            )
            .is_none()
        {
            info!("Peer {} registered at {}:{}", id, address, publish_port);
        }

        let peers = self
            .entries
            .values()
            .filter(|entry| entry.endpoint.id != id)
            .map(|entry| entry.endpoint)
            .collect();
        Some((id, peers))
    }

    /// Next id above every id handed out or registered so far; once the top of
    /// the id range is taken, the lowest unused id instead
    fn fresh_id(&mut self) -> Option<PlayerId> {
        let highest = self.entries.keys().next_back().copied().unwrap_or(0);
        let id = match highest.checked_add(1) {
            Some(above) => self.next_id.max(above),
            None => self.lowest_unused()?,
        };
        self.next_id = id.saturating_add(1);
        Some(id)
    }

    fn lowest_unused(&self) -> Option<PlayerId> {
        let mut candidate: PlayerId = 1;
        for &id in self.entries.keys().filter(|id| **id >= 1) {
            if id != candidate {
                return Some(candidate);
            }
            candidate = candidate.checked_add(1)?;
        }
        Some(candidate)
    }

    /// Removes every entry not refreshed within the timeout and returns their ids
    pub fn prune(&mut self, now: Instant) -> Vec<PlayerId> {
        let timeout = self.timeout;
        let expired: Vec<PlayerId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_timed_out(now, timeout))
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            self.entries.remove(id);
            info!("Pruned peer {} after {:?} without registration", id, timeout);
        }
        expired
    }

    /// Entry currently registered under `id`
    pub fn get(&self, id: PlayerId) -> Option<&DirectoryEntry> {
        self.entries.get(&id)
    }

    /// Number of registered peers, stale ones included until pruned
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no peer is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// IPv4 form of a datagram source; unspecified when unknown
fn source_ipv4(source: Option<SocketAddr>) -> Ipv4Addr {
    match source.map(|addr| addr.ip()) {
        Some(IpAddr::V4(ip)) => ip,
        Some(IpAddr::V6(ip)) => ip.to_ipv4_mapped().unwrap_or(Ipv4Addr::UNSPECIFIED),
        None => Ipv4Addr::UNSPECIFIED,
    }
}

/// Request loop and janitor around a shared [`Directory`]
pub struct DirectoryService {
    directory: Arc<Mutex<Directory>>,
}

impl DirectoryService {
    /// Service around an empty [`Directory`]
    pub fn new(timeout: Duration) -> Self {
        Self {
            directory: Arc::new(Mutex::new(Directory::new(timeout))),
        }
    }

    /// Shared handle to the registry this service serves
    pub fn directory(&self) -> Arc<Mutex<Directory>> {
        Arc::clone(&self.directory)
    }

    /// Reply bytes for one registration datagram received from `source`
    ///
    /// Malformed requests still get an answer: an empty reply.
    pub fn handle(&self, request: &[u8], source: Option<SocketAddr>, now: Instant) -> Vec<u8> {
        let reply = match Message::decode(request) {
            Ok(Message::DirectoryRegister(DirectoryRegister {
                want_list,
                player_id,
                publish_port,
            })) => {
                let registered = self.directory.lock().register(
                    player_id,
                    source_ipv4(source),
                    publish_port,
                    now,
                );
                let Some((my_id, peers)) = registered else {
                    warn!("No free player id left for a directory registration");
                    return Vec::new();
                };
                DirectoryReply {
                    my_id,
                    peers: if want_list { peers } else { Vec::new() },
                }
            }
            _ => {
                debug!("Malformed directory request ({} bytes)", request.len());
                return Vec::new();
            }
        };

        Message::DirectoryReply(reply).encode().unwrap_or_else(|e| {
            warn!("Failed to encode directory reply: {}", e);
            Vec::new()
        })
    }

    /// Serves registrations until `running` is cleared
    pub fn run(&self, transport: &dyn Transport, running: &AtomicBool) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        while running.load(Ordering::Relaxed) {
            let (len, source) = match transport.recv_from(&mut buf) {
                Ok(Some(received)) => received,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Directory receive failed: {}", e);
                    continue;
                }
            };

            let reply = self.handle(&buf[..len], Some(source), Instant::now());
            if let Err(e) = transport.send(&reply) {
                warn!("Failed to send directory reply: {}", e);
            }
        }
    }

    /// Prunes stale entries every `interval`, independent of request traffic
    pub fn run_janitor(&self, interval: Duration, running: &AtomicBool) {
        let tick = Duration::from_millis(50).min(interval);
        let mut next = Instant::now() + interval;
        while running.load(Ordering::Relaxed) {
            thread::sleep(tick);
            let now = Instant::now();
            if now >= next {
                self.directory.lock().prune(now);
                next = now + interval;
            }
        }
    }
}
