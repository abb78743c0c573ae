//! Table of remote peers fed by the P2P receive path

use log::{debug, info};
use shared::{is_valid_id, P2pPlayer, PlayerId};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Last known state of one remote peer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeerState {
    pub id: PlayerId,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    /// 0 facing left, 1 facing right
    pub facing: u8,
    /// Animation frame set the peer reported
    pub anim: u8,
    /// Sender tick of the newest packet
    pub last_tick: u64,
    /// When the newest packet arrived
    pub last_recv: Instant,
}

/// Single-writer peer table; readers only get copies
#[derive(Debug)]
pub struct PeerTable {
    own_id: PlayerId,
    peers: BTreeMap<PlayerId, PeerState>,
    hide_after: Duration,
    prune_after: Duration,
}

impl PeerTable {
    /// Table for the client `own_id`; its own packets are never stored
    pub fn new(own_id: PlayerId, hide_after: Duration, prune_after: Duration) -> Self {
        Self {
            own_id,
            peers: BTreeMap::new(),
            hide_after,
            prune_after,
        }
    }

    /// Applies one player packet; packets from ourselves or invalid ids are ignored
    pub fn apply(&mut self, packet: &P2pPlayer, now: Instant) -> bool {
        if packet.player_id == self.own_id || !is_valid_id(packet.player_id) {
            return false;
        }

        let state = PeerState {
            id: packet.player_id,
            x: packet.x,
            y: packet.y,
            vx: packet.vx,
            vy: packet.vy,
            facing: packet.facing,
            anim: packet.anim,
            last_tick: packet.tick,
            last_recv: now,
        };
        if self.peers.insert(packet.player_id, state).is_none() {
            info!("Peer {} joined", packet.player_id);
        }
        true
    }

    /// Drops peers silent for longer than the prune window
    pub fn prune(&mut self, now: Instant) -> Vec<PlayerId> {
        let prune_after = self.prune_after;
        let mut removed = Vec::new();
        self.peers.retain(|id, peer| {
            let live = now.saturating_duration_since(peer.last_recv) <= prune_after;
            if !live {
                removed.push(*id);
            }
            live
        });
        for id in &removed {
            debug!("Peer {} pruned after {:?} of silence", id, prune_after);
        }
        removed
    }

    /// Peers heard from recently enough to be drawn
    pub fn visible(&self, now: Instant) -> Vec<PeerState> {
        self.peers
            .values()
            .filter(|peer| now.saturating_duration_since(peer.last_recv) <= self.hide_after)
            .copied()
            .collect()
    }

    /// Ids that take part in authority election
    pub fn live_ids(&self, now: Instant) -> Vec<PlayerId> {
        self.peers
            .values()
            .filter(|peer| now.saturating_duration_since(peer.last_recv) <= self.prune_after)
            .map(|peer| peer.id)
            .collect()
    }

    /// Copy of one peer's state
    pub fn get(&self, id: PlayerId) -> Option<PeerState> {
        self.peers.get(&id).copied()
    }

    /// Peers currently held, hidden ones included
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
