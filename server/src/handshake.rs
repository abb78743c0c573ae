//! ID assignment and the legacy pose exchange

use crate::world::WorldBoard;
use log::{debug, info, warn};
use shared::{
    is_valid_id, HelloAck, Message, PlayerId, PoseRecord, PoseSnapshot, Transport, UpdatePos,
    MAX_DATAGRAM, MAX_PLATFORMS, MAX_PLAYERS,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One-byte negative acknowledgement for requests the service does not serve
pub const NACK: [u8; 1] = [0];

/// Hands out session-unique player ids from a single-threaded request loop
pub struct HandshakeService {
    next_id: PlayerId,
    tick: u64,
    cmd_port: u16,
    pub_port: u16,
    board: Arc<WorldBoard>,
}

impl HandshakeService {
    /// `cmd_port` and `pub_port` are echoed in every acknowledgement
    pub fn new(cmd_port: u16, pub_port: u16, board: Arc<WorldBoard>) -> Self {
        Self {
            next_id: 1,
            tick: 0,
            cmd_port,
            pub_port,
            board,
        }
    }

    /// Next unused id, counting up from 1; `None` once the id range is spent
    pub fn hello(&mut self) -> Option<PlayerId> {
        let id = self.next_id;
        if !is_valid_id(id) {
            return None;
        }
        self.next_id = id.checked_add(1).unwrap_or(0);
        Some(id)
    }

    /// Records the caller's pose and builds the bounded snapshot it is owed
    pub fn update_pos(&mut self, update: UpdatePos) -> PoseSnapshot {
        let me = PoseRecord {
            id: update.id,
            x: update.x,
            y: update.y,
        };
        self.board.record_pose(me);
        self.tick += 1;

        let others = self
            .board
            .poses()
            .into_iter()
            .filter(|pose| pose.id != me.id)
            .take(MAX_PLAYERS)
            .collect();
        let mut platforms = self.board.platforms();
        platforms.truncate(MAX_PLATFORMS);

        PoseSnapshot {
            tick: self.tick,
            me,
            others,
            platforms,
        }
    }

    /// Reply bytes for one request datagram
    pub fn handle(&mut self, request: &[u8]) -> Vec<u8> {
        let reply = match Message::decode(request) {
            Ok(Message::Hello(hello)) => {
                let Some(assigned_id) = self.hello() else {
                    warn!("No player id left for '{}'", hello.name);
                    return NACK.to_vec();
                };
                info!("Hello from '{}' -> id {}", hello.name, assigned_id);
                Message::HelloAck(HelloAck {
                    assigned_id,
                    cmd_port: i32::from(self.cmd_port),
                    pub_port: i32::from(self.pub_port),
                })
            }
            Ok(Message::UpdatePos(update)) if is_valid_id(update.id) => {
                Message::PoseSnapshot(self.update_pos(update))
            }
            _ => return NACK.to_vec(),
        };

        match reply.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode handshake reply: {}", e);
                NACK.to_vec()
            }
        }
    }

    /// Serves requests until `running` is cleared
    pub fn run(&mut self, transport: &dyn Transport, running: &AtomicBool) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        while running.load(Ordering::Relaxed) {
            let len = match transport.recv(&mut buf) {
                Ok(Some(len)) => len,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Handshake receive failed: {}", e);
                    continue;
                }
            };

            let reply = self.handle(&buf[..len]);
            if let Err(e) = transport.send(&reply) {
                warn!("Failed to send handshake reply: {}", e);
            }
        }
        debug!("Handshake service stopped, next id {}", self.next_id);
    }
}
