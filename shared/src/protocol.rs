//! Wire protocol shared by the server services and the client stack
//!
//! Every message starts with a one-byte [`MsgKind`] so receivers can dispatch
//! before parsing the rest. Layouts are packed and encoded field by field with
//! fixed-width little-endian integers, so the size of each message is known
//! from its field types alone:
//!
//! | Message             | Size                                   |
//! |---------------------|----------------------------------------|
//! | `Hello`             | 5 + name bytes                         |
//! | `HelloAck`          | 13                                     |
//! | `UpdatePos`         | 13                                     |
//! | `PoseSnapshot`      | 381 (bounded: 8 players, 16 platforms) |
//! | `WorldSnapshot`     | 17 + 12 * players + 16 * platforms     |
//! | `DirectoryRegister` | 19                                     |
//! | `DirectoryReply`    | 17 + 10 * peers                        |
//! | `P2pPlayer`         | 31                                     |
//! | `P2pWorld`          | 13 + 16 * platforms                    |
//!
//! The peer records inside a directory reply are the one exception to the
//! little-endian rule: the IPv4 address and publish port are written in network
//! byte order and converted back on receipt.

use crate::error::{NetError, NetResult};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Session-unique player identifier. Zero and negative values are invalid.
pub type PlayerId = i32;

/// Other players carried by a bounded pose snapshot
pub const MAX_PLAYERS: usize = 8;
/// Platforms carried by a bounded pose snapshot
pub const MAX_PLATFORMS: usize = 16;

// Encoded sizes, kind byte included
pub const HELLO_SIZE: usize = 5;
pub const HELLO_ACK_SIZE: usize = 13;
pub const UPDATE_POS_SIZE: usize = 13;
pub const POSE_RECORD_SIZE: usize = 12;
pub const PLATFORM_RECORD_SIZE: usize = 16;
pub const POSE_SNAPSHOT_SIZE: usize =
    29 + MAX_PLAYERS * POSE_RECORD_SIZE + MAX_PLATFORMS * PLATFORM_RECORD_SIZE;
pub const WORLD_HEADER_SIZE: usize = 17;
pub const DIRECTORY_REGISTER_SIZE: usize = 19;
pub const DIRECTORY_REPLY_HEADER_SIZE: usize = 17;
pub const PEER_RECORD_SIZE: usize = 10;
pub const P2P_PLAYER_SIZE: usize = 31;
pub const P2P_WORLD_HEADER_SIZE: usize = 13;

/// Largest datagram any service expects to receive
pub const MAX_DATAGRAM: usize = 4096;

/// Ids handed out by the services are always positive
pub fn is_valid_id(id: PlayerId) -> bool {
    id > 0
}

/// One-byte tag leading every message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgKind {
    Hello = 1,
    HelloAck = 2,
    UpdatePos = 3,
    WorldSnapshot = 4,
    DirectoryRegister = 5,
    DirectoryReply = 6,
    P2pPlayer = 7,
    P2pWorld = 8,
    PoseSnapshot = 9,
}

impl TryFrom<u8> for MsgKind {
    type Error = NetError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            1 => Ok(MsgKind::Hello),
            2 => Ok(MsgKind::HelloAck),
            3 => Ok(MsgKind::UpdatePos),
            4 => Ok(MsgKind::WorldSnapshot),
            5 => Ok(MsgKind::DirectoryRegister),
            6 => Ok(MsgKind::DirectoryReply),
            7 => Ok(MsgKind::P2pPlayer),
            8 => Ok(MsgKind::P2pWorld),
            9 => Ok(MsgKind::PoseSnapshot),
            other => Err(NetError::UnknownKind(other)),
        }
    }
}

/// Reads the kind tag without parsing the payload
pub fn peek_kind(bytes: &[u8]) -> NetResult<MsgKind> {
    match bytes.first() {
        Some(byte) => MsgKind::try_from(*byte),
        None => Err(NetError::Truncated {
            expected: 1,
            actual: 0,
        }),
    }
}

fn wire() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .allow_trailing_bytes()
}

fn require(bytes: &[u8], expected: usize) -> NetResult<()> {
    if bytes.len() < expected {
        return Err(NetError::Truncated {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

/// `header + count * element` with overflow treated as an impossible length
fn variable_len(header: usize, counts: &[(u32, usize)]) -> usize {
    counts.iter().fold(header, |total, (count, element)| {
        (*count as usize)
            .checked_mul(*element)
            .and_then(|bytes| total.checked_add(bytes))
            .unwrap_or(usize::MAX)
    })
}

/// Player id with a position, used by pose exchanges and world snapshots
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PoseRecord {
    pub id: PlayerId,
    pub x: f32,
    pub y: f32,
}

/// Platform position and velocity as carried by every world snapshot
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlatformRecord {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
}

/// Network location a peer's state can be subscribed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerEndpoint {
    pub id: PlayerId,
    pub address: Ipv4Addr,
    pub publish_port: u16,
}

#[derive(Serialize, Deserialize)]
struct PeerRecord {
    player_id: i32,
    ipv4_be: [u8; 4],
    port_be: [u8; 2],
}

impl From<&PeerEndpoint> for PeerRecord {
    fn from(endpoint: &PeerEndpoint) -> Self {
        Self {
            player_id: endpoint.id,
            ipv4_be: endpoint.address.octets(),
            port_be: endpoint.publish_port.to_be_bytes(),
        }
    }
}

impl From<PeerRecord> for PeerEndpoint {
    fn from(record: PeerRecord) -> Self {
        Self {
            id: record.player_id,
            address: Ipv4Addr::from(record.ipv4_be),
            publish_port: u16::from_be_bytes(record.port_be),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct HelloRaw {
    kind: u8,
    name_len: u32,
}

#[derive(Serialize, Deserialize)]
struct HelloAckRaw {
    kind: u8,
    assigned_id: i32,
    cmd_port: i32,
    pub_port: i32,
}

#[derive(Serialize, Deserialize)]
struct UpdatePosRaw {
    kind: u8,
    id: i32,
    x: f32,
    y: f32,
}

#[derive(Serialize, Deserialize)]
struct PoseSnapshotRaw {
    kind: u8,
    tick: u64,
    me: PoseRecord,
    others_count: u32,
    platform_count: u32,
    others: [PoseRecord; MAX_PLAYERS],
    platforms: [PlatformRecord; MAX_PLATFORMS],
}

#[derive(Serialize, Deserialize)]
struct WorldHeaderRaw {
    kind: u8,
    tick: u64,
    player_count: u32,
    platform_count: u32,
}

#[derive(Serialize, Deserialize)]
struct P2pHeader {
    kind: u8,
    tick: u64,
}

#[derive(Serialize, Deserialize)]
struct DirectoryRegisterRaw {
    header: P2pHeader,
    want_list: i32,
    player_id: i32,
    pub_port: u16,
}

#[derive(Serialize, Deserialize)]
struct DirectoryReplyRaw {
    header: P2pHeader,
    my_id: i32,
    peer_count: u32,
}

#[derive(Serialize, Deserialize)]
struct P2pPlayerRaw {
    header: P2pHeader,
    player_id: i32,
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
    facing: u8,
    anim: u8,
}

#[derive(Serialize, Deserialize)]
struct P2pWorldRaw {
    header: P2pHeader,
    platform_count: u32,
}

/// Handshake request carrying the client's display name
#[derive(Debug, Clone, PartialEq)]
pub struct Hello {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HelloAck {
    pub assigned_id: PlayerId,
    pub cmd_port: i32,
    pub pub_port: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdatePos {
    pub id: PlayerId,
    pub x: f32,
    pub y: f32,
}

/// Bounded reply to a legacy pose exchange
///
/// At most [`MAX_PLAYERS`] other players and [`MAX_PLATFORMS`] platforms fit;
/// the encoded size is always [`POSE_SNAPSHOT_SIZE`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PoseSnapshot {
    pub tick: u64,
    pub me: PoseRecord,
    pub others: Vec<PoseRecord>,
    pub platforms: Vec<PlatformRecord>,
}

/// Self-contained world state; receivers replace their copy wholesale
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorldSnapshot {
    pub tick: u64,
    pub players: Vec<PoseRecord>,
    pub platforms: Vec<PlatformRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectoryRegister {
    pub want_list: bool,
    pub player_id: PlayerId,
    pub publish_port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryReply {
    pub my_id: PlayerId,
    pub peers: Vec<PeerEndpoint>,
}

/// A peer's own pose, published on its P2P endpoint
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct P2pPlayer {
    pub tick: u64,
    pub player_id: PlayerId,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub facing: u8,
    pub anim: u8,
}

/// Every message understood by the system
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello(Hello),
    HelloAck(HelloAck),
    UpdatePos(UpdatePos),
    PoseSnapshot(PoseSnapshot),
    /// World state published by the central server
    WorldSnapshot(WorldSnapshot),
    DirectoryRegister(DirectoryRegister),
    DirectoryReply(DirectoryReply),
    P2pPlayer(P2pPlayer),
    /// World state published by a peer holding authority; `players` is not carried
    P2pWorld(WorldSnapshot),
}

impl Message {
    /// Kind byte this message is encoded with
    pub fn kind(&self) -> MsgKind {
        match self {
            Message::Hello(_) => MsgKind::Hello,
            Message::HelloAck(_) => MsgKind::HelloAck,
            Message::UpdatePos(_) => MsgKind::UpdatePos,
            Message::PoseSnapshot(_) => MsgKind::PoseSnapshot,
            Message::WorldSnapshot(_) => MsgKind::WorldSnapshot,
            Message::DirectoryRegister(_) => MsgKind::DirectoryRegister,
            Message::DirectoryReply(_) => MsgKind::DirectoryReply,
            Message::P2pPlayer(_) => MsgKind::P2pPlayer,
            Message::P2pWorld(_) => MsgKind::P2pWorld,
        }
    }

    /// Kind byte followed by the packed body
    ///
    /// Fails when a bounded message holds more elements than its maximum.
    pub fn encode(&self) -> NetResult<Vec<u8>> {
        let kind = self.kind() as u8;
        let mut out = Vec::new();

        match self {
            Message::Hello(hello) => {
                let name = hello.name.as_bytes();
                wire().serialize_into(
                    &mut out,
                    &HelloRaw {
                        kind,
                        name_len: name.len() as u32,
                    },
                )?;
                out.extend_from_slice(name);
            }
            Message::HelloAck(ack) => {
                wire().serialize_into(
                    &mut out,
                    &HelloAckRaw {
                        kind,
                        assigned_id: ack.assigned_id,
                        cmd_port: ack.cmd_port,
                        pub_port: ack.pub_port,
                    },
                )?;
            }
            Message::UpdatePos(pos) => {
                wire().serialize_into(
                    &mut out,
                    &UpdatePosRaw {
                        kind,
                        id: pos.id,
                        x: pos.x,
                        y: pos.y,
                    },
                )?;
            }
            Message::PoseSnapshot(snapshot) => {
                encode_pose_snapshot(&mut out, kind, snapshot)?;
            }
            Message::WorldSnapshot(snapshot) => {
                wire().serialize_into(
                    &mut out,
                    &WorldHeaderRaw {
                        kind,
                        tick: snapshot.tick,
                        player_count: snapshot.players.len() as u32,
                        platform_count: snapshot.platforms.len() as u32,
                    },
                )?;
                for player in &snapshot.players {
                    wire().serialize_into(&mut out, player)?;
                }
                for platform in &snapshot.platforms {
                    wire().serialize_into(&mut out, platform)?;
                }
            }
            Message::DirectoryRegister(register) => {
                wire().serialize_into(
                    &mut out,
                    &DirectoryRegisterRaw {
                        header: P2pHeader { kind, tick: 0 },
                        want_list: register.want_list as i32,
                        player_id: register.player_id,
                        pub_port: register.publish_port,
                    },
                )?;
            }
            Message::DirectoryReply(reply) => {
                wire().serialize_into(
                    &mut out,
                    &DirectoryReplyRaw {
                        header: P2pHeader { kind, tick: 0 },
                        my_id: reply.my_id,
                        peer_count: reply.peers.len() as u32,
                    },
                )?;
                for peer in &reply.peers {
                    wire().serialize_into(&mut out, &PeerRecord::from(peer))?;
                }
            }
            Message::P2pPlayer(player) => {
                wire().serialize_into(
                    &mut out,
                    &P2pPlayerRaw {
                        header: P2pHeader {
                            kind,
                            tick: player.tick,
                        },
                        player_id: player.player_id,
                        x: player.x,
                        y: player.y,
                        vx: player.vx,
                        vy: player.vy,
                        facing: player.facing,
                        anim: player.anim,
                    },
                )?;
            }
            Message::P2pWorld(snapshot) => {
                wire().serialize_into(
                    &mut out,
                    &P2pWorldRaw {
                        header: P2pHeader {
                            kind,
                            tick: snapshot.tick,
                        },
                        platform_count: snapshot.platforms.len() as u32,
                    },
                )?;
                for platform in &snapshot.platforms {
                    wire().serialize_into(&mut out, platform)?;
                }
            }
        }

        Ok(out)
    }

    /// Parses any message, dispatching on the kind byte
    pub fn decode(bytes: &[u8]) -> NetResult<Message> {
        let kind = peek_kind(bytes)?;
        let mut cursor = bytes;

        let message = match kind {
            MsgKind::Hello => {
                require(bytes, HELLO_SIZE)?;
                let raw: HelloRaw = wire().deserialize_from(&mut cursor)?;
                let name_len = raw.name_len as usize;
                require(cursor, name_len)?;
                Message::Hello(Hello {
                    name: String::from_utf8_lossy(&cursor[..name_len]).into_owned(),
                })
            }
            MsgKind::HelloAck => {
                require(bytes, HELLO_ACK_SIZE)?;
                let raw: HelloAckRaw = wire().deserialize_from(&mut cursor)?;
                Message::HelloAck(HelloAck {
                    assigned_id: raw.assigned_id,
                    cmd_port: raw.cmd_port,
                    pub_port: raw.pub_port,
                })
            }
            MsgKind::UpdatePos => {
                require(bytes, UPDATE_POS_SIZE)?;
                let raw: UpdatePosRaw = wire().deserialize_from(&mut cursor)?;
                Message::UpdatePos(UpdatePos {
                    id: raw.id,
                    x: raw.x,
                    y: raw.y,
                })
            }
            MsgKind::PoseSnapshot => {
                require(bytes, POSE_SNAPSHOT_SIZE)?;
                let raw: PoseSnapshotRaw = wire().deserialize_from(&mut cursor)?;
                let others = (raw.others_count as usize).min(MAX_PLAYERS);
                let platforms = (raw.platform_count as usize).min(MAX_PLATFORMS);
                Message::PoseSnapshot(PoseSnapshot {
                    tick: raw.tick,
                    me: raw.me,
                    others: raw.others[..others].to_vec(),
                    platforms: raw.platforms[..platforms].to_vec(),
                })
            }
            MsgKind::WorldSnapshot => {
                require(bytes, WORLD_HEADER_SIZE)?;
                let header: WorldHeaderRaw = wire().deserialize_from(&mut cursor)?;
                require(
                    bytes,
                    variable_len(
                        WORLD_HEADER_SIZE,
                        &[
                            (header.player_count, POSE_RECORD_SIZE),
                            (header.platform_count, PLATFORM_RECORD_SIZE),
                        ],
                    ),
                )?;
                let players = (0..header.player_count)
                    .map(|_| wire().deserialize_from(&mut cursor))
                    .collect::<Result<Vec<PoseRecord>, _>>()?;
                let platforms = (0..header.platform_count)
                    .map(|_| wire().deserialize_from(&mut cursor))
                    .collect::<Result<Vec<PlatformRecord>, _>>()?;
                Message::WorldSnapshot(WorldSnapshot {
                    tick: header.tick,
                    players,
                    platforms,
                })
            }
            MsgKind::DirectoryRegister => {
                require(bytes, DIRECTORY_REGISTER_SIZE)?;
                let raw: DirectoryRegisterRaw = wire().deserialize_from(&mut cursor)?;
                Message::DirectoryRegister(DirectoryRegister {
                    want_list: raw.want_list != 0,
                    player_id: raw.player_id,
                    publish_port: raw.pub_port,
                })
            }
            MsgKind::DirectoryReply => {
                require(bytes, DIRECTORY_REPLY_HEADER_SIZE)?;
                let header: DirectoryReplyRaw = wire().deserialize_from(&mut cursor)?;
                require(
                    bytes,
                    variable_len(
                        DIRECTORY_REPLY_HEADER_SIZE,
                        &[(header.peer_count, PEER_RECORD_SIZE)],
                    ),
                )?;
                let peers = (0..header.peer_count)
                    .map(|_| {
                        wire()
                            .deserialize_from::<_, PeerRecord>(&mut cursor)
                            .map(PeerEndpoint::from)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Message::DirectoryReply(DirectoryReply {
                    my_id: header.my_id,
                    peers,
                })
            }
            MsgKind::P2pPlayer => {
                require(bytes, P2P_PLAYER_SIZE)?;
                let raw: P2pPlayerRaw = wire().deserialize_from(&mut cursor)?;
                Message::P2pPlayer(P2pPlayer {
                    tick: raw.header.tick,
                    player_id: raw.player_id,
                    x: raw.x,
                    y: raw.y,
                    vx: raw.vx,
                    vy: raw.vy,
                    facing: raw.facing,
                    anim: raw.anim,
                })
            }
            MsgKind::P2pWorld => {
                require(bytes, P2P_WORLD_HEADER_SIZE)?;
                let header: P2pWorldRaw = wire().deserialize_from(&mut cursor)?;
                require(
                    bytes,
                    variable_len(
                        P2P_WORLD_HEADER_SIZE,
                        &[(header.platform_count, PLATFORM_RECORD_SIZE)],
                    ),
                )?;
                let platforms = (0..header.platform_count)
                    .map(|_| wire().deserialize_from(&mut cursor))
                    .collect::<Result<Vec<PlatformRecord>, _>>()?;
                Message::P2pWorld(WorldSnapshot {
                    tick: header.header.tick,
                    players: Vec::new(),
                    platforms,
                })
            }
        };

        Ok(message)
    }

    /// Decodes a reply that must be of kind `expected`
    pub fn decode_expecting(bytes: &[u8], expected: MsgKind) -> NetResult<Message> {
        let actual = peek_kind(bytes)?;
        if actual != expected {
            return Err(NetError::UnexpectedKind { expected, actual });
        }
        Self::decode(bytes)
    }
}

fn encode_pose_snapshot(out: &mut Vec<u8>, kind: u8, snapshot: &PoseSnapshot) -> NetResult<()> {
    if snapshot.others.len() > MAX_PLAYERS {
        return Err(NetError::TooManyElements {
            count: snapshot.others.len(),
            max: MAX_PLAYERS,
        });
    }
    if snapshot.platforms.len() > MAX_PLATFORMS {
        return Err(NetError::TooManyElements {
            count: snapshot.platforms.len(),
            max: MAX_PLATFORMS,
        });
    }

    let mut others = [PoseRecord::default(); MAX_PLAYERS];
    others[..snapshot.others.len()].copy_from_slice(&snapshot.others);
    let mut platforms = [PlatformRecord::default(); MAX_PLATFORMS];
    platforms[..snapshot.platforms.len()].copy_from_slice(&snapshot.platforms);

    wire().serialize_into(
        out,
        &PoseSnapshotRaw {
            kind,
            tick: snapshot.tick,
            me: snapshot.me,
            others_count: snapshot.others.len() as u32,
            platform_count: snapshot.platforms.len() as u32,
            others,
            platforms,
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform(x: f32, y: f32, vx: f32, vy: f32) -> PlatformRecord {
        PlatformRecord { x, y, vx, vy }
    }

    #[test]
    fn test_fixed_message_sizes() {
        let cases = vec![
            (Message::Hello(Hello { name: String::new() }), HELLO_SIZE),
            (
                Message::HelloAck(HelloAck {
                    assigned_id: 1,
                    cmd_port: 5555,
                    pub_port: 5556,
                }),
                HELLO_ACK_SIZE,
            ),
            (
                Message::UpdatePos(UpdatePos {
                    id: 1,
                    x: 0.0,
                    y: 0.0,
                }),
                UPDATE_POS_SIZE,
            ),
            (
                Message::PoseSnapshot(PoseSnapshot::default()),
                POSE_SNAPSHOT_SIZE,
            ),
            (
                Message::DirectoryRegister(DirectoryRegister {
                    want_list: true,
                    player_id: 3,
                    publish_port: 40000,
                }),
                DIRECTORY_REGISTER_SIZE,
            ),
            (
                Message::P2pPlayer(P2pPlayer::default()),
                P2P_PLAYER_SIZE,
            ),
            (
                Message::WorldSnapshot(WorldSnapshot::default()),
                WORLD_HEADER_SIZE,
            ),
            (
                Message::P2pWorld(WorldSnapshot::default()),
                P2P_WORLD_HEADER_SIZE,
            ),
        ];

        for (message, size) in cases {
            let bytes = message.encode().unwrap();
            assert_eq!(bytes.len(), size, "wrong size for {:?}", message.kind());
            assert_eq!(bytes[0], message.kind() as u8);
        }
    }

    #[test]
    fn test_world_snapshot_preserves_platforms_bit_for_bit() {
        let snapshot = WorldSnapshot {
            tick: 9_000_000_001,
            players: vec![PoseRecord {
                id: 4,
                x: 1.5,
                y: -2.25,
            }],
            platforms: vec![
                platform(200.0, 560.0, 220.0, 0.0),
                platform(1600.1, 816.3, -260.0, 0.0),
                platform(800.0, 200.7, 0.0, -180.0),
            ],
        };

        let bytes = Message::WorldSnapshot(snapshot.clone()).encode().unwrap();
        assert_eq!(
            bytes.len(),
            WORLD_HEADER_SIZE + POSE_RECORD_SIZE + 3 * PLATFORM_RECORD_SIZE
        );

        match Message::decode(&bytes).unwrap() {
            Message::WorldSnapshot(decoded) => {
                assert_eq!(decoded.tick, snapshot.tick);
                assert_eq!(decoded.players, snapshot.players);
                assert_eq!(decoded.platforms.len(), snapshot.platforms.len());
                for (a, b) in decoded.platforms.iter().zip(&snapshot.platforms) {
                    assert_eq!(a.x.to_bits(), b.x.to_bits());
                    assert_eq!(a.y.to_bits(), b.y.to_bits());
                    assert_eq!(a.vx.to_bits(), b.vx.to_bits());
                    assert_eq!(a.vy.to_bits(), b.vy.to_bits());
                }
            }
            other => panic!("Wrong message after decode: {:?}", other),
        }
    }

    #[test]
    fn test_short_world_snapshot_is_rejected() {
        let snapshot = WorldSnapshot {
            tick: 1,
            players: Vec::new(),
            platforms: vec![platform(1.0, 2.0, 3.0, 4.0); 2],
        };
        let bytes = Message::WorldSnapshot(snapshot).encode().unwrap();

        let result = Message::decode(&bytes[..bytes.len() - 1]);
        assert!(matches!(
            result,
            Err(NetError::Truncated {
                expected,
                actual,
            }) if expected == bytes.len() && actual == bytes.len() - 1
        ));
    }

    #[test]
    fn test_absurd_element_count_is_rejected() {
        let mut bytes = Message::P2pWorld(WorldSnapshot::default())
            .encode()
            .unwrap();
        bytes[9..13].copy_from_slice(&u32::MAX.to_le_bytes());

        assert!(matches!(
            Message::decode(&bytes),
            Err(NetError::Truncated { .. })
        ));
    }

    #[test]
    fn test_p2p_world_round_trip() {
        let snapshot = WorldSnapshot {
            tick: 77,
            players: Vec::new(),
            platforms: vec![platform(120.0, 760.0, 220.0, 0.0)],
        };
        let bytes = Message::P2pWorld(snapshot.clone()).encode().unwrap();
        assert_eq!(peek_kind(&bytes).unwrap(), MsgKind::P2pWorld);
        assert_eq!(Message::decode(&bytes).unwrap(), Message::P2pWorld(snapshot));
    }

    #[test]
    fn test_directory_reply_peer_fields_use_network_order() {
        let reply = DirectoryReply {
            my_id: 2,
            peers: vec![PeerEndpoint {
                id: 7,
                address: Ipv4Addr::new(127, 0, 0, 1),
                publish_port: 0x1234,
            }],
        };
        let bytes = Message::DirectoryReply(reply.clone()).encode().unwrap();
        assert_eq!(
            bytes.len(),
            DIRECTORY_REPLY_HEADER_SIZE + PEER_RECORD_SIZE
        );

        let record = &bytes[DIRECTORY_REPLY_HEADER_SIZE..];
        assert_eq!(&record[0..4], &7i32.to_le_bytes());
        assert_eq!(&record[4..8], &[127, 0, 0, 1]);
        assert_eq!(&record[8..10], &[0x12, 0x34]);

        assert_eq!(Message::decode(&bytes).unwrap(), Message::DirectoryReply(reply));
    }

    #[test]
    fn test_directory_register_port_stays_little_endian() {
        let bytes = Message::DirectoryRegister(DirectoryRegister {
            want_list: true,
            player_id: 5,
            publish_port: 0x1234,
        })
        .encode()
        .unwrap();

        assert_eq!(&bytes[17..19], &[0x34, 0x12]);
        match Message::decode(&bytes).unwrap() {
            Message::DirectoryRegister(register) => {
                assert!(register.want_list);
                assert_eq!(register.player_id, 5);
                assert_eq!(register.publish_port, 0x1234);
            }
            other => panic!("Wrong message after decode: {:?}", other),
        }
    }

    #[test]
    fn test_hello_carries_display_name() {
        let bytes = Message::Hello(Hello {
            name: "ridge".to_string(),
        })
        .encode()
        .unwrap();
        assert_eq!(bytes.len(), HELLO_SIZE + 5);

        match Message::decode(&bytes).unwrap() {
            Message::Hello(hello) => assert_eq!(hello.name, "ridge"),
            other => panic!("Wrong message after decode: {:?}", other),
        }

        assert!(matches!(
            Message::decode(&bytes[..HELLO_SIZE + 2]),
            Err(NetError::Truncated { .. })
        ));
    }

    #[test]
    fn test_pose_snapshot_is_bounded() {
        let snapshot = PoseSnapshot {
            tick: 3,
            me: PoseRecord {
                id: 1,
                x: 10.0,
                y: 20.0,
            },
            others: vec![
                PoseRecord {
                    id: 2,
                    x: 30.0,
                    y: 40.0,
                };
                3
            ],
            platforms: vec![platform(1.0, 1.0, 0.0, 0.0)],
        };
        let bytes = Message::PoseSnapshot(snapshot.clone()).encode().unwrap();
        assert_eq!(bytes.len(), POSE_SNAPSHOT_SIZE);
        assert_eq!(Message::decode(&bytes).unwrap(), Message::PoseSnapshot(snapshot));

        let crowded = PoseSnapshot {
            others: vec![PoseRecord::default(); MAX_PLAYERS + 1],
            ..PoseSnapshot::default()
        };
        assert!(matches!(
            Message::PoseSnapshot(crowded).encode(),
            Err(NetError::TooManyElements { count: 9, max: 8 })
        ));
    }

    #[test]
    fn test_p2p_player_round_trip_and_truncation() {
        let player = P2pPlayer {
            tick: 123_456_789,
            player_id: 3,
            x: 100.0,
            y: 200.0,
            vx: -5.0,
            vy: 9.5,
            facing: 1,
            anim: 4,
        };
        let bytes = Message::P2pPlayer(player).encode().unwrap();
        assert_eq!(Message::decode(&bytes).unwrap(), Message::P2pPlayer(player));
        assert!(matches!(
            Message::decode(&bytes[..P2P_PLAYER_SIZE - 1]),
            Err(NetError::Truncated { .. })
        ));
    }

    #[test]
    fn test_unknown_and_empty_messages() {
        assert!(matches!(
            Message::decode(&[0xEE, 1, 2, 3]),
            Err(NetError::UnknownKind(0xEE))
        ));
        assert!(matches!(
            Message::decode(&[]),
            Err(NetError::Truncated {
                expected: 1,
                actual: 0
            })
        ));
    }

    #[test]
    fn test_decode_expecting_rejects_other_kinds() {
        let ack = Message::HelloAck(HelloAck {
            assigned_id: 3,
            cmd_port: 5555,
            pub_port: 5556,
        })
        .encode()
        .unwrap();

        assert!(Message::decode_expecting(&ack, MsgKind::HelloAck).is_ok());
        assert!(matches!(
            Message::decode_expecting(&ack, MsgKind::DirectoryReply),
            Err(NetError::UnexpectedKind {
                expected: MsgKind::DirectoryReply,
                actual: MsgKind::HelloAck
            })
        ));
    }

    #[test]
    fn test_player_id_validity() {
        assert!(is_valid_id(1));
        assert!(!is_valid_id(0));
        assert!(!is_valid_id(-4));
    }
}
