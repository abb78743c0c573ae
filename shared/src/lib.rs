//! Types and plumbing shared by the server services and the client stack
//!
//! - [`protocol`]: binary wire format of every message
//! - [`transport`]: request/reply/publish/subscribe datagram endpoints
//! - [`platform`]: moving platform simulation run by whoever holds authority
//! - [`timing`]: fixed-rate scheduling for simulate and publish loops
//! - [`error`]: the error type returned across all of the above

pub mod error;
pub mod platform;
pub mod protocol;
pub mod timing;
pub mod transport;

pub use error::{NetError, NetResult};
pub use platform::{Axis, Bounds, PlatformLayout, PlatformState, PlatformWorld};
pub use protocol::{
    is_valid_id, DirectoryRegister, DirectoryReply, Hello, HelloAck, Message, MsgKind,
    P2pPlayer, PeerEndpoint, PlatformRecord, PlayerId, PoseRecord, PoseSnapshot, UpdatePos,
    WorldSnapshot, MAX_DATAGRAM, MAX_PLATFORMS, MAX_PLAYERS,
};
pub use timing::FixedRate;
pub use transport::{SocketRole, Transport, UdpTransport};

/// Request/response port of the ID and handshake service
pub const HANDSHAKE_PORT: u16 = 5555;
/// Publish port of the central world simulator
pub const WORLD_PORT: u16 = 5556;
/// Request/response port of the directory service
pub const DIRECTORY_PORT: u16 = 5557;

/// Default simulation rate of whoever holds world authority
pub const SIMULATION_HZ: f64 = 120.0;
/// Default world publish rate
pub const PUBLISH_HZ: f64 = 60.0;
