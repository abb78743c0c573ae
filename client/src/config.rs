use shared::{
    NetError, NetResult, PlatformLayout, DIRECTORY_PORT, HANDSHAKE_PORT, PUBLISH_HZ,
    SIMULATION_HZ, WORLD_PORT,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Environment variable naming the server host
pub const SERVER_HOST_ENV: &str = "NETMESH_SERVER_HOST";

/// Runtime settings of the client network stack
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Host name or address of the server
    pub server_host: String,
    pub handshake_port: u16,
    /// World publisher port, used when the handshake does not report one
    pub world_port: u16,
    pub directory_port: u16,
    /// Local address the client's own sockets bind to
    pub bind_ip: IpAddr,
    /// Display name sent with the handshake
    pub name: String,

    /// Handshake requests sent before giving up
    pub handshake_attempts: u32,
    /// Pause between handshake attempts
    pub handshake_interval: Duration,
    /// How long each handshake request waits for an answer
    pub handshake_timeout: Duration,
    /// Timeout of the legacy pose exchange
    pub pose_timeout: Duration,

    /// Interval between directory registrations
    pub directory_refresh: Duration,
    /// How long a directory registration waits for its reply
    pub directory_timeout: Duration,
    /// Interval between renewals of the world subscription
    pub world_renew: Duration,
    /// Receive timeout of the world subscription loop
    pub world_poll: Duration,

    /// Central snapshots older than this make the server stale
    pub server_stale_after: Duration,
    /// Silence after which a peer is no longer reported as visible
    pub peer_hide_after: Duration,
    /// Silence after which a peer leaves the table and the election
    pub peer_prune_after: Duration,

    /// Simulation rate while holding world authority
    pub simulation_hz: f64,
    /// World publish rate while holding world authority
    pub publish_hz: f64,
    /// Layout a client simulates when it takes over world authority
    pub layout: PlatformLayout,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            handshake_port: HANDSHAKE_PORT,
            world_port: WORLD_PORT,
            directory_port: DIRECTORY_PORT,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            name: "player".to_string(),
            handshake_attempts: 40,
            handshake_interval: Duration::from_millis(250),
            handshake_timeout: Duration::from_millis(500),
            pose_timeout: Duration::from_millis(100),
            directory_refresh: Duration::from_millis(500),
            directory_timeout: Duration::from_millis(200),
            world_renew: Duration::from_secs(1),
            world_poll: Duration::from_millis(100),
            server_stale_after: Duration::from_secs(1),
            peer_hide_after: Duration::from_secs(2),
            peer_prune_after: Duration::from_secs(3),
            simulation_hz: SIMULATION_HZ,
            publish_hz: PUBLISH_HZ,
            layout: PlatformLayout::default(),
        }
    }
}

impl ClientConfig {
    /// First IPv4 address `server_host` resolves to
    pub fn server_ipv4(&self) -> NetResult<Ipv4Addr> {
        (self.server_host.as_str(), self.handshake_port)
            .to_socket_addrs()?
            .find_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(*v4.ip()),
                SocketAddr::V6(_) => None,
            })
            .ok_or_else(|| NetError::UnresolvedHost(self.server_host.clone()))
    }

    /// Ephemeral port on `bind_ip`
    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_service_ports() {
        let config = ClientConfig::default();
        assert_eq!(config.handshake_port, 5555);
        assert_eq!(config.world_port, 5556);
        assert_eq!(config.directory_port, 5557);
        assert_eq!(config.handshake_attempts, 40);
    }

    #[test]
    fn test_server_ipv4_resolves_literal() {
        let config = ClientConfig {
            server_host: "10.1.2.3".to_string(),
            ..ClientConfig::default()
        };
        assert_eq!(config.server_ipv4().unwrap(), Ipv4Addr::new(10, 1, 2, 3));
    }
}
