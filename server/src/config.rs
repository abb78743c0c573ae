use shared::{PlatformLayout, DIRECTORY_PORT, HANDSHAKE_PORT, PUBLISH_HZ, SIMULATION_HZ, WORLD_PORT};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Runtime settings for the three server services
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_ip: IpAddr,
    pub handshake_port: u16,
    pub world_port: u16,
    pub directory_port: u16,
    pub simulation_hz: f64,
    pub publish_hz: f64,
    /// Directory entries not refreshed within this window are pruned
    pub directory_timeout: Duration,
    pub janitor_interval: Duration,
    /// Receive timeout of request loops; bounds how long shutdown waits
    pub poll_timeout: Duration,
    pub layout: PlatformLayout,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            handshake_port: HANDSHAKE_PORT,
            world_port: WORLD_PORT,
            directory_port: DIRECTORY_PORT,
            simulation_hz: SIMULATION_HZ,
            publish_hz: PUBLISH_HZ,
            directory_timeout: Duration::from_secs(5),
            janitor_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_millis(100),
            layout: PlatformLayout::default(),
        }
    }
}

impl ServerConfig {
    /// Loopback config on OS-assigned ports, used by tests
    pub fn ephemeral() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            handshake_port: 0,
            world_port: 0,
            directory_port: 0,
            ..Self::default()
        }
    }

    pub fn handshake_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.handshake_port)
    }

    pub fn world_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.world_port)
    }

    pub fn directory_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.directory_port)
    }
}
