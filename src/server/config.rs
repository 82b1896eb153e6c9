//! Relay server configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::{RelayError, Result};
use crate::protocol::constants::{DEFAULT_CLIENT_PORT, DEFAULT_HOST_PORT, MAX_FRAME_LEN};

/// Relay configuration options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the producer (raw TCP) listener binds to
    pub host_addr: SocketAddr,

    /// Address the consumer (WebSocket) listener binds to
    pub client_addr: SocketAddr,

    /// How long to wait for a newline-terminated producer handshake
    pub host_line_timeout: Duration,

    /// Extra window granted to producers that send no delimiter
    pub host_fallback_timeout: Duration,

    /// How long a consumer has to send its first message
    pub client_auth_timeout: Duration,

    /// Largest accepted frame payload, inclusive
    pub max_frame_len: u32,

    /// Frames buffered per consumer before the producer read stalls
    pub frame_queue_depth: usize,

    /// Control lines buffered per producer
    pub control_queue_depth: usize,

    /// Enable TCP_NODELAY on accepted sockets
    pub tcp_nodelay: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_HOST_PORT),
            client_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_CLIENT_PORT),
            host_line_timeout: Duration::from_secs(2),
            host_fallback_timeout: Duration::from_secs(1),
            client_auth_timeout: Duration::from_secs(5),
            max_frame_len: MAX_FRAME_LEN,
            frame_queue_depth: 32,
            control_queue_depth: 64,
            tcp_nodelay: true, // Frames should not sit in Nagle buffers
        }
    }
}

impl RelayConfig {
    /// Build a config from the environment
    ///
    /// `HOST_HOST`/`HOST_PORT` override the producer bind address,
    /// `WS_HOST`/`WS_PORT` the consumer one. Unset variables keep their
    /// defaults; malformed values are an error, never a silent fallback.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            host_addr: addr_from_env("HOST_HOST", "HOST_PORT", defaults.host_addr)?,
            client_addr: addr_from_env("WS_HOST", "WS_PORT", defaults.client_addr)?,
            ..defaults
        })
    }

    /// Set the producer bind address
    pub fn host_addr(mut self, addr: SocketAddr) -> Self {
        self.host_addr = addr;
        self
    }

    /// Set the consumer bind address
    pub fn client_addr(mut self, addr: SocketAddr) -> Self {
        self.client_addr = addr;
        self
    }

    /// Set the producer line-handshake timeout
    pub fn host_line_timeout(mut self, timeout: Duration) -> Self {
        self.host_line_timeout = timeout;
        self
    }

    /// Set the producer delimiter-less handshake window
    pub fn host_fallback_timeout(mut self, timeout: Duration) -> Self {
        self.host_fallback_timeout = timeout;
        self
    }

    /// Set the consumer handshake timeout
    pub fn client_auth_timeout(mut self, timeout: Duration) -> Self {
        self.client_auth_timeout = timeout;
        self
    }

    /// Set the maximum accepted frame length
    pub fn max_frame_len(mut self, max: u32) -> Self {
        self.max_frame_len = max;
        self
    }
}

fn addr_from_env(
    host_var: &'static str,
    port_var: &'static str,
    default: SocketAddr,
) -> Result<SocketAddr> {
    let mut addr = default;
    if let Ok(value) = std::env::var(host_var) {
        let ip: IpAddr = value.parse().map_err(|_| RelayError::Config {
            var: host_var,
            reason: format!("not an ip address: {value:?}"),
        })?;
        addr.set_ip(ip);
    }
    if let Ok(value) = std::env::var(port_var) {
        let port: u16 = value.parse().map_err(|_| RelayError::Config {
            var: port_var,
            reason: format!("not a port number: {value:?}"),
        })?;
        addr.set_port(port);
    }
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();

        assert_eq!(config.host_addr.port(), DEFAULT_HOST_PORT);
        assert_eq!(config.client_addr.port(), DEFAULT_CLIENT_PORT);
        assert!(config.host_addr.ip().is_unspecified());
        assert_eq!(config.host_line_timeout, Duration::from_secs(2));
        assert_eq!(config.host_fallback_timeout, Duration::from_secs(1));
        assert_eq!(config.client_auth_timeout, Duration::from_secs(5));
        assert_eq!(config.max_frame_len, 64 * 1024 * 1024);
        assert!(config.tcp_nodelay);
    }

    #[test]
    fn test_builder_addresses() {
        let host: SocketAddr = "127.0.0.1:6000".parse().unwrap();
        let client: SocketAddr = "127.0.0.1:6001".parse().unwrap();
        let config = RelayConfig::default().host_addr(host).client_addr(client);

        assert_eq!(config.host_addr, host);
        assert_eq!(config.client_addr, client);
    }

    #[test]
    fn test_builder_timeouts() {
        let config = RelayConfig::default()
            .host_line_timeout(Duration::from_millis(100))
            .host_fallback_timeout(Duration::from_millis(50))
            .client_auth_timeout(Duration::from_millis(200));

        assert_eq!(config.host_line_timeout, Duration::from_millis(100));
        assert_eq!(config.host_fallback_timeout, Duration::from_millis(50));
        assert_eq!(config.client_auth_timeout, Duration::from_millis(200));
    }

    #[test]
    fn test_builder_max_frame_len() {
        let config = RelayConfig::default().max_frame_len(1024);

        assert_eq!(config.max_frame_len, 1024);
    }

    #[test]
    fn test_from_env_round_trip() {
        // Exercised sequentially inside one test because the process
        // environment is shared state.
        std::env::set_var("HOST_HOST", "127.0.0.1");
        std::env::set_var("HOST_PORT", "6100");
        std::env::set_var("WS_HOST", "127.0.0.1");
        std::env::set_var("WS_PORT", "6101");

        let config = RelayConfig::from_env().unwrap();
        assert_eq!(config.host_addr, "127.0.0.1:6100".parse().unwrap());
        assert_eq!(config.client_addr, "127.0.0.1:6101".parse().unwrap());

        std::env::set_var("HOST_PORT", "not-a-port");
        let err = RelayConfig::from_env().unwrap_err();
        assert!(matches!(
            err,
            RelayError::Config {
                var: "HOST_PORT",
                ..
            }
        ));

        std::env::remove_var("HOST_HOST");
        std::env::remove_var("HOST_PORT");
        std::env::remove_var("WS_HOST");
        std::env::remove_var("WS_PORT");

        let config = RelayConfig::from_env().unwrap();
        assert_eq!(config.host_addr.port(), DEFAULT_HOST_PORT);
        assert_eq!(config.client_addr.port(), DEFAULT_CLIENT_PORT);
    }
}
