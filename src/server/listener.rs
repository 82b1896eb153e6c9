//! Relay server listeners
//!
//! Owns both accept loops, producers on raw TCP and consumers on the
//! WebSocket port, and spawns one handler task per connection. Every
//! connection gets a relay-assigned id; sessions are looked up by that
//! id on cleanup, never by socket identity.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use crate::error::Result;
use crate::registry::SessionRegistry;
use crate::server::config::RelayConfig;
use crate::server::{client, host};

/// The relay server
pub struct RelayServer {
    config: RelayConfig,
    registry: Arc<SessionRegistry>,
    host_listener: TcpListener,
    client_listener: TcpListener,
    next_conn_id: AtomicU64,
}

impl RelayServer {
    /// Bind both listeners
    ///
    /// Binding happens here rather than in `run` so startup errors
    /// surface immediately and port-zero configs resolve to real
    /// addresses before any peer connects.
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        let host_listener = TcpListener::bind(config.host_addr).await?;
        let client_listener = TcpListener::bind(config.client_addr).await?;

        tracing::info!(
            host = %host_listener.local_addr()?,
            client = %client_listener.local_addr()?,
            "Relay listening"
        );

        Ok(Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            host_listener,
            client_listener,
            next_conn_id: AtomicU64::new(1),
        })
    }

    /// Address the producer listener actually bound to
    pub fn host_addr(&self) -> Result<SocketAddr> {
        Ok(self.host_listener.local_addr()?)
    }

    /// Address the consumer listener actually bound to
    pub fn client_addr(&self) -> Result<SocketAddr> {
        Ok(self.client_listener.local_addr()?)
    }

    /// Get a reference to the session registry
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Run both accept loops
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        tokio::select! {
            _ = self.accept_hosts() => {}
            _ = self.accept_clients() => {}
        }
        Ok(())
    }

    /// Run until the shutdown future resolves, then drain all sessions
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
            }
            result = self.run() => return result,
        }

        self.registry.drain().await;
        Ok(())
    }

    async fn accept_hosts(&self) {
        loop {
            match self.host_listener.accept().await {
                Ok((socket, peer_addr)) => self.spawn_host(socket, peer_addr),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept producer connection");
                }
            }
        }
    }

    async fn accept_clients(&self) {
        loop {
            match self.client_listener.accept().await {
                Ok((socket, peer_addr)) => self.spawn_client(socket, peer_addr),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept consumer connection");
                }
            }
        }
    }

    fn spawn_host(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(conn = conn_id, error = %e, "Failed to configure socket");
            return;
        }
        tracing::debug!(conn = conn_id, peer = %peer_addr, "Producer connected");

        let config = self.config.clone();
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            if let Err(e) = host::handle(conn_id, socket, peer_addr, config, registry).await {
                tracing::debug!(conn = conn_id, error = %e, "Producer connection error");
            }
            tracing::debug!(conn = conn_id, "Producer connection closed");
        });
    }

    fn spawn_client(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(conn = conn_id, error = %e, "Failed to configure socket");
            return;
        }
        tracing::debug!(conn = conn_id, peer = %peer_addr, "Consumer connected");

        let config = self.config.clone();
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            if let Err(e) = client::handle(conn_id, socket, peer_addr, config, registry).await {
                tracing::debug!(conn = conn_id, error = %e, "Consumer connection error");
            }
            tracing::debug!(conn = conn_id, "Consumer connection closed");
        });
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }
}
