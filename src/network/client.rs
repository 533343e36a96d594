//! Peer-side transport
//!
//! A peer binds its own roster endpoint before connecting, so the
//! coordinator sees the roster address as the connection source.

use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpSocket;

use super::connection::Connection;
use super::NetworkConfig;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// A bound, not yet connected, peer socket
pub struct Client {
    config: NetworkConfig,
    socket: TcpSocket,
    local_addr: SocketAddr,
}

impl Client {
    /// Bind the local peer endpoint
    pub fn bind(addr: SocketAddr, config: NetworkConfig) -> ClientResult<Self> {
        let bind_failed =
            |e: std::io::Error| ClientError::BindFailed(format!("Failed to bind to {}: {}", addr, e));

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        };
        let socket = socket.map_err(bind_failed)?;
        socket.set_reuseaddr(true).map_err(bind_failed)?;
        socket.bind(addr).map_err(bind_failed)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            config,
            socket,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connect to the coordinator
    pub async fn connect(self, server_addr: SocketAddr) -> ClientResult<Connection> {
        tracing::info!("Connecting to {} from {}", server_addr, self.local_addr);

        let stream = self.socket.connect(server_addr).await?;
        Ok(Connection::new(stream, server_addr, &self.config))
    }
}
