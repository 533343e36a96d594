//! Coordinator-side transport
//!
//! Binds the coordinator endpoint, admits only peers whose source address is
//! on the roster, and keeps one connection per admitted peer.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket};

use super::connection::{Connection, ConnectionError};
use super::NetworkConfig;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Bind failed: {0}")]
    BindFailed(String),

    #[error("No connection registered for peer {0}")]
    UnknownPeer(SocketAddr),

    #[error("Handshake expects {expected} peers but only {known} addresses are known")]
    TooFewKnownPeers { expected: usize, known: usize },
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Listening transport owned by the coordinator
pub struct Server {
    config: NetworkConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    /// Connection registry, filled during the handshake only
    connections: BTreeMap<SocketAddr, Connection>,
}

impl Server {
    /// Bind and listen on the coordinator endpoint
    pub fn bind(addr: SocketAddr, config: NetworkConfig) -> ServerResult<Self> {
        let bind_failed =
            |e: std::io::Error| ServerError::BindFailed(format!("Failed to bind to {}: {}", addr, e));

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        };
        let socket = socket.map_err(bind_failed)?;
        socket.set_reuseaddr(true).map_err(bind_failed)?;
        socket.bind(addr).map_err(bind_failed)?;
        let listener = socket.listen(config.listen_backlog).map_err(bind_failed)?;

        let local_addr = listener.local_addr()?;
        tracing::info!("Server listening on {}", local_addr);

        Ok(Self {
            config,
            listener,
            local_addr,
            connections: BTreeMap::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `n` peers from `known` are registered.
    ///
    /// Connections from any other address are closed at once and do not
    /// count toward `n`.
    pub async fn handshake_with_known(
        &mut self,
        n: usize,
        known: &HashSet<SocketAddr>,
    ) -> ServerResult<()> {
        if n > known.len() {
            return Err(ServerError::TooFewKnownPeers {
                expected: n,
                known: known.len(),
            });
        }

        let mut remaining = n;
        while remaining > 0 {
            let (stream, addr) = self.listener.accept().await?;
            tracing::info!("Received connection from {}", addr);

            if known.contains(&addr) && !self.connections.contains_key(&addr) {
                self.connections
                    .insert(addr, Connection::new(stream, addr, &self.config));
                remaining -= 1;
                tracing::info!("{} is a known peer ({} still expected)", addr, remaining);
            } else {
                tracing::info!("Rejected connection from unknown address {}", addr);
                drop(stream);
            }
        }

        Ok(())
    }

    /// Addresses of registered peers, in order
    pub fn peers(&self) -> impl Iterator<Item = &SocketAddr> {
        self.connections.keys()
    }

    pub fn is_registered(&self, addr: &SocketAddr) -> bool {
        self.connections.contains_key(addr)
    }

    /// Registered connection for a peer
    pub fn connection_mut(&mut self, addr: &SocketAddr) -> ServerResult<&mut Connection> {
        self.connections
            .get_mut(addr)
            .ok_or(ServerError::UnknownPeer(*addr))
    }

    /// Exchange with one registered peer
    pub async fn exchange_with(&mut self, addr: &SocketAddr, payload: &str) -> ServerResult<String> {
        Ok(self.connection_mut(addr)?.exchange(payload).await?)
    }

    /// Receive from one registered peer, then answer with `payload`
    pub async fn reply_after_receive_from(
        &mut self,
        addr: &SocketAddr,
        payload: &str,
    ) -> ServerResult<String> {
        Ok(self.connection_mut(addr)?.reply_after_receive(payload).await?)
    }

    /// Receive from one registered peer, then answer `answer` if the frame
    /// equals `keyword` and `KO` otherwise
    pub async fn recv_then_send_if_keyword(
        &mut self,
        addr: &SocketAddr,
        keyword: &str,
        answer: &str,
    ) -> ServerResult<bool> {
        Ok(self.connection_mut(addr)?.reply_if_keyword(keyword, answer).await?)
    }

    /// Exchange `payload` with every registered peer in address order
    pub async fn tell_all(&mut self, payload: &str) -> ServerResult<()> {
        for conn in self.connections.values_mut() {
            conn.exchange(payload).await?;
        }
        Ok(())
    }

    /// Close every registered connection
    pub async fn close_all(&mut self) -> ServerResult<()> {
        let mut first_error = None;
        for conn in self.connections.values_mut() {
            if let Err(e) = conn.close().await {
                tracing::warn!("Failed to close connection to {}: {}", conn.remote_addr(), e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Client;
    use tokio_test::{assert_err, assert_ok};

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_bind_reports_local_addr() {
        let server = Server::bind(localhost(), NetworkConfig::default()).unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert_eq!(server.peers().count(), 0);
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        // Documentation range address, never assigned to a local interface
        let unroutable: SocketAddr = "203.0.113.1:0".parse().unwrap();
        let result = Server::bind(unroutable, NetworkConfig::default());
        assert!(matches!(result, Err(ServerError::BindFailed(_))));
    }

    #[tokio::test]
    async fn test_handshake_accepts_only_known_peers() {
        let mut server = Server::bind(localhost(), NetworkConfig::default()).unwrap();
        let server_addr = server.local_addr();

        let stranger = Client::bind(localhost(), NetworkConfig::default()).unwrap();
        let alice = Client::bind(localhost(), NetworkConfig::default()).unwrap();
        let bob = Client::bind(localhost(), NetworkConfig::default()).unwrap();

        let stranger_addr = stranger.local_addr();
        let known: HashSet<SocketAddr> = [alice.local_addr(), bob.local_addr()].into_iter().collect();

        // Unknown peer arrives first; the backlog holds all three
        let mut stranger_conn = stranger.connect(server_addr).await.unwrap();
        let _bob_conn = bob.connect(server_addr).await.unwrap();
        let _alice_conn = alice.connect(server_addr).await.unwrap();

        assert_ok!(server.handshake_with_known(2, &known).await);

        let registered: HashSet<SocketAddr> = server.peers().copied().collect();
        assert_eq!(registered, known);
        assert!(!server.is_registered(&stranger_addr));

        // The stranger sees its connection closed
        assert_err!(stranger_conn.exchange("ACK").await);
    }

    #[tokio::test]
    async fn test_handshake_stops_after_n_peers() {
        let mut server = Server::bind(localhost(), NetworkConfig::default()).unwrap();
        let server_addr = server.local_addr();

        let alice = Client::bind(localhost(), NetworkConfig::default()).unwrap();
        let bob = Client::bind(localhost(), NetworkConfig::default()).unwrap();
        let known: HashSet<SocketAddr> = [alice.local_addr(), bob.local_addr()].into_iter().collect();

        // Both known peers are waiting in the backlog
        let _alice_conn = alice.connect(server_addr).await.unwrap();
        let _bob_conn = bob.connect(server_addr).await.unwrap();

        assert_ok!(server.handshake_with_known(1, &known).await);
        let first: Vec<SocketAddr> = server.peers().copied().collect();
        assert_eq!(first.len(), 1);
        assert!(known.contains(&first[0]));

        // The other peer is still pending and is admitted by a later handshake
        assert_ok!(server.handshake_with_known(1, &known).await);
        let registered: HashSet<SocketAddr> = server.peers().copied().collect();
        assert_eq!(registered, known);
    }

    #[tokio::test]
    async fn test_handshake_with_zero_peers_returns_immediately() {
        let mut server = Server::bind(localhost(), NetworkConfig::default()).unwrap();
        server.handshake_with_known(0, &HashSet::new()).await.unwrap();
        assert_eq!(server.peers().count(), 0);
    }

    #[tokio::test]
    async fn test_handshake_rejects_impossible_count() {
        let mut server = Server::bind(localhost(), NetworkConfig::default()).unwrap();
        let result = server.handshake_with_known(1, &HashSet::new()).await;
        assert!(matches!(
            result,
            Err(ServerError::TooFewKnownPeers { expected: 1, known: 0 })
        ));
    }

    #[tokio::test]
    async fn test_exchange_with_unregistered_peer() {
        let mut server = Server::bind(localhost(), NetworkConfig::default()).unwrap();
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();

        assert!(matches!(
            server.exchange_with(&addr, "ACK").await,
            Err(ServerError::UnknownPeer(a)) if a == addr
        ));
    }

    #[tokio::test]
    async fn test_exchange_then_reply_after_receive_with_peer() {
        let mut server = Server::bind(localhost(), NetworkConfig::default()).unwrap();
        let server_addr = server.local_addr();

        let peer = Client::bind(localhost(), NetworkConfig::default()).unwrap();
        let peer_addr = peer.local_addr();
        let known: HashSet<SocketAddr> = [peer_addr].into_iter().collect();
        let mut peer_conn = peer.connect(server_addr).await.unwrap();

        assert_ok!(server.handshake_with_known(1, &known).await);

        let task = tokio::spawn(async move {
            let command = peer_conn.reply_after_receive("ACK").await.unwrap();
            let ack = peer_conn.exchange("int,42").await.unwrap();
            (command, ack)
        });

        let ack = server.exchange_with(&peer_addr, "TUN,score,get").await.unwrap();
        assert_eq!(ack, "ACK");
        let reply = server.reply_after_receive_from(&peer_addr, "ACK").await.unwrap();
        assert_eq!(reply, "int,42");

        let (command, ack) = task.await.unwrap();
        assert_eq!(command, "TUN,score,get");
        assert_eq!(ack, "ACK");
    }

    #[tokio::test]
    async fn test_recv_then_send_if_keyword() {
        let mut server = Server::bind(localhost(), NetworkConfig::default()).unwrap();
        let server_addr = server.local_addr();

        let peer = Client::bind(localhost(), NetworkConfig::default()).unwrap();
        let peer_addr = peer.local_addr();
        let known: HashSet<SocketAddr> = [peer_addr].into_iter().collect();
        let mut peer_conn = peer.connect(server_addr).await.unwrap();

        assert_ok!(server.handshake_with_known(1, &known).await);

        let task = tokio::spawn(async move {
            let matched = peer_conn.exchange("bool,True").await.unwrap();
            let missed = peer_conn.exchange("bool,False").await.unwrap();
            (matched, missed)
        });

        assert!(server
            .recv_then_send_if_keyword(&peer_addr, "bool,True", "ACK")
            .await
            .unwrap());
        assert!(!server
            .recv_then_send_if_keyword(&peer_addr, "bool,True", "ACK")
            .await
            .unwrap());

        let (matched, missed) = task.await.unwrap();
        assert_eq!(matched, "ACK");
        assert_eq!(missed, "KO");
    }

    #[tokio::test]
    async fn test_tell_all_and_close_all() {
        let mut server = Server::bind(localhost(), NetworkConfig::default()).unwrap();
        let server_addr = server.local_addr();

        let peer = Client::bind(localhost(), NetworkConfig::default()).unwrap();
        let known: HashSet<SocketAddr> = [peer.local_addr()].into_iter().collect();
        let mut peer_conn = peer.connect(server_addr).await.unwrap();

        server.handshake_with_known(1, &known).await.unwrap();

        let task = tokio::spawn(async move {
            let received = peer_conn.reply_after_receive("ACK").await.unwrap();
            let after = peer_conn.recv().await.unwrap();
            (received, after)
        });

        assert_ok!(server.tell_all("__EOC__").await);
        assert_ok!(server.close_all().await);

        let (received, after) = task.await.unwrap();
        assert_eq!(received, "__EOC__");
        assert!(after.is_none());
    }
}
