//! Coordinator side of a session
//!
//! The coordinator owns the listening transport, groups the roster peers it
//! talks to, and drives every exchange. Exactly one exchange is in flight at
//! any time, across all peers.

mod proxy;

pub use proxy::*;

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::Config;
use crate::network::{Endpoint, Server, ServerError};
use crate::protocol::{CommandError, END_OF_SESSION};

/// Coordinator errors
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Unknown group: '{0}'")]
    UnknownGroup(String),

    #[error("Could not resolve {endpoint}: {source}")]
    Resolve {
        endpoint: Endpoint,
        source: std::io::Error,
    },
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// A roster role name and the group its players join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupPair {
    pub role: &'static str,
    pub group: &'static str,
}

impl GroupPair {
    pub const fn new(role: &'static str, group: &'static str) -> Self {
        Self { role, group }
    }
}

/// Drives a session against the known peers
pub struct Coordinator {
    server: Server,
    groups: BTreeMap<String, Vec<SocketAddr>>,
}

impl Coordinator {
    pub fn new(server: Server) -> Self {
        Self {
            server,
            groups: BTreeMap::new(),
        }
    }

    /// Add every roster player whose name matches a pair to that pair's group
    pub async fn populate_groups(
        &mut self,
        config: &Config,
        pairs: &[GroupPair],
    ) -> CoordinatorResult<()> {
        for pair in pairs {
            for player in config.players_named(pair.role) {
                if player.is_coordinator() {
                    continue;
                }
                self.join_group(pair.group, &player.endpoint()).await?;
            }
        }
        tracing::debug!(
            groups = ?self.group_names().collect::<Vec<_>>(),
            "groups populated"
        );
        Ok(())
    }

    /// Resolve an endpoint and add it to a group
    pub async fn join_group(
        &mut self,
        group: &str,
        endpoint: &Endpoint,
    ) -> CoordinatorResult<SocketAddr> {
        let addr = endpoint
            .resolve()
            .await
            .map_err(|source| CoordinatorError::Resolve {
                endpoint: endpoint.clone(),
                source,
            })?;

        tracing::debug!(group, peer = %addr, "peer joined group");
        let members = self.groups.entry(group.to_string()).or_default();
        if !members.contains(&addr) {
            members.push(addr);
        }
        Ok(addr)
    }

    /// Members of a group, in roster order
    pub fn group(&self, name: &str) -> CoordinatorResult<Vec<SocketAddr>> {
        self.groups
            .get(name)
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownGroup(name.to_string()))
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Union of all group members
    pub fn known_peers(&self) -> HashSet<SocketAddr> {
        self.groups.values().flatten().copied().collect()
    }

    /// Wait until every known peer has connected
    pub async fn handshake_with_peers(&mut self) -> CoordinatorResult<()> {
        let known = self.known_peers();
        tracing::info!("Waiting for {} known peers", known.len());

        self.server.handshake_with_known(known.len(), &known).await?;

        tracing::info!("Handshake complete with {} peers", self.server.peers().count());
        Ok(())
    }

    /// Proxy for issuing commands to one registered peer
    pub fn peer(&mut self, addr: SocketAddr) -> CoordinatorResult<PeerProxy<'_>> {
        if !self.server.is_registered(&addr) {
            return Err(ServerError::UnknownPeer(addr).into());
        }
        Ok(PeerProxy::new(addr, &mut self.server))
    }

    /// Tell every peer the session is over, then close all connections
    pub async fn end_protocol(&mut self) -> CoordinatorResult<()> {
        self.server.tell_all(END_OF_SESSION).await?;
        self.server.close_all().await?;
        tracing::info!(">>> COORDINATOR ENDS <<<");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlayerConfig;
    use crate::network::{Client, NetworkConfig};
    use crate::peer::{Peer, PeerError, PeerState};
    use crate::protocol::{TunnelOp, TypedValue, ValueKind};
    use crate::session::Tunnel;
    use tokio::task::JoinHandle;
    use tokio_test::assert_ok;

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn counter_peer(start: i64) -> Peer {
        let mut peer = Peer::new();
        peer.add_tunnel(Tunnel::new("score", start));
        peer.add_tunnel(Tunnel::new("flag", false));
        peer.register("add", &[ValueKind::Int], |tunnels, args| {
            let t = tunnels
                .get_mut("score")
                .ok_or_else(|| PeerError::UnknownTunnel("score".to_string()))?;
            let sum = t.get().as_int().unwrap_or(0) + args[0].as_int().unwrap_or(0);
            t.put(sum);
            Ok(())
        });
        peer.register("raise", &[ValueKind::Bool], |tunnels, args| {
            if let Some(t) = tunnels.get_mut("flag") {
                t.put(args[0]);
            }
            Ok(())
        });
        peer
    }

    /// Bind a peer socket, connect it and serve on a task
    async fn spawn_peer(
        server_addr: SocketAddr,
        mut peer: Peer,
    ) -> (SocketAddr, JoinHandle<(Result<(), PeerError>, Peer)>) {
        let client = Client::bind(localhost(), NetworkConfig::default()).unwrap();
        let addr = client.local_addr();
        let mut conn = client.connect(server_addr).await.unwrap();

        let handle = tokio::spawn(async move {
            let result = peer.run(&mut conn).await;
            (result, peer)
        });
        (addr, handle)
    }

    fn endpoint(addr: SocketAddr) -> Endpoint {
        Endpoint::new(addr.ip().to_string(), addr.port())
    }

    #[tokio::test]
    async fn test_full_session_with_two_peers() {
        let server = Server::bind(localhost(), NetworkConfig::default()).unwrap();
        let server_addr = server.local_addr();
        let mut coordinator = Coordinator::new(server);

        let (alice, alice_task) = spawn_peer(server_addr, counter_peer(10)).await;
        let (bob, bob_task) = spawn_peer(server_addr, counter_peer(20)).await;

        coordinator.join_group("counters", &endpoint(alice)).await.unwrap();
        coordinator.join_group("counters", &endpoint(bob)).await.unwrap();
        coordinator.handshake_with_peers().await.unwrap();

        let members = coordinator.group("counters").unwrap();
        assert_eq!(members, vec![alice, bob]);

        for (i, addr) in members.iter().enumerate() {
            let mut proxy = coordinator.peer(*addr).unwrap();
            proxy
                .remote_method_call("add", &[TypedValue::Int(i as i64 + 1)])
                .await
                .unwrap();
        }

        let a = coordinator
            .peer(alice)
            .unwrap()
            .remote_tunnel_method("score", TunnelOp::Get)
            .await
            .unwrap();
        let b = coordinator
            .peer(bob)
            .unwrap()
            .remote_tunnel_method("score", TunnelOp::Take)
            .await
            .unwrap();
        assert_eq!(a, TypedValue::Int(11));
        assert_eq!(b, TypedValue::Int(22));

        let mut proxy = coordinator.peer(bob).unwrap();
        proxy
            .remote_method_call("raise", &[TypedValue::Bool(true)])
            .await
            .unwrap();
        assert_eq!(
            proxy.remote_tunnel_method("flag", TunnelOp::Get).await.unwrap(),
            TypedValue::Bool(true)
        );
        // take did not clear the score
        assert_eq!(
            proxy.remote_tunnel_method("score", TunnelOp::Get).await.unwrap(),
            TypedValue::Int(22)
        );

        assert_ok!(coordinator.end_protocol().await);

        for task in [alice_task, bob_task] {
            let (result, peer) = task.await.unwrap();
            assert_ok!(result);
            assert_eq!(peer.state(), PeerState::Closed);
        }
    }

    #[tokio::test]
    async fn test_check_tunnel_answers_ko_on_mismatch() {
        let server = Server::bind(localhost(), NetworkConfig::default()).unwrap();
        let server_addr = server.local_addr();
        let mut coordinator = Coordinator::new(server);

        let (alice, alice_task) = spawn_peer(server_addr, counter_peer(5)).await;
        coordinator.join_group("counters", &endpoint(alice)).await.unwrap();
        coordinator.handshake_with_peers().await.unwrap();

        let mut proxy = coordinator.peer(alice).unwrap();
        assert!(proxy.check_tunnel("score", TunnelOp::Get, 5i64).await.unwrap());
        assert!(!proxy.check_tunnel("score", TunnelOp::Take, 6i64).await.unwrap());
        assert!(!proxy.check_tunnel("flag", TunnelOp::Get, 5i64).await.unwrap());

        // A KO does not end the peer's session
        assert_eq!(
            proxy.remote_tunnel_method("score", TunnelOp::Get).await.unwrap(),
            TypedValue::Int(5)
        );
        assert_ok!(coordinator.end_protocol().await);

        let (result, peer) = alice_task.await.unwrap();
        assert_ok!(result);
        assert_eq!(peer.state(), PeerState::Closed);
    }

    #[tokio::test]
    async fn test_populate_groups_from_roster() {
        let server = Server::bind(localhost(), NetworkConfig::default()).unwrap();
        let mut coordinator = Coordinator::new(server);

        let config = Config {
            players: vec![
                PlayerConfig::new(0, "Tally", "127.0.0.1", 6000),
                PlayerConfig::new(1, "Voter", "127.0.0.1", 6001),
                PlayerConfig::new(2, "Voter", "127.0.0.1", 6002),
                PlayerConfig::new(3, "Auditor", "127.0.0.1", 6003),
            ],
            ..Default::default()
        };

        let pairs = [GroupPair::new("Voter", "voters"), GroupPair::new("Auditor", "audit")];
        coordinator.populate_groups(&config, &pairs).await.unwrap();

        let voters = coordinator.group("voters").unwrap();
        assert_eq!(
            voters,
            vec![
                "127.0.0.1:6001".parse::<SocketAddr>().unwrap(),
                "127.0.0.1:6002".parse().unwrap(),
            ]
        );
        assert_eq!(coordinator.group("audit").unwrap().len(), 1);
        assert_eq!(coordinator.known_peers().len(), 3);
        assert_eq!(coordinator.group_names().collect::<Vec<_>>(), vec!["audit", "voters"]);

        assert!(matches!(
            coordinator.group("nobody"),
            Err(CoordinatorError::UnknownGroup(_))
        ));
    }

    #[tokio::test]
    async fn test_peer_proxy_requires_registered_peer() {
        let server = Server::bind(localhost(), NetworkConfig::default()).unwrap();
        let mut coordinator = Coordinator::new(server);

        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert!(matches!(
            coordinator.peer(addr),
            Err(CoordinatorError::Server(ServerError::UnknownPeer(_)))
        ));
    }

    #[tokio::test]
    async fn test_unknown_tunnel_ends_peer_session() {
        let server = Server::bind(localhost(), NetworkConfig::default()).unwrap();
        let server_addr = server.local_addr();
        let mut coordinator = Coordinator::new(server);

        let (alice, alice_task) = spawn_peer(server_addr, counter_peer(0)).await;
        coordinator.join_group("counters", &endpoint(alice)).await.unwrap();
        coordinator.handshake_with_peers().await.unwrap();

        let result = coordinator
            .peer(alice)
            .unwrap()
            .remote_tunnel_method("missing", TunnelOp::Get)
            .await;
        assert!(matches!(
            result,
            Err(CoordinatorError::Server(ServerError::Connection(_)))
        ));

        let (result, _) = alice_task.await.unwrap();
        assert!(matches!(result, Err(PeerError::UnknownTunnel(_))));
    }
}
