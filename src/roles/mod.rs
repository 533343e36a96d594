//! Role registry
//!
//! The roster names a role for every player. Roles are registered here by
//! name at startup and constructed on demand by the bootstrap.

mod vote;

pub use vote::{Tally, Voter};

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::coordinator::{Coordinator, CoordinatorResult, GroupPair};
use crate::peer::{Peer, PeerResult};

/// Application logic run by the coordinator between handshake and end of
/// protocol
#[async_trait]
pub trait CoordinatorRole: Send {
    /// Role name and group pairs used to build the known peer set
    fn groups(&self) -> &'static [GroupPair];

    /// Drive the session
    async fn run(&mut self, coordinator: &mut Coordinator) -> CoordinatorResult<()>;

    /// One-line result of the session, once `run` returned
    fn summary(&self) -> Option<String> {
        None
    }
}

/// Application setup for a peer: tunnels and callable methods
pub trait PeerRole: Send {
    fn setup(&self, peer: &mut Peer) -> PeerResult<()>;
}

/// Factory function type for coordinator roles
pub type CoordinatorFactory = fn() -> Box<dyn CoordinatorRole>;

/// Factory function type for peer roles
pub type PeerFactory = fn() -> Box<dyn PeerRole>;

/// Name to constructor mapping for both sides
#[derive(Default)]
pub struct RoleRegistry {
    coordinators: BTreeMap<&'static str, CoordinatorFactory>,
    peers: BTreeMap<&'static str, PeerFactory>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the roles shipped in this crate
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register_coordinator("Tally", || Box::new(Tally::default()));
        registry.register_peer("Voter", || Box::new(Voter));
        registry
    }

    pub fn register_coordinator(&mut self, name: &'static str, factory: CoordinatorFactory) {
        self.coordinators.insert(name, factory);
    }

    pub fn register_peer(&mut self, name: &'static str, factory: PeerFactory) {
        self.peers.insert(name, factory);
    }

    pub fn coordinator(&self, name: &str) -> Option<Box<dyn CoordinatorRole>> {
        self.coordinators.get(name).map(|factory| factory())
    }

    pub fn peer(&self, name: &str) -> Option<Box<dyn PeerRole>> {
        self.peers.get(name).map(|factory| factory())
    }

    pub fn coordinator_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.coordinators.keys().copied()
    }

    pub fn peer_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.peers.keys().copied()
    }
}
