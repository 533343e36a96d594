use std::collections::HashMap;

use crate::protocol::{TunnelOp, TypedValue};

/// A named value readable by the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tunnel {
    name: String,
    value: TypedValue,
    secure: bool,
}

impl Tunnel {
    pub fn new(name: impl Into<String>, value: impl Into<TypedValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            secure: false,
        }
    }

    /// A tunnel whose value is masked in the peer's logs
    pub fn secure(name: impl Into<String>, value: impl Into<TypedValue>) -> Self {
        Self {
            secure: true,
            ..Self::new(name, value)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Current value, no side effects
    pub fn get(&self) -> TypedValue {
        self.value
    }

    /// Current value. Does not clear the tunnel and never waits, so it
    /// behaves exactly like [`Tunnel::get`].
    pub fn take(&self) -> TypedValue {
        self.value
    }

    /// Overwrite the value. Local only, never reachable from the wire.
    pub fn put(&mut self, value: impl Into<TypedValue>) {
        self.value = value.into();
    }

    pub fn apply(&self, op: TunnelOp) -> TypedValue {
        match op {
            TunnelOp::Get => self.get(),
            TunnelOp::Take => self.take(),
        }
    }
}

/// Tunnels of one peer, keyed by name
#[derive(Debug, Default)]
pub struct TunnelSet {
    tunnels: HashMap<String, Tunnel>,
}

impl TunnelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tunnel, replacing any tunnel with the same name
    pub fn add(&mut self, tunnel: Tunnel) -> Option<Tunnel> {
        self.tunnels.insert(tunnel.name.clone(), tunnel)
    }

    pub fn get(&self, name: &str) -> Option<&Tunnel> {
        self.tunnels.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Tunnel> {
        self.tunnels.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tunnels.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }
}
