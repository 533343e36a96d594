//! Peer side of a session
//!
//! A peer waits for commands from the coordinator, acknowledges each one,
//! then runs it against its own method registry and tunnels:
//!
//! ```text
//! AwaitingCommand -> Dispatching -> Replying -> AwaitingCommand
//! AwaitingCommand -> Closed            (on __EOC__)
//! ```

mod registry;

pub use registry::*;

use thiserror::Error;

use crate::network::{Connection, ConnectionError};
use crate::protocol::{Command, CommandError, TypedValue, ValueKind, ACK, KO};
use crate::session::{Tunnel, TunnelSet};

/// Peer errors
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Unknown method: '{0}'")]
    UnknownMethod(String),

    #[error("Unknown tunnel: '{0}'")]
    UnknownTunnel(String),

    #[error("Method '{method}' expects {expected} but was called with {actual}")]
    ArgumentMismatch {
        method: String,
        expected: String,
        actual: String,
    },

    #[error("Method '{method}' failed: {reason}")]
    HandlerFailed { method: String, reason: String },
}

pub type PeerResult<T> = Result<T, PeerError>;

/// Protocol state of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    AwaitingCommand,
    Dispatching,
    Replying,
    Closed,
}

/// What the command loop does after dispatching one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing to send back beyond the acknowledgment
    Done,
    /// Send this value to the coordinator
    Reply(TypedValue),
    /// Stop the loop
    End,
}

/// Dispatcher for one peer process
pub struct Peer {
    tunnels: TunnelSet,
    methods: MethodRegistry,
    state: PeerState,
}

impl Peer {
    pub fn new() -> Self {
        Self {
            tunnels: TunnelSet::new(),
            methods: MethodRegistry::new(),
            state: PeerState::AwaitingCommand,
        }
    }

    pub fn add_tunnel(&mut self, tunnel: Tunnel) {
        if self.tunnels.contains(tunnel.name()) {
            tracing::warn!("Replacing tunnel '{}'", tunnel.name());
        }
        tracing::debug!(
            tunnel = tunnel.name(),
            value = %masked(tunnel.get(), tunnel.is_secure()),
            "added tunnel"
        );
        self.tunnels.add(tunnel);
    }

    /// Register a remotely callable method
    pub fn register<F>(&mut self, name: impl Into<String>, params: &[ValueKind], handler: F)
    where
        F: Fn(&mut TunnelSet, &[TypedValue]) -> HandlerResult + Send + Sync + 'static,
    {
        self.methods.register(name, params, handler);
    }

    pub fn tunnels(&self) -> &TunnelSet {
        &self.tunnels
    }

    pub fn methods(&self) -> &MethodRegistry {
        &self.methods
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Run one decoded command locally
    pub fn dispatch(&mut self, command: &Command) -> PeerResult<Outcome> {
        match command {
            Command::Invoke { method, args } => {
                tracing::info!(
                    "CALL {}({})",
                    method,
                    args.iter()
                        .map(|a| masked(a.value, a.is_secure()))
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                self.methods.call(method, &mut self.tunnels, args)?;
                Ok(Outcome::Done)
            }
            Command::Tunnel { name, op } => {
                let tunnel = self
                    .tunnels
                    .get(name)
                    .ok_or_else(|| PeerError::UnknownTunnel(name.to_string()))?;
                let value = tunnel.apply(*op);
                tracing::info!(
                    "TUN {}.{}() returned {}",
                    name,
                    op,
                    masked(value, tunnel.is_secure())
                );
                Ok(Outcome::Reply(value))
            }
            Command::EndOfSession => Ok(Outcome::End),
        }
    }

    /// Parse and dispatch one command line
    pub fn handle(&mut self, text: &str) -> PeerResult<Outcome> {
        let command = Command::parse(text)?;
        self.dispatch(&command)
    }

    /// Serve commands until the end of session, then close the connection.
    ///
    /// The connection is closed on error as well; the error is returned.
    pub async fn run(&mut self, conn: &mut Connection) -> PeerResult<()> {
        let served = self.serve(conn).await;
        let closed = conn.close().await;
        self.state = PeerState::Closed;

        served?;
        closed?;
        Ok(())
    }

    async fn serve(&mut self, conn: &mut Connection) -> PeerResult<()> {
        loop {
            self.state = PeerState::AwaitingCommand;
            let text = conn.reply_after_receive(ACK).await?;

            self.state = PeerState::Dispatching;
            match self.handle(&text)? {
                Outcome::Done => {}
                Outcome::Reply(value) => {
                    self.state = PeerState::Replying;
                    let ack = conn.exchange(&value.encode()).await?;
                    if ack == KO {
                        tracing::warn!("Coordinator rejected the tunnel value");
                    } else if ack != ACK {
                        tracing::warn!("Unexpected acknowledgment from coordinator: '{}'", ack);
                    }
                }
                Outcome::End => {
                    tracing::info!(">>> End Of Computation <<<");
                    return Ok(());
                }
            }
        }
    }
}

/// Literal for logging; secure values are hidden
fn masked(value: TypedValue, secure: bool) -> String {
    if secure {
        "***".to_string()
    } else {
        value.literal()
    }
}

impl Default for Peer {
    fn default() -> Self {
        Self::new()
    }
}
