use std::net::SocketAddr;

use super::CoordinatorResult;
use crate::network::Server;
use crate::protocol::{Command, TunnelOp, TypedArg, TypedValue, ACK};

/// Coordinator-side handle on one connected peer
pub struct PeerProxy<'a> {
    addr: SocketAddr,
    server: &'a mut Server,
}

impl<'a> PeerProxy<'a> {
    pub(crate) fn new(addr: SocketAddr, server: &'a mut Server) -> Self {
        Self { addr, server }
    }

    /// Read a tunnel on the peer.
    ///
    /// The peer acknowledges the command, then sends the typed value in an
    /// exchange of its own, which is acknowledged here.
    pub async fn remote_tunnel_method(
        &mut self,
        tunnel: &str,
        op: TunnelOp,
    ) -> CoordinatorResult<TypedValue> {
        self.send_command(&Command::tunnel(tunnel, op)).await?;

        let reply = self.server.reply_after_receive_from(&self.addr, ACK).await?;
        let value = TypedValue::decode(&reply)?;
        tracing::info!("{} TUN {}.{}() = {}", self.addr, tunnel, op, value);
        Ok(value)
    }

    /// Read a tunnel and compare it with `expected`.
    ///
    /// The peer's reply is acknowledged on a match and answered `KO`
    /// otherwise; the session goes on either way.
    pub async fn check_tunnel(
        &mut self,
        tunnel: &str,
        op: TunnelOp,
        expected: impl Into<TypedValue>,
    ) -> CoordinatorResult<bool> {
        let expected = expected.into();
        self.send_command(&Command::tunnel(tunnel, op)).await?;

        let matched = self
            .server
            .recv_then_send_if_keyword(&self.addr, &expected.encode(), ACK)
            .await?;
        tracing::info!(
            "{} TUN {}.{}() {} {}",
            self.addr,
            tunnel,
            op,
            if matched { "==" } else { "!=" },
            expected
        );
        Ok(matched)
    }

    /// Call a method on the peer; nothing comes back but the acknowledgment
    pub async fn remote_method_call(
        &mut self,
        method: &str,
        args: &[TypedValue],
    ) -> CoordinatorResult<()> {
        self.send_command(&Command::invoke(method, args)).await
    }

    /// Call a method with explicitly tagged arguments, such as secure ones
    pub async fn remote_method_call_tagged(
        &mut self,
        method: &str,
        args: &[TypedArg],
    ) -> CoordinatorResult<()> {
        self.send_command(&Command::invoke_tagged(method, args)).await
    }

    async fn send_command(&mut self, command: &Command) -> CoordinatorResult<()> {
        let ack = self.server.exchange_with(&self.addr, &command.encode()).await?;
        if ack != ACK {
            tracing::warn!("{} answered '{}' with '{}'", self.addr, command, ack);
        }
        Ok(())
    }
}
