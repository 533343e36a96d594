//! Ballot counting roles
//!
//! `Tally` asks every `Voter` to cast a ballot, then reads the ballots back
//! through tunnels and sums them.

use async_trait::async_trait;

use super::{CoordinatorRole, PeerRole};
use crate::coordinator::{Coordinator, CoordinatorResult, GroupPair};
use crate::peer::{Peer, PeerError, PeerResult};
use crate::protocol::{TunnelOp, TypedArg, TypedValue, ValueKind};
use crate::session::Tunnel;

const VOTERS: &str = "voters";

static TALLY_GROUPS: [GroupPair; 1] = [GroupPair::new("Voter", VOTERS)];

/// Coordinator role: collects one ballot per voter
#[derive(Debug, Default)]
pub struct Tally {
    total: Option<i64>,
    all_voted: bool,
}

impl Tally {
    /// Sum of ballots, once the session ran
    pub fn total(&self) -> Option<i64> {
        self.total
    }

    pub fn all_voted(&self) -> bool {
        self.all_voted
    }
}

#[async_trait]
impl CoordinatorRole for Tally {
    fn groups(&self) -> &'static [GroupPair] {
        &TALLY_GROUPS
    }

    async fn run(&mut self, coordinator: &mut Coordinator) -> CoordinatorResult<()> {
        let voters = coordinator.group(VOTERS)?;

        for (i, addr) in voters.iter().enumerate() {
            let mut voter = coordinator.peer(*addr)?;
            voter.remote_method_call("reset", &[]).await?;
            voter
                .remote_method_call_tagged("castVote", &[TypedArg::secure(i as i64 + 1)])
                .await?;
        }

        let mut total = 0;
        let mut all_voted = true;
        for addr in &voters {
            let mut voter = coordinator.peer(*addr)?;
            let ballot = voter.remote_tunnel_method("ballot", TunnelOp::Get).await?;
            let voted = voter.check_tunnel("voted", TunnelOp::Take, true).await?;

            total += ballot.as_int().unwrap_or(0);
            all_voted &= voted;
        }

        tracing::info!(
            "Tally: {} ballots, total {}, all voted: {}",
            voters.len(),
            total,
            all_voted
        );
        self.total = Some(total);
        self.all_voted = all_voted;
        Ok(())
    }

    fn summary(&self) -> Option<String> {
        self.total()
            .map(|total| format!("total {}, all voted: {}", total, self.all_voted()))
    }
}

/// Peer role: holds one ballot
#[derive(Debug, Default)]
pub struct Voter;

impl PeerRole for Voter {
    fn setup(&self, peer: &mut Peer) -> PeerResult<()> {
        peer.add_tunnel(Tunnel::secure("ballot", 0i64));
        peer.add_tunnel(Tunnel::new("voted", false));

        peer.register("castVote", &[ValueKind::Int], |tunnels, args| {
            let ballot = args[0].as_int().unwrap_or(0);
            if ballot < 0 {
                return Err(PeerError::HandlerFailed {
                    method: "castVote".to_string(),
                    reason: format!("negative ballot {}", ballot),
                });
            }
            for (name, value) in [("ballot", TypedValue::Int(ballot)), ("voted", TypedValue::Bool(true))] {
                tunnels
                    .get_mut(name)
                    .ok_or_else(|| PeerError::UnknownTunnel(name.to_string()))?
                    .put(value);
            }
            Ok(())
        });

        peer.register("reset", &[], |tunnels, _| {
            if let Some(t) = tunnels.get_mut("ballot") {
                t.put(0i64);
            }
            if let Some(t) = tunnels.get_mut("voted") {
                t.put(false);
            }
            Ok(())
        });

        Ok(())
    }
}
