use pala_roles::validator;
use zksync_concurrency::ctx;

use super::{proposal, proposer::Production, StateMachine};
use crate::{
    CatchUpRequest, ConsensusInputMessage, Provenance, Target, ToNetworkMessage,
};

/// Errors that can occur when processing a Status heartbeat.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// Status for a different chain.
    #[error("status for a different chain")]
    GenesisMismatch,
}

impl StateMachine {
    /// Issues a catch-up request towards the given target, coalescing it
    /// with the outstanding one. Requests are fire-and-forget and
    /// idempotent; re-issuing an overlapping request is harmless.
    pub(crate) fn request_catch_up(
        &mut self,
        epoch: validator::Epoch,
        seq: validator::Sequence,
        full: bool,
    ) {
        let mut req = CatchUpRequest { epoch, seq, full };
        if let Some(pending) = &self.pending_catch_up {
            if pending.covers(&req) {
                return;
            }
            req = pending.merge(&req);
        }
        tracing::debug!(epoch = %req.epoch, seq = %req.seq, full = req.full, "requesting catch-up");
        self.pending_catch_up = Some(req);
        self.outbound_channel.send(ToNetworkMessage::CatchUp(req));
    }

    /// Broadcasts this node's status heartbeat. Emitted whenever the local
    /// epoch or the freshest notarized tail advances, letting peers detect
    /// lag on either side.
    pub(crate) fn publish_status(&self) {
        let status = validator::PeerStatus {
            genesis: self.config.genesis().hash(),
            epoch: self.local_epoch,
            freshest: self.chain.borrow().freshest(),
        };
        let msg = self
            .config
            .secret_key
            .sign_msg(validator::ConsensusMsg::Status(status));
        self.outbound_channel
            .send(ToNetworkMessage::Consensus(ConsensusInputMessage {
                message: msg,
                target: Target::Broadcast,
            }));
    }

    /// Processes a Status heartbeat from a peer. A peer that is ahead of us
    /// on either axis triggers catch-up; a peer that is behind will catch
    /// up from its own heartbeat exchange.
    pub(crate) fn on_status(
        &mut self,
        signed_message: validator::Signed<validator::PeerStatus>,
    ) -> Result<(), Error> {
        let status = &signed_message.msg;
        if status.genesis != self.config.genesis().hash() {
            return Err(Error::GenesisMismatch);
        }
        let freshest = self.chain.borrow().freshest();
        if status.epoch > self.local_epoch || status.freshest > freshest {
            self.request_catch_up(
                status.epoch.max(self.local_epoch),
                status.freshest.max(freshest),
                false,
            );
        }
        Ok(())
    }

    /// Handles the completion of a catch-up request. All fetched state has
    /// already re-entered consensus as ordinary messages; what remains is
    /// to resume block production (for a primary proposer that requested a
    /// full reconciliation) and to replay buffered proposals through the
    /// reception pipeline.
    pub(crate) async fn on_sync_completed(
        &mut self,
        ctx: &ctx::Ctx,
        req: CatchUpRequest,
    ) -> ctx::Result<()> {
        tracing::debug!(epoch = %req.epoch, seq = %req.seq, full = req.full, "catch-up completed");
        if let Some(pending) = &self.pending_catch_up {
            if req.covers(pending) {
                self.pending_catch_up = None;
            }
        }

        if req.full && self.config.is_primary_proposer(self.local_epoch) {
            tracing::info!(
                epoch = %self.local_epoch,
                "reconciliation complete, enabling block production"
            );
            // Re-send the retained proposals of this epoch that are still
            // awaiting notarization, in case some voters never saw them.
            for block in self.unnotarized_proposals.values() {
                if block.seq().epoch != self.local_epoch {
                    continue;
                }
                let msg = self
                    .config
                    .secret_key
                    .sign_msg(validator::ConsensusMsg::Proposal(validator::Proposal {
                        block: block.clone(),
                    }));
                self.outbound_channel
                    .send(ToNetworkMessage::Consensus(ConsensusInputMessage {
                        message: msg,
                        target: Target::Broadcast,
                    }));
            }
            self.proposer_sender.send_replace(Some(Production {
                epoch: self.local_epoch,
            }));
        }

        if self.config.is_voter(self.local_epoch) {
            // Atomically swap the buffer out; replayed proposals that still
            // cannot be inserted re-enter it (or re-trigger catch-up).
            let buffered = std::mem::take(&mut self.uninserted_proposals);
            for (_, proposal) in buffered {
                if let Err(err) = self.on_proposal(ctx, proposal, Provenance::Peer).await {
                    match err {
                        proposal::Error::Internal(err) => return Err(err),
                        err => tracing::debug!("replaying buffered proposal: {err:#}"),
                    }
                }
            }
            self.try_vote(ctx).await?;
        }

        Ok(())
    }
}
