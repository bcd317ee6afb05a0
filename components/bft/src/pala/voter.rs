use pala_roles::validator;
use zksync_concurrency::{ctx, time};

use super::{vote, StateMachine};
use crate::{ConsensusInputMessage, Target, ToNetworkMessage};

impl StateMachine {
    /// Scans `unvoted_proposals` in ascending sequence order, voting on
    /// every admissible proposal and stopping (not skipping) at the first
    /// inadmissible one. If the scan stops before the queue empties, a
    /// catch-up request targeting the blocking sequence is issued and the
    /// remainder stays queued.
    pub(crate) async fn try_vote(&mut self, ctx: &ctx::Ctx) -> ctx::Result<()> {
        let config = self.config.clone();
        if !config.is_voter(self.local_epoch) {
            return Ok(());
        }
        let k = config.genesis().pipeline_depth;

        loop {
            let (seq, parent, hash) = {
                let Some((&seq, block)) = self.unvoted_proposals.first_key_value() else {
                    return Ok(());
                };
                (seq, block.header.parent, block.hash())
            };
            let (tail, tail_hash) = {
                let chain = self.chain.borrow();
                (chain.freshest(), chain.freshest_hash())
            };

            // Entries are admitted at the local epoch, so a mismatch means
            // the epoch advanced while the entry was queued.
            if seq.epoch != self.local_epoch {
                if seq.epoch > self.local_epoch {
                    self.request_catch_up(seq.epoch, seq, false);
                }
                return Ok(());
            }

            // The first proposal of an epoch must extend the freshest
            // notarized tail exactly.
            if seq.is_first() && parent != tail_hash {
                self.request_catch_up(seq.epoch, seq, false);
                return Ok(());
            }

            // Pipelining-window admission.
            if seq.serial > k && !(tail.epoch == seq.epoch && seq.serial <= tail.serial + k) {
                self.request_catch_up(seq.epoch, seq, false);
                return Ok(());
            }

            self.unvoted_proposals.remove(&seq);

            // At most one vote per sequence per epoch lifetime. Recorded
            // before dispatch.
            if !self.has_voted.insert(seq) {
                continue;
            }

            let vote = validator::Vote {
                genesis: config.genesis().hash(),
                seq,
                block: hash,
            };
            tracing::debug!(seq = %seq, "voting");
            let msg = config.secret_key.sign_msg(validator::ConsensusMsg::Vote(vote));

            if config.is_primary_proposer(self.local_epoch) {
                // Deliver the vote locally instead of a network round-trip.
                match self.on_vote(ctx, msg.cast().unwrap()).await {
                    Ok(()) => {}
                    Err(vote::Error::Internal(err)) => return Err(err),
                    Err(err) => tracing::debug!("on_vote: {err:#}"),
                }
            } else {
                self.outbound_channel
                    .send(ToNetworkMessage::Consensus(ConsensusInputMessage {
                        message: msg,
                        target: Target::PrimaryProposer,
                    }));
            }
        }
    }

    /// Handles the expiry of the epoch liveness deadline: a voter abandons
    /// the current epoch by reliably broadcasting a clock message for the
    /// next one. Repeated timeouts re-broadcast the same message.
    pub(crate) async fn on_timeout(&mut self, ctx: &ctx::Ctx) -> ctx::Result<()> {
        let config = self.config.clone();
        let epoch_before = self.local_epoch;
        if config.is_voter(self.local_epoch) {
            let target = self.local_epoch.next();
            tracing::info!(
                epoch = %self.local_epoch,
                "no progress before the liveness deadline, abandoning epoch"
            );
            let message = validator::ClockMsg {
                genesis: config.genesis().hash(),
                epoch: target,
            };
            let msg = config
                .secret_key
                .sign_msg(validator::ConsensusMsg::ClockMsg(message));

            if config.is_proposer(self.local_epoch) {
                // Aggregate our own clock message locally.
                match self.on_clock(ctx, msg.clone().cast().unwrap()).await {
                    Ok(()) => {}
                    Err(super::clock::Error::Internal(err)) => return Err(err),
                    Err(err) => tracing::debug!("on_clock: {err:#}"),
                }
            }
            self.outbound_channel
                .send(ToNetworkMessage::Consensus(ConsensusInputMessage {
                    message: msg,
                    target: Target::Proposers,
                }));
        }

        // Aggregating our own clock message may have already advanced the
        // epoch and rearmed (or disarmed) the deadline.
        if self.local_epoch == epoch_before {
            self.epoch_timeout = time::Deadline::Finite(ctx.now() + config.epoch_timeout);
        }
        Ok(())
    }
}
