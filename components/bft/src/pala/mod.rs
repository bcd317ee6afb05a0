//! The Pala module contains the implementation of the doubly-pipelined BFT
//! consensus state machine. It is responsible for handling the logic that
//! allows us to reach agreement on blocks.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use pala_engine::{ChainStore, ChainUpdate};
use pala_roles::validator;
use zksync_concurrency::{ctx, error::Wrap as _, metrics::LatencyHistogramExt as _, sync, time};

use crate::{metrics, Config, ConsensusInput, ConsensusReq, ToNetworkMessage};

mod block;
mod clock;
mod notarization;
mod proposal;
/// The proposer module contains the block production loop.
pub(crate) mod proposer;
mod syncer;
#[cfg(test)]
pub(crate) mod testonly;
#[cfg(test)]
mod tests;
mod vote;
mod voter;

/// The StateMachine struct contains the state of the replica and implements
/// all the logic of the Pala protocol.
#[derive(Debug)]
pub(crate) struct StateMachine {
    /// Consensus configuration.
    pub(crate) config: Arc<Config>,
    /// Channel through which the replica sends network messages.
    pub(super) outbound_channel: ctx::channel::UnboundedSender<ToNetworkMessage>,
    /// Channel through which the replica receives consensus inputs.
    pub(crate) inbound_channel: sync::prunable_mpsc::Receiver<ConsensusInput>,
    /// Subscription to the engine's fork tree.
    pub(crate) chain: sync::watch::Receiver<ChainStore>,
    /// The sender part of the production watch channel. Used to enable and
    /// disable the block production loop.
    pub(crate) proposer_sender: sync::watch::Sender<Option<proposer::Production>>,

    /// The current epoch. Monotonic, forward-only.
    pub(crate) local_epoch: validator::Epoch,
    /// Sequences this node has already voted on in the current epoch.
    pub(crate) has_voted: BTreeSet<validator::Sequence>,
    /// Inserted proposals of the current epoch that are awaiting a voting
    /// decision, in sequence order.
    pub(crate) unvoted_proposals: BTreeMap<validator::Sequence, validator::Block>,
    /// Proposals that could not be inserted yet (missing ancestry or future
    /// epoch), buffered for replay once catch-up completes. Bounded; new
    /// entries are refused once full, never evicted.
    pub(crate) uninserted_proposals:
        BTreeMap<validator::Sequence, validator::Signed<validator::Proposal>>,
    /// Own proposals that have not notarized yet, kept within the recent
    /// window so that late-joining voters can fetch them.
    pub(crate) unnotarized_proposals: BTreeMap<validator::Sequence, validator::Block>,
    /// Notarizations under construction, indexed by sequence and then by
    /// the block hash being voted on.
    pub(crate) votes_cache:
        BTreeMap<validator::Sequence, HashMap<validator::BlockHash, validator::Notarization>>,
    /// Clock notarizations under construction, indexed by target epoch.
    pub(crate) clocks_cache: BTreeMap<validator::Epoch, validator::ClockNotarization>,
    /// The outstanding catch-up request, if any. New requests are coalesced
    /// into it by keeping the pointwise maximum target.
    pub(crate) pending_catch_up: Option<crate::CatchUpRequest>,

    /// The deadline for epoch progress before this node abandons the epoch.
    pub(crate) epoch_timeout: time::Deadline,
    /// Time when the current epoch started. Used for metrics.
    pub(crate) epoch_start: time::Instant,
}

impl StateMachine {
    /// Creates a new [`StateMachine`] instance. Recovers the local epoch
    /// from the persisted epoch record, falling back to the epoch of the
    /// freshest notarized tail.
    pub(crate) async fn start(
        ctx: &ctx::Ctx,
        config: Arc<Config>,
        outbound_channel: ctx::channel::UnboundedSender<ToNetworkMessage>,
        inbound_channel: sync::prunable_mpsc::Receiver<ConsensusInput>,
        proposer_sender: sync::watch::Sender<Option<proposer::Production>>,
    ) -> ctx::Result<Self> {
        let chain = config.engine_manager.subscribe();
        let record = config
            .engine_manager
            .epoch_record(ctx)
            .await
            .wrap("epoch_record()")?;
        let local_epoch = match record {
            Some(record) => record.epoch(),
            None => chain.borrow().freshest().epoch,
        }
        // Epoch 0 is reserved for genesis; operation starts at epoch 1.
        .max(validator::Epoch(1));

        let epoch_timeout = if config.is_voter(local_epoch) {
            time::Deadline::Finite(ctx.now() + config.epoch_timeout)
        } else {
            time::Deadline::Infinite
        };

        Ok(Self {
            config,
            outbound_channel,
            inbound_channel,
            chain,
            proposer_sender,
            local_epoch,
            has_voted: BTreeSet::new(),
            unvoted_proposals: BTreeMap::new(),
            uninserted_proposals: BTreeMap::new(),
            unnotarized_proposals: BTreeMap::new(),
            votes_cache: BTreeMap::new(),
            clocks_cache: BTreeMap::new(),
            pending_catch_up: None,
            epoch_timeout,
            epoch_start: ctx.now(),
        })
    }

    /// Runs a loop to process incoming inputs. This is the main entry point
    /// for the state machine; the deadline on the receive doubles as the
    /// epoch liveness timeout.
    pub(crate) async fn run(mut self, ctx: &ctx::Ctx) -> ctx::Result<()> {
        tracing::info!(epoch = %self.local_epoch, "Starting Pala replica.");
        self.epoch_start = ctx.now();
        metrics::METRICS.local_epoch.set(self.local_epoch.0);
        self.publish_status();

        // A node that (re)starts as the primary proposer reconciles against
        // every voter before producing blocks.
        if self.config.is_primary_proposer(self.local_epoch) {
            let freshest = self.chain.borrow().freshest();
            self.request_catch_up(self.local_epoch, freshest, true);
        }

        loop {
            let recv = self
                .inbound_channel
                .recv(&ctx.with_deadline(self.epoch_timeout))
                .await;

            // Check for non-timeout cancellation.
            if !ctx.is_active() {
                return Ok(());
            }

            // Check for the epoch liveness timeout.
            let Ok(input) = recv else {
                self.on_timeout(ctx).await?;
                continue;
            };

            match input {
                ConsensusInput::Message(req) => self.process_message(ctx, req).await?,
                ConsensusInput::SyncCompleted(req) => {
                    self.on_sync_completed(ctx, req).await.wrap("on_sync_completed()")?;
                }
            }
        }
    }

    /// Processes one inbound consensus message, dispatching on its kind.
    /// Every error except `Internal` is a local no-op: logged and dropped.
    async fn process_message(&mut self, ctx: &ctx::Ctx, req: ConsensusReq) -> ctx::Result<()> {
        let now = ctx.now();
        let label = match &req.msg.msg {
            validator::ConsensusMsg::Proposal(_) => {
                let res = match self
                    .on_proposal(ctx, req.msg.clone().cast().unwrap(), req.provenance)
                    .await
                    .wrap("on_proposal()")
                {
                    Ok(()) => Ok(()),
                    Err(proposal::Error::Internal(err)) => {
                        tracing::error!("on_proposal: internal error: {err:#}");
                        return Err(err);
                    }
                    Err(err @ (proposal::Error::Old { .. } | proposal::Error::BufferFull)) => {
                        tracing::debug!("on_proposal: {err:#}");
                        Err(())
                    }
                    Err(err) => {
                        tracing::warn!("on_proposal: {err:#}");
                        Err(())
                    }
                };
                metrics::ConsensusMsgLabel::Proposal.with_result(&res)
            }
            validator::ConsensusMsg::Vote(_) => {
                let res = match self
                    .on_vote(ctx, req.msg.clone().cast().unwrap())
                    .await
                    .wrap("on_vote()")
                {
                    Ok(()) => Ok(()),
                    Err(vote::Error::Internal(err)) => {
                        tracing::error!("on_vote: internal error: {err:#}");
                        return Err(err);
                    }
                    Err(err @ vote::Error::Old { .. }) => {
                        tracing::debug!("on_vote: {err:#}");
                        Err(())
                    }
                    Err(err) => {
                        tracing::warn!("on_vote: {err:#}");
                        Err(())
                    }
                };
                metrics::ConsensusMsgLabel::Vote.with_result(&res)
            }
            validator::ConsensusMsg::Notarization(_) => {
                let res = match self
                    .on_notarization(ctx, req.msg.clone().cast().unwrap())
                    .await
                    .wrap("on_notarization()")
                {
                    Ok(()) => Ok(()),
                    Err(notarization::Error::Internal(err)) => {
                        tracing::error!("on_notarization: internal error: {err:#}");
                        return Err(err);
                    }
                    Err(err @ notarization::Error::Old { .. }) => {
                        tracing::debug!("on_notarization: {err:#}");
                        Err(())
                    }
                    Err(err) => {
                        tracing::warn!("on_notarization: {err:#}");
                        Err(())
                    }
                };
                metrics::ConsensusMsgLabel::Notarization.with_result(&res)
            }
            validator::ConsensusMsg::Block(_) => {
                let res = match self
                    .on_block(ctx, req.msg.clone().cast().unwrap())
                    .await
                    .wrap("on_block()")
                {
                    Ok(()) => Ok(()),
                    Err(block::Error::Internal(err)) => {
                        tracing::error!("on_block: internal error: {err:#}");
                        return Err(err);
                    }
                    Err(err) => {
                        tracing::warn!("on_block: {err:#}");
                        Err(())
                    }
                };
                metrics::ConsensusMsgLabel::Block.with_result(&res)
            }
            validator::ConsensusMsg::ClockMsg(_) => {
                let res = match self
                    .on_clock(ctx, req.msg.clone().cast().unwrap())
                    .await
                    .wrap("on_clock()")
                {
                    Ok(()) => Ok(()),
                    Err(clock::Error::Internal(err)) => {
                        tracing::error!("on_clock: internal error: {err:#}");
                        return Err(err);
                    }
                    Err(err @ clock::Error::Old { .. }) => {
                        tracing::debug!("on_clock: {err:#}");
                        Err(())
                    }
                    Err(err) => {
                        tracing::warn!("on_clock: {err:#}");
                        Err(())
                    }
                };
                metrics::ConsensusMsgLabel::ClockMsg.with_result(&res)
            }
            validator::ConsensusMsg::ClockNotarization(_) => {
                let res = match self
                    .on_clock_notarization(ctx, req.msg.clone().cast().unwrap())
                    .await
                    .wrap("on_clock_notarization()")
                {
                    Ok(()) => Ok(()),
                    Err(clock::QcError::Internal(err)) => {
                        tracing::error!("on_clock_notarization: internal error: {err:#}");
                        return Err(err);
                    }
                    Err(err @ clock::QcError::Old { .. }) => {
                        tracing::debug!("on_clock_notarization: {err:#}");
                        Err(())
                    }
                    Err(err) => {
                        tracing::warn!("on_clock_notarization: {err:#}");
                        Err(())
                    }
                };
                metrics::ConsensusMsgLabel::ClockNotarization.with_result(&res)
            }
            validator::ConsensusMsg::Status(_) => {
                let res = match self.on_status(req.msg.clone().cast().unwrap()) {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        tracing::warn!("on_status: {err:#}");
                        Err(())
                    }
                };
                metrics::ConsensusMsgLabel::Status.with_result(&res)
            }
        };
        metrics::METRICS.message_processing_latency[&label].observe_latency(ctx.now() - now);

        // Any of the above may have unblocked the voting scan.
        self.try_vote(ctx).await.wrap("try_vote()")?;

        // Notify the network that the message has been processed.
        // Ignore sending error.
        let _ = req.ack.send(());
        Ok(())
    }

    /// Adopts the notarizations embedded in a freshly inserted block. An
    /// invalid embedded certificate is dropped without failing the block.
    pub(crate) async fn adopt_embedded_notarizations(
        &mut self,
        ctx: &ctx::Ctx,
        block: &validator::Block,
    ) -> ctx::Result<()> {
        for qc in &block.notarizations {
            match self.config.engine_manager.adopt_notarization(ctx, qc).await {
                Ok(update) => self.process_chain_update(ctx, update),
                Err(pala_engine::AdoptNotarizationError::Internal(err)) => return Err(err),
                Err(err) => {
                    tracing::debug!(seq = %qc.seq(), "embedded notarization dropped: {err:#}");
                }
            }
        }
        Ok(())
    }

    /// Propagates the consequences of a fork tree change: pruning of stale
    /// bookkeeping, timeout rearming, and the status heartbeat.
    pub(crate) fn process_chain_update(&mut self, ctx: &ctx::Ctx, update: ChainUpdate) {
        if update.schedule_changed {
            tracing::info!("finalized an election result, role schedule updated");
        }
        if update.finalized_advanced {
            let finalized = self.chain.borrow().finalized();
            self.has_voted.retain(|seq| *seq > finalized);
            self.unvoted_proposals.retain(|seq, _| *seq > finalized);
            self.uninserted_proposals.retain(|seq, _| *seq > finalized);
            self.votes_cache.retain(|seq, _| *seq > finalized);
        }
        if update.freshest_advanced {
            let k = self.config.genesis().pipeline_depth;
            {
                let chain = self.chain.borrow();
                let tail = chain.freshest();
                self.votes_cache.retain(|seq, _| !chain.is_notarized(*seq));
                self.unnotarized_proposals
                    .retain(|seq, _| within_recent_window(*seq, tail, k));
            }
            // Forward progress resets the liveness deadline.
            if self.config.is_voter(self.local_epoch) {
                self.epoch_timeout = time::Deadline::Finite(ctx.now() + self.config.epoch_timeout);
            }
            self.publish_status();
        }
    }
}

/// Whether `seq` lies above `tail - k`, i.e. within the window of sequences
/// a late-joining voter may still need.
fn within_recent_window(
    seq: validator::Sequence,
    tail: validator::Sequence,
    k: u64,
) -> bool {
    seq.epoch > tail.epoch || (seq.epoch == tail.epoch && seq.serial + k > tail.serial)
}
