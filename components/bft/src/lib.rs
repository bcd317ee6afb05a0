//! This crate contains the consensus component: a doubly-pipelined,
//! partially-synchronous BFT state machine in the style of PaLa. Blocks are
//! proposed up to `pipeline_depth` sequences ahead of the freshest notarized
//! tail, votes are aggregated into notarizations by the epoch's primary
//! proposer, and epochs advance through quorums of clock messages when a
//! proposer stalls.

use std::{cmp::Ordering, sync::Arc};

use anyhow::Context;
pub use config::Config;
pub use io::{
    CatchUpRequest, ConsensusInput, ConsensusInputMessage, ConsensusReq, Provenance, Target,
    ToNetworkMessage,
};
use zksync_concurrency::{
    ctx,
    error::Wrap as _,
    scope,
    sync::{self, prunable_mpsc::SelectionFunctionResult},
};

mod config;
pub mod io;
mod metrics;
/// This module contains the implementation of the Pala state machine.
mod pala;

impl Config {
    /// Starts the bft component. It will start running, processing incoming
    /// messages and sending output messages.
    pub async fn run(
        self,
        ctx: &ctx::Ctx,
        outbound_channel: ctx::channel::UnboundedSender<ToNetworkMessage>,
        inbound_channel: sync::prunable_mpsc::Receiver<ConsensusInput>,
    ) -> anyhow::Result<()> {
        self.genesis().verify().context("genesis().verify()")?;

        let cfg = Arc::new(self);
        let (proposer_sender, proposer_receiver) = sync::watch::channel(None);
        let replica = pala::StateMachine::start(
            ctx,
            cfg.clone(),
            outbound_channel.clone(),
            inbound_channel,
            proposer_sender,
        )
        .await?;

        let res = scope::run!(ctx, |ctx, s| async {
            tracing::info!("Starting consensus component {:?}", cfg.secret_key.public());

            s.spawn(async { replica.run(ctx).await.wrap("replica.run()") });
            s.spawn_bg(async {
                pala::proposer::run_proposer(ctx, cfg.clone(), outbound_channel, proposer_receiver)
                    .await
                    .wrap("run_proposer()")
            });

            Ok(())
        })
        .await;
        match res {
            Ok(()) | Err(ctx::Error::Canceled(_)) => Ok(()),
            Err(ctx::Error::Internal(err)) => Err(err),
        }
    }
}

/// Creates a new input channel for the consensus inputs.
pub fn create_input_channel() -> (
    sync::prunable_mpsc::Sender<ConsensusInput>,
    sync::prunable_mpsc::Receiver<ConsensusInput>,
) {
    sync::prunable_mpsc::channel(inbound_filter_predicate, inbound_selection_function)
}

/// Filter predicate for incoming messages.
fn inbound_filter_predicate(new: &ConsensusInput) -> bool {
    match new {
        // Verify message signature.
        ConsensusInput::Message(req) => req.msg.verify().is_ok(),
        ConsensusInput::SyncCompleted(_) => true,
    }
}

/// Selection function for incoming messages.
fn inbound_selection_function(old: &ConsensusInput, new: &ConsensusInput) -> SelectionFunctionResult {
    let (ConsensusInput::Message(old_req), ConsensusInput::Message(new_req)) = (old, new) else {
        return SelectionFunctionResult::Keep;
    };
    if old_req.msg.key != new_req.msg.key || old_req.msg.msg.label() != new_req.msg.msg.label() {
        return SelectionFunctionResult::Keep;
    }
    // Same signer and same message kind: a message for a newer epoch
    // supersedes one for an older epoch. Messages for the same epoch are
    // all kept, since e.g. votes for distinct sequences share an epoch.
    match old_req.msg.msg.epoch().cmp(&new_req.msg.msg.epoch()) {
        Ordering::Less => SelectionFunctionResult::DiscardOld,
        Ordering::Equal => SelectionFunctionResult::Keep,
        Ordering::Greater => SelectionFunctionResult::DiscardNew,
    }
}
