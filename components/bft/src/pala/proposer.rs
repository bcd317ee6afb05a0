use std::{collections::BTreeSet, sync::Arc};

use pala_roles::validator;
use zksync_concurrency::{ctx, error::Wrap as _, scope, sync};

use crate::{metrics, Config, ConsensusInputMessage, Target, ToNetworkMessage};

/// A block-production session. Published by the replica once the primary
/// proposer of `epoch` has fully reconciled against the voter set; cleared
/// again when the epoch is abandoned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Production {
    /// Epoch to produce blocks for.
    pub(crate) epoch: validator::Epoch,
}

/// The proposer loop produces blocks whenever a production session is
/// active. It watches the session channel set by the replica and runs one
/// pipelined production stream per session, cancelling it as soon as the
/// session changes.
pub(crate) async fn run_proposer(
    ctx: &ctx::Ctx,
    cfg: Arc<Config>,
    outbound_channel: ctx::channel::UnboundedSender<ToNetworkMessage>,
    mut production_watch: sync::watch::Receiver<Option<Production>>,
) -> ctx::Result<()> {
    loop {
        // Wait for a production session to start.
        let Some(production) = sync::changed(ctx, &mut production_watch).await?.clone() else {
            continue;
        };

        // Only the primary proposer of the session's epoch produces blocks.
        if !cfg.is_primary_proposer(production.epoch) {
            continue;
        }

        let mut session_watch = production_watch.clone();
        let res = scope::run!(ctx, |ctx, s| async {
            // Cancel the production stream once the session changes.
            s.spawn_bg::<()>(async {
                sync::wait_for(ctx, &mut session_watch, |current| {
                    current.as_ref() != Some(&production)
                })
                .await?;
                Err(ctx::Canceled.into())
            });
            produce_blocks(ctx, &cfg, &outbound_channel, production.epoch).await
        })
        .await;

        match res {
            Ok(()) | Err(ctx::Error::Canceled(_)) => {}
            Err(ctx::Error::Internal(err)) => {
                tracing::error!("run_proposer(): internal error: {err:#}");
                return Err(ctx::Error::Internal(err));
            }
        }
    }
}

/// Produces a pipelined stream of blocks for the given epoch, throttled by
/// the pipelining window over the freshest notarized tail. Runs until
/// cancelled.
async fn produce_blocks(
    ctx: &ctx::Ctx,
    cfg: &Config,
    outbound_channel: &ctx::channel::UnboundedSender<ToNetworkMessage>,
    epoch: validator::Epoch,
) -> ctx::Result<()> {
    let k = cfg.genesis().pipeline_depth;
    let mut chain = cfg.engine_manager.subscribe();

    let mut seq = validator::Sequence::first(epoch);
    let mut parent = chain.borrow().freshest_hash();
    // Sequences whose notarizations were already piggybacked this session.
    let mut embedded: BTreeSet<validator::Sequence> = BTreeSet::new();

    loop {
        // Pipelining throttle: at most K proposals ahead of the freshest
        // notarized tail.
        sync::wait_for(ctx, &mut chain, |chain| {
            let tail = chain.freshest();
            seq.serial <= k || (tail.epoch == epoch && seq.serial <= tail.serial + k)
        })
        .await?;

        // The first block of the epoch extends whatever tail the
        // reconciliation settled on.
        if seq.is_first() {
            parent = chain.borrow().freshest_hash();
        }

        let payload = cfg
            .engine_manager
            .propose_payload(ctx, seq)
            .await
            .wrap("propose_payload()")?;
        if payload.len() > cfg.max_payload_size {
            return Err(anyhow::format_err!(
                "proposed payload too large: got {}B, max {}B",
                payload.len(),
                cfg.max_payload_size
            )
            .into());
        }
        metrics::METRICS
            .proposal_payload_size
            .observe(payload.len());

        // Piggyback notarizations that became available since the previous
        // proposal, each at most once per session.
        let trailing = chain.borrow().trailing_notarizations(k as usize);
        let notarizations: Vec<_> = trailing
            .into_iter()
            .filter(|qc| qc.seq() < seq && embedded.insert(qc.seq()))
            .collect();

        let block = validator::Block {
            header: validator::BlockHeader {
                seq,
                parent,
                payload: payload.hash(),
            },
            payload,
            notarizations,
        };
        parent = block.hash();

        tracing::debug!(seq = %seq, "proposing block");
        let msg = cfg
            .secret_key
            .sign_msg(validator::ConsensusMsg::Proposal(validator::Proposal {
                block,
            }));
        outbound_channel.send(ToNetworkMessage::Consensus(ConsensusInputMessage {
            message: msg,
            target: Target::Broadcast,
        }));

        seq = seq.next();
    }
}
