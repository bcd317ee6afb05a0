use std::sync::Arc;

use pala_engine::testonly::TestEngineManager;
use pala_roles::validator::{
    self,
    testonly::{Setup, SetupSpec},
};
use zksync_concurrency::{ctx, scope, sync, testonly::abort_on_panic, time};

use crate::{
    pala::{
        proposer,
        testonly::{MAX_PAYLOAD_SIZE, PIPELINE_DEPTH},
    },
    Config, ToNetworkMessage,
};

async fn recv_proposal(
    ctx: &ctx::Ctx,
    recv: &mut ctx::channel::UnboundedReceiver<ToNetworkMessage>,
) -> ctx::Result<validator::Block> {
    loop {
        if let ToNetworkMessage::Consensus(msg) = recv.recv(ctx).await? {
            if let validator::ConsensusMsg::Proposal(proposal) = msg.message.msg {
                return Ok(proposal.block);
            }
        }
    }
}

#[tokio::test]
async fn proposer_pipelines_up_to_window() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();
    let mut spec = SetupSpec::new(rng, 1);
    spec.pipeline_depth = PIPELINE_DEPTH;
    let setup = Setup::from_spec(rng, spec);

    scope::run!(ctx, |ctx, s| async move {
        let engines = TestEngineManager::new(ctx, &setup).await;
        s.spawn_bg(engines.runner.run(ctx));

        let cfg = Arc::new(Config {
            secret_key: setup.validator_keys[0].clone(),
            max_payload_size: MAX_PAYLOAD_SIZE,
            epoch_timeout: time::Duration::milliseconds(2000),
            engine_manager: engines.engine.clone(),
        });
        let (outbound_send, mut outbound_recv) = ctx::channel::unbounded();
        let (production_send, production_recv) = sync::watch::channel(None);
        s.spawn_bg(async move {
            match proposer::run_proposer(ctx, cfg, outbound_send, production_recv).await {
                Ok(()) | Err(ctx::Error::Canceled(_)) => Ok(()),
                Err(err) => Err(err.into()),
            }
        });

        production_send.send_replace(Some(proposer::Production {
            epoch: validator::Epoch(1),
        }));

        // The proposer streams K blocks ahead of the tail, then stalls.
        let first = recv_proposal(ctx, &mut outbound_recv).await?;
        assert_eq!(first.seq(), validator::Sequence::first(validator::Epoch(1)));
        assert_eq!(first.header.parent, setup.blocks[0].hash());
        assert!(first.notarizations.is_empty());

        let second = recv_proposal(ctx, &mut outbound_recv).await?;
        assert_eq!(second.seq(), first.seq().next());
        assert_eq!(second.header.parent, first.hash());
        assert!(second.notarizations.is_empty());

        // Notarizing the first block unblocks the next proposal, which
        // piggybacks the fresh certificate.
        engines.engine.insert_block(ctx, &first).await.unwrap();
        let vote = validator::Vote {
            genesis: setup.genesis.hash(),
            seq: first.seq(),
            block: first.hash(),
        };
        let mut qc = validator::Notarization::new(vote.clone(), setup.committee());
        for key in &setup.validator_keys {
            qc.add(&key.sign_msg(vote.clone()), &setup.genesis, setup.committee())
                .unwrap();
        }
        engines.engine.adopt_notarization(ctx, &qc).await.unwrap();

        let third = recv_proposal(ctx, &mut outbound_recv).await?;
        assert_eq!(third.seq(), second.seq().next());
        assert_eq!(third.header.parent, second.hash());
        assert_eq!(third.notarizations.len(), 1);
        assert_eq!(third.notarizations[0].seq(), first.seq());
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn proposer_ignores_foreign_sessions() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();
    let mut spec = SetupSpec::new(rng, 2);
    spec.pipeline_depth = PIPELINE_DEPTH;
    let setup = Setup::from_spec(rng, spec);

    // Pick a key that is not the primary proposer of epoch 1.
    let primary = setup
        .genesis
        .schedule
        .primary_proposer(validator::Epoch(1))
        .clone();
    let backup = setup
        .validator_keys
        .iter()
        .find(|key| key.public() != primary)
        .unwrap()
        .clone();

    scope::run!(ctx, |ctx, s| async move {
        let engines = TestEngineManager::new(ctx, &setup).await;
        s.spawn_bg(engines.runner.run(ctx));

        let cfg = Arc::new(Config {
            secret_key: backup,
            max_payload_size: MAX_PAYLOAD_SIZE,
            epoch_timeout: time::Duration::milliseconds(2000),
            engine_manager: engines.engine.clone(),
        });
        let (outbound_send, outbound_recv) = ctx::channel::unbounded();
        let (production_send, production_recv) = sync::watch::channel(None);
        s.spawn_bg(async move {
            match proposer::run_proposer(ctx, cfg, outbound_send, production_recv).await {
                Ok(()) | Err(ctx::Error::Canceled(_)) => Ok(()),
                Err(err) => Err(err.into()),
            }
        });

        production_send.send_replace(Some(proposer::Production {
            epoch: validator::Epoch(1),
        }));

        // Yield long enough for a faulty proposer to have produced something.
        ctx.sleep(time::Duration::milliseconds(50)).await?;
        let mut outbound_recv = outbound_recv;
        assert!(outbound_recv.try_recv().is_none());
        Ok(())
    })
    .await
    .unwrap();
}
