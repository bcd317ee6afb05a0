use assert_matches::assert_matches;
use pala_roles::validator;
use rand::Rng as _;
use zksync_concurrency::{ctx, scope, testonly::abort_on_panic};

use crate::pala::{testonly::UnitTestHarness, vote};

#[tokio::test]
async fn vote_quorum_yields_notarization() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_primary(ctx, 4).await;
        s.spawn_bg(runner.run(ctx));

        // The primary inserts its own proposal and aggregates its own vote.
        let proposal = util.new_proposal(ctx);
        let seq = proposal.seq();
        util.process_proposal(ctx, util.owner_key().sign_msg(proposal))
            .await
            .unwrap();

        let vote = util.setup.make_vote(&util.setup.blocks.last().unwrap().clone());
        let qc = util.process_vote_all(ctx, vote.clone()).await;

        assert_eq!(qc.msg.seq(), seq);
        assert_eq!(qc.msg.message, vote);
        qc.msg
            .verify(util.genesis(), util.setup.committee())
            .unwrap();

        // The notarization was adopted locally: the freshest chain advanced
        // and a status heartbeat went out.
        assert_eq!(util.replica.chain.borrow().freshest(), seq);
        let status = util.try_recv::<validator::PeerStatus>().unwrap();
        assert_eq!(status.msg.freshest, seq);
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn vote_old_epoch() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_primary(ctx, 4).await;
        s.spawn_bg(runner.run(ctx));

        util.setup.push_blocks(&mut ctx.rng(), 1);
        let vote = util.setup.make_vote(&util.setup.blocks[1].clone());
        util.replica.local_epoch = validator::Epoch(2);

        let res = util
            .process_vote(ctx, util.setup.validator_keys[0].sign_msg(vote))
            .await;
        assert_matches!(res, Err(vote::Error::Old { current_epoch }) => {
            assert_eq!(current_epoch, validator::Epoch(2));
        });
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn vote_future_epoch() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_primary(ctx, 4).await;
        s.spawn_bg(runner.run(ctx));

        let vote = validator::Vote {
            genesis: util.genesis().hash(),
            seq: validator::Sequence::first(validator::Epoch(3)),
            block: ctx.rng().gen(),
        };
        let res = util
            .process_vote(ctx, util.setup.validator_keys[0].sign_msg(vote))
            .await;
        assert_matches!(res, Err(vote::Error::Future { epoch, current_epoch }) => {
            assert_eq!(epoch, validator::Epoch(3));
            assert_eq!(current_epoch, validator::Epoch(1));
        });
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn vote_not_primary_proposer() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_backup(ctx, 2).await;
        s.spawn_bg(runner.run(ctx));

        util.setup.push_blocks(&mut ctx.rng(), 1);
        let vote = util.setup.make_vote(&util.setup.blocks[1].clone());
        let res = util
            .process_vote(ctx, util.owner_key().sign_msg(vote))
            .await;
        assert_matches!(res, Err(vote::Error::NotPrimaryProposer));
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn vote_non_validator_signer() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_primary(ctx, 2).await;
        s.spawn_bg(runner.run(ctx));

        let vote = validator::Vote {
            genesis: util.genesis().hash(),
            seq: validator::Sequence::first(validator::Epoch(1)),
            block: ctx.rng().gen(),
        };
        let outsider: validator::SecretKey = ctx.rng().gen();
        let res = util.process_vote(ctx, outsider.sign_msg(vote)).await;
        assert_matches!(res, Err(vote::Error::NonValidatorSigner { signer }) => {
            assert_eq!(*signer, outsider.public());
        });
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn vote_duplicate_signer() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_primary(ctx, 4).await;
        s.spawn_bg(runner.run(ctx));

        util.setup.push_blocks(&mut ctx.rng(), 1);
        let vote = util.setup.make_vote(&util.setup.blocks[1].clone());
        let voter = util
            .setup
            .validator_keys
            .iter()
            .find(|key| key.public() != util.owner_key().public())
            .unwrap()
            .clone();

        util.process_vote(ctx, voter.sign_msg(vote.clone()))
            .await
            .unwrap();
        let res = util.process_vote(ctx, voter.sign_msg(vote.clone())).await;
        assert_matches!(res, Err(vote::Error::DuplicateSigner { seq, signer }) => {
            assert_eq!(seq, vote.seq);
            assert_eq!(*signer, voter.public());
        });
        Ok(())
    })
    .await
    .unwrap();
}
