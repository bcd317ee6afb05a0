use assert_matches::assert_matches;
use pala_roles::validator;
use rand::Rng as _;
use zksync_concurrency::{ctx, scope, testonly::abort_on_panic};

use crate::{
    pala::{clock, testonly::UnitTestHarness},
    Target, ToNetworkMessage,
};

#[tokio::test]
async fn clock_quorum_advances_epoch() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_primary(ctx, 4).await;
        s.spawn_bg(runner.run(ctx));

        let msg = util.setup.make_clock_msg(validator::Epoch(2));
        let qc = util.process_clock_all(ctx, msg).await;

        assert_eq!(qc.msg.epoch(), validator::Epoch(2));
        qc.msg
            .verify(util.genesis(), util.setup.committee())
            .unwrap();
        assert_eq!(util.replica.local_epoch, validator::Epoch(2));

        // The epoch record was persisted and the stale bookkeeping cleared.
        assert_eq!(
            util.im_engine.stored_epoch_record().unwrap().epoch(),
            validator::Epoch(2)
        );
        assert!(util.replica.clocks_cache.is_empty());
        assert!(util.replica.votes_cache.is_empty());
        assert!(util.replica.has_voted.is_empty());
        assert!(util.replica.unvoted_proposals.is_empty());
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn clock_old_epoch() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_primary(ctx, 4).await;
        s.spawn_bg(runner.run(ctx));

        let msg = util.setup.make_clock_msg(validator::Epoch(1));
        let res = util
            .process_clock(ctx, util.setup.validator_keys[0].sign_msg(msg))
            .await;
        assert_matches!(res, Err(clock::Error::Old { current_epoch }) => {
            assert_eq!(current_epoch, validator::Epoch(1));
        });
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn clock_skipping_ahead_triggers_catch_up() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_primary(ctx, 4).await;
        s.spawn_bg(runner.run(ctx));

        let msg = util.setup.make_clock_msg(validator::Epoch(3));
        let res = util
            .process_clock(ctx, util.setup.validator_keys[0].sign_msg(msg))
            .await;
        assert_matches!(res, Err(clock::Error::Future { epoch, current_epoch }) => {
            assert_eq!(epoch, validator::Epoch(3));
            assert_eq!(current_epoch, validator::Epoch(1));
        });
        let req = util.try_recv_catch_up().unwrap();
        assert_eq!(req.epoch, validator::Epoch(3));
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn clock_duplicate_signer() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_primary(ctx, 4).await;
        s.spawn_bg(runner.run(ctx));

        let msg = util.setup.make_clock_msg(validator::Epoch(2));
        let signer = util.setup.validator_keys[0].clone();
        util.process_clock(ctx, signer.sign_msg(msg.clone()))
            .await
            .unwrap();
        let res = util.process_clock(ctx, signer.sign_msg(msg)).await;
        assert_matches!(res, Err(clock::Error::DuplicateSigner { epoch, signer: key }) => {
            assert_eq!(epoch, validator::Epoch(2));
            assert_eq!(*key, signer.public());
        });
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn clock_non_validator_signer() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_primary(ctx, 4).await;
        s.spawn_bg(runner.run(ctx));

        let msg = util.setup.make_clock_msg(validator::Epoch(2));
        let outsider: validator::SecretKey = ctx.rng().gen();
        let res = util.process_clock(ctx, outsider.sign_msg(msg)).await;
        assert_matches!(res, Err(clock::Error::NonValidatorSigner { signer }) => {
            assert_eq!(*signer, outsider.public());
        });
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn clock_notarization_forces_epoch() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_backup(ctx, 4).await;
        s.spawn_bg(runner.run(ctx));

        // A valid certificate may skip epochs entirely.
        let qc = util.setup.make_clock_notarization(validator::Epoch(3));
        util.process_clock_notarization(ctx, util.owner_key().sign_msg(qc.clone()))
            .await
            .unwrap();
        assert_eq!(util.replica.local_epoch, validator::Epoch(3));

        // Replaying it is a no-op.
        let res = util
            .process_clock_notarization(ctx, util.owner_key().sign_msg(qc))
            .await;
        assert_matches!(res, Err(clock::QcError::Old { current_epoch }) => {
            assert_eq!(current_epoch, validator::Epoch(3));
        });
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn timeout_sends_clock_to_proposers() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_backup(ctx, 4).await;
        s.spawn_bg(runner.run(ctx));

        util.process_timeout(ctx).await;

        let message = util.outbound_channel.try_recv().unwrap();
        match message {
            ToNetworkMessage::Consensus(msg) => {
                assert_eq!(msg.target, Target::Proposers);
                let clock_msg = msg.message.cast::<validator::ClockMsg>().unwrap();
                assert_eq!(clock_msg.key, util.owner_key().public());
                assert_eq!(clock_msg.msg.epoch, validator::Epoch(2));
            }
            other => panic!("unexpected outbound message: {other:?}"),
        }
        // The epoch does not advance on a lone clock message.
        assert_eq!(util.replica.local_epoch, validator::Epoch(1));
        Ok(())
    })
    .await
    .unwrap();
}
