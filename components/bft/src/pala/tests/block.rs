use assert_matches::assert_matches;
use pala_engine::InsertBlockError;
use pala_roles::validator;
use rand::Rng as _;
use zksync_concurrency::{ctx, scope, testonly::abort_on_panic};

use crate::pala::{block, testonly::UnitTestHarness};

#[tokio::test]
async fn block_future_epoch() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_backup(ctx, 2).await;
        s.spawn_bg(runner.run(ctx));

        let rng = &mut ctx.rng();
        util.setup.push_block_in(validator::Epoch(2), rng.gen());
        let block = util.setup.blocks.last().unwrap().clone();

        let res = util
            .process_block(ctx, util.setup.validator_keys[0].sign_msg(block.clone()))
            .await;
        assert_matches!(res, Err(block::Error::Future { epoch, current_epoch }) => {
            assert_eq!(epoch, validator::Epoch(2));
            assert_eq!(current_epoch, validator::Epoch(1));
        });
        let req = util.try_recv_catch_up().unwrap();
        assert_eq!(req.seq, block.seq());
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn block_adopts_embedded_notarizations() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_backup(ctx, 2).await;
        s.spawn_bg(runner.run(ctx));

        util.setup.push_blocks(&mut ctx.rng(), 2);
        let first = util.setup.blocks[1].clone();
        let second = util.setup.blocks[2].clone();

        util.process_block(ctx, util.setup.validator_keys[0].sign_msg(first.clone()))
            .await
            .unwrap();
        // Catch-up blocks do not go through the voting queue.
        assert!(util.replica.unvoted_proposals.is_empty());

        // The second block piggybacks the notarization of the first.
        util.process_block(ctx, util.setup.validator_keys[0].sign_msg(second))
            .await
            .unwrap();
        assert_eq!(util.replica.chain.borrow().freshest(), first.seq());
        let status = util.try_recv::<validator::PeerStatus>().unwrap();
        assert_eq!(status.msg.freshest, first.seq());
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn block_parent_missing() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_backup(ctx, 2).await;
        s.spawn_bg(runner.run(ctx));

        util.setup.push_blocks(&mut ctx.rng(), 2);
        let second = util.setup.blocks[2].clone();

        let res = util
            .process_block(ctx, util.setup.validator_keys[0].sign_msg(second.clone()))
            .await;
        assert_matches!(
            res,
            Err(block::Error::NotInserted(InsertBlockError::ParentMissing { .. }))
        );
        let req = util.try_recv_catch_up().unwrap();
        assert_eq!(req.seq, second.seq());
        Ok(())
    })
    .await
    .unwrap();
}
