use assert_matches::assert_matches;
use pala_engine::InsertBlockError;
use pala_roles::validator;
use rand::Rng as _;
use zksync_concurrency::{ctx, scope, testonly::abort_on_panic};

use crate::pala::{
    proposal,
    testonly::{UnitTestHarness, MAX_PAYLOAD_SIZE},
};

#[tokio::test]
async fn proposal_yields_vote_sanity() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_backup(ctx, 2).await;
        s.spawn_bg(runner.run(ctx));

        let proposal = util.new_proposal(ctx);
        let seq = proposal.seq();
        let hash = proposal.block.hash();
        let primary = util.primary_key(seq.epoch);
        util.process_proposal(ctx, primary.sign_msg(proposal))
            .await
            .unwrap();

        // A backup voter sends its vote to the primary proposer.
        let vote = util.try_recv::<validator::Vote>().unwrap();
        assert_eq!(vote.key, util.owner_key().public());
        assert_eq!(
            vote.msg,
            validator::Vote {
                genesis: util.genesis().hash(),
                seq,
                block: hash,
            },
        );
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn proposal_non_primary_signer() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_backup(ctx, 2).await;
        s.spawn_bg(runner.run(ctx));

        let proposal = util.new_proposal(ctx);
        let res = util
            .process_proposal(ctx, util.owner_key().sign_msg(proposal))
            .await;

        assert_matches!(res, Err(proposal::Error::NonPrimaryProposer { signer }) => {
            assert_eq!(*signer, util.owner_key().public());
        });
        assert!(util.try_recv::<validator::Vote>().is_none());
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn proposal_old_epoch() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_backup(ctx, 2).await;
        s.spawn_bg(runner.run(ctx));

        let proposal = util.new_proposal(ctx);
        let primary = util.primary_key(proposal.epoch());
        util.replica.local_epoch = validator::Epoch(2);

        let res = util.process_proposal(ctx, primary.sign_msg(proposal)).await;
        assert_matches!(res, Err(proposal::Error::Old { current_epoch }) => {
            assert_eq!(current_epoch, validator::Epoch(2));
        });
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn proposal_future_epoch_buffered() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_backup(ctx, 4).await;
        s.spawn_bg(runner.run(ctx));

        let rng = &mut ctx.rng();
        util.setup.push_block_in(validator::Epoch(2), rng.gen());
        let block = util.setup.blocks.last().unwrap().clone();
        let seq = block.seq();
        let primary = util.primary_key(validator::Epoch(2));

        let res = util
            .process_proposal(ctx, primary.sign_msg(validator::Proposal { block }))
            .await;

        assert_matches!(res, Err(proposal::Error::Future { epoch, current_epoch }) => {
            assert_eq!(epoch, validator::Epoch(2));
            assert_eq!(current_epoch, validator::Epoch(1));
        });
        // The proposal is buffered for replay and a catch-up is issued.
        assert!(util.replica.uninserted_proposals.contains_key(&seq));
        let req = util.try_recv_catch_up().unwrap();
        assert_eq!(req.epoch, validator::Epoch(2));
        assert_eq!(req.seq, seq);
        assert!(!req.full);
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn proposal_buffer_full() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_backup(ctx, 4).await;
        s.spawn_bg(runner.run(ctx));

        let rng = &mut ctx.rng();
        let primary = util.primary_key(validator::Epoch(2));
        let capacity = util.replica.config.max_uninserted_proposals();
        for _ in 0..capacity {
            util.setup.push_block_in(validator::Epoch(2), rng.gen());
            let block = util.setup.blocks.last().unwrap().clone();
            let res = util
                .process_proposal(ctx, primary.sign_msg(validator::Proposal { block }))
                .await;
            assert_matches!(res, Err(proposal::Error::Future { .. }));
        }
        assert_eq!(util.replica.uninserted_proposals.len(), capacity);

        util.setup.push_block_in(validator::Epoch(2), rng.gen());
        let block = util.setup.blocks.last().unwrap().clone();
        let res = util
            .process_proposal(ctx, primary.sign_msg(validator::Proposal { block }))
            .await;
        assert_matches!(res, Err(proposal::Error::BufferFull));
        assert_eq!(util.replica.uninserted_proposals.len(), capacity);
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn proposal_payload_too_large() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_backup(ctx, 2).await;
        s.spawn_bg(runner.run(ctx));

        util.setup
            .push_block(validator::Payload(vec![0; MAX_PAYLOAD_SIZE + 1]));
        let block = util.setup.blocks.last().unwrap().clone();
        let primary = util.primary_key(block.epoch());

        let res = util
            .process_proposal(ctx, primary.sign_msg(validator::Proposal { block }))
            .await;
        assert_matches!(res, Err(proposal::Error::PayloadTooLarge { got, max }) => {
            assert_eq!(got, MAX_PAYLOAD_SIZE + 1);
            assert_eq!(max, MAX_PAYLOAD_SIZE);
        });
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn proposal_invalid_signature() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_backup(ctx, 2).await;
        s.spawn_bg(runner.run(ctx));

        let proposal = util.new_proposal(ctx);
        let primary = util.primary_key(proposal.epoch());
        let mut signed = primary.sign_msg(proposal);
        signed.sig = ctx.rng().gen();

        let res = util.process_proposal(ctx, signed).await;
        assert_matches!(res, Err(proposal::Error::InvalidSignature(_)));
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn proposal_parent_missing_buffered() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    scope::run!(ctx, |ctx, s| async {
        let (mut util, runner) = UnitTestHarness::new_as_backup(ctx, 2).await;
        s.spawn_bg(runner.run(ctx));

        // Skip the first proposal of the epoch and deliver the second.
        let _first = util.new_proposal(ctx);
        let second = util.new_proposal(ctx);
        let seq = second.seq();
        let primary = util.primary_key(seq.epoch);

        let res = util.process_proposal(ctx, primary.sign_msg(second)).await;
        assert_matches!(
            res,
            Err(proposal::Error::NotInserted(InsertBlockError::ParentMissing { .. }))
        );
        assert!(util.replica.uninserted_proposals.contains_key(&seq));
        let req = util.try_recv_catch_up().unwrap();
        assert_eq!(req.seq, seq);
        Ok(())
    })
    .await
    .unwrap();
}
