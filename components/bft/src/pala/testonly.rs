use std::sync::Arc;

use pala_engine::{
    testonly::{in_memory, TestEngineManager},
    EngineManagerRunner,
};
use pala_roles::validator::{
    self,
    testonly::{Setup, SetupSpec},
};
use rand::Rng as _;
use zksync_concurrency::{
    ctx,
    sync::{self, prunable_mpsc},
    time,
};
use zksync_consensus_utils::enum_util::Variant;

use crate::{
    create_input_channel,
    pala::{
        block, clock, notarization, proposal, proposer, syncer, vote, StateMachine,
    },
    CatchUpRequest, Config, ConsensusInput, Provenance, ToNetworkMessage,
};

pub(crate) const MAX_PAYLOAD_SIZE: usize = 1000;
pub(crate) const PIPELINE_DEPTH: u64 = 2;

/// `UnitTestHarness` provides various utilities for unit tests.
/// It is designed to simplify the setup and execution of test cases by
/// encapsulating common testing functionality.
///
/// It should be instantiated once for every test case.
pub(crate) struct UnitTestHarness {
    pub(crate) replica: StateMachine,
    pub(crate) setup: Setup,
    pub(crate) outbound_channel: ctx::channel::UnboundedReceiver<ToNetworkMessage>,
    pub(crate) proposer_channel: sync::watch::Receiver<Option<proposer::Production>>,
    pub(crate) im_engine: in_memory::Engine,
    _inbound_channel: prunable_mpsc::Sender<ConsensusInput>,
}

impl UnitTestHarness {
    /// Creates a harness whose replica is the primary proposer of epoch 1.
    pub(crate) async fn new_as_primary(
        ctx: &ctx::Ctx,
        num_validators: usize,
    ) -> (UnitTestHarness, EngineManagerRunner) {
        let setup = Self::make_setup(ctx, num_validators);
        let primary = setup
            .genesis
            .schedule
            .primary_proposer(validator::Epoch(1))
            .clone();
        let key = setup
            .validator_keys
            .iter()
            .find(|key| key.public() == primary)
            .unwrap()
            .clone();
        Self::new_with_key(ctx, setup, key).await
    }

    /// Creates a harness whose replica is a voter but not the primary
    /// proposer of epoch 1. Requires at least two validators.
    pub(crate) async fn new_as_backup(
        ctx: &ctx::Ctx,
        num_validators: usize,
    ) -> (UnitTestHarness, EngineManagerRunner) {
        let setup = Self::make_setup(ctx, num_validators);
        let primary = setup
            .genesis
            .schedule
            .primary_proposer(validator::Epoch(1))
            .clone();
        let key = setup
            .validator_keys
            .iter()
            .find(|key| key.public() != primary)
            .unwrap()
            .clone();
        Self::new_with_key(ctx, setup, key).await
    }

    fn make_setup(ctx: &ctx::Ctx, num_validators: usize) -> Setup {
        let rng = &mut ctx.rng();
        let mut spec = SetupSpec::new(rng, num_validators);
        // A fixed window keeps the admission arithmetic in tests readable.
        spec.pipeline_depth = PIPELINE_DEPTH;
        Setup::from_spec(rng, spec)
    }

    async fn new_with_key(
        ctx: &ctx::Ctx,
        setup: Setup,
        secret_key: validator::SecretKey,
    ) -> (UnitTestHarness, EngineManagerRunner) {
        let engines = TestEngineManager::new(ctx, &setup).await;
        let (outbound_channel_send, outbound_channel_recv) = ctx::channel::unbounded();
        let (inbound_channel_send, inbound_channel_recv) = create_input_channel();
        let (proposer_sender, proposer_receiver) = sync::watch::channel(None);

        let cfg = Arc::new(Config {
            secret_key,
            max_payload_size: MAX_PAYLOAD_SIZE,
            epoch_timeout: time::Duration::milliseconds(2000),
            engine_manager: engines.engine.clone(),
        });
        let replica = StateMachine::start(
            ctx,
            cfg,
            outbound_channel_send,
            inbound_channel_recv,
            proposer_sender,
        )
        .await
        .unwrap();

        let this = UnitTestHarness {
            replica,
            setup,
            outbound_channel: outbound_channel_recv,
            proposer_channel: proposer_receiver,
            im_engine: engines.im_engine,
            _inbound_channel: inbound_channel_send,
        };
        (this, engines.runner)
    }

    pub(crate) fn genesis(&self) -> &validator::Genesis {
        self.replica.config.genesis()
    }

    pub(crate) fn owner_key(&self) -> &validator::SecretKey {
        &self.replica.config.secret_key
    }

    /// Secret key of the primary proposer of the given epoch.
    pub(crate) fn primary_key(&self, epoch: validator::Epoch) -> validator::SecretKey {
        let primary = self.genesis().schedule.primary_proposer(epoch).clone();
        self.setup
            .validator_keys
            .iter()
            .find(|key| key.public() == primary)
            .unwrap()
            .clone()
    }

    /// Extends the setup chain by one block and returns it as a proposal.
    pub(crate) fn new_proposal(&mut self, ctx: &ctx::Ctx) -> validator::Proposal {
        let rng = &mut ctx.rng();
        self.setup.push_block(rng.gen());
        validator::Proposal {
            block: self.setup.blocks.last().unwrap().clone(),
        }
    }

    pub(crate) async fn process_proposal(
        &mut self,
        ctx: &ctx::Ctx,
        msg: validator::Signed<validator::Proposal>,
    ) -> Result<(), proposal::Error> {
        let res = self.replica.on_proposal(ctx, msg, Provenance::Peer).await;
        self.replica.try_vote(ctx).await.unwrap();
        res
    }

    pub(crate) async fn process_vote(
        &mut self,
        ctx: &ctx::Ctx,
        msg: validator::Signed<validator::Vote>,
    ) -> Result<(), vote::Error> {
        let res = self.replica.on_vote(ctx, msg).await;
        self.replica.try_vote(ctx).await.unwrap();
        res
    }

    pub(crate) async fn process_notarization(
        &mut self,
        ctx: &ctx::Ctx,
        msg: validator::Signed<validator::Notarization>,
    ) -> Result<(), notarization::Error> {
        let res = self.replica.on_notarization(ctx, msg).await;
        self.replica.try_vote(ctx).await.unwrap();
        res
    }

    pub(crate) async fn process_block(
        &mut self,
        ctx: &ctx::Ctx,
        msg: validator::Signed<validator::Block>,
    ) -> Result<(), block::Error> {
        let res = self.replica.on_block(ctx, msg).await;
        self.replica.try_vote(ctx).await.unwrap();
        res
    }

    pub(crate) async fn process_clock(
        &mut self,
        ctx: &ctx::Ctx,
        msg: validator::Signed<validator::ClockMsg>,
    ) -> Result<(), clock::Error> {
        self.replica.on_clock(ctx, msg).await
    }

    pub(crate) async fn process_clock_notarization(
        &mut self,
        ctx: &ctx::Ctx,
        msg: validator::Signed<validator::ClockNotarization>,
    ) -> Result<(), clock::QcError> {
        self.replica.on_clock_notarization(ctx, msg).await
    }

    pub(crate) fn process_status(
        &mut self,
        msg: validator::Signed<validator::PeerStatus>,
    ) -> Result<(), syncer::Error> {
        self.replica.on_status(msg)
    }

    pub(crate) async fn process_timeout(&mut self, ctx: &ctx::Ctx) {
        self.replica.on_timeout(ctx).await.unwrap();
    }

    pub(crate) async fn process_sync_completed(&mut self, ctx: &ctx::Ctx, req: CatchUpRequest) {
        self.replica.on_sync_completed(ctx, req).await.unwrap();
    }

    /// Feeds votes for the given message until the quorum is reached and
    /// returns the broadcast notarization.
    pub(crate) async fn process_vote_all(
        &mut self,
        ctx: &ctx::Ctx,
        msg: validator::Vote,
    ) -> validator::Signed<validator::Notarization> {
        for key in self.setup.validator_keys.clone() {
            // The replica may have aggregated its own vote already.
            match self.process_vote(ctx, key.sign_msg(msg.clone())).await {
                Ok(()) | Err(vote::Error::DuplicateSigner { .. }) => {}
                Err(err) => panic!("on_vote: {err:#}"),
            }
            if let Some(qc) = self.try_recv::<validator::Notarization>() {
                return qc;
            }
        }
        panic!("full committee did not reach the vote quorum");
    }

    /// Feeds clock messages for the given target epoch until the quorum is
    /// reached and returns the broadcast clock notarization.
    pub(crate) async fn process_clock_all(
        &mut self,
        ctx: &ctx::Ctx,
        msg: validator::ClockMsg,
    ) -> validator::Signed<validator::ClockNotarization> {
        for key in self.setup.validator_keys.clone() {
            match self.process_clock(ctx, key.sign_msg(msg.clone())).await {
                Ok(()) | Err(clock::Error::DuplicateSigner { .. }) => {}
                Err(err) => panic!("on_clock: {err:#}"),
            }
            if let Some(qc) = self.try_recv::<validator::ClockNotarization>() {
                return qc;
            }
        }
        panic!("full committee did not reach the clock quorum");
    }

    /// Pops the next outbound consensus message of the given kind,
    /// discarding everything queued before it. Tests should consume the
    /// outbound queue in chronological order.
    pub(crate) fn try_recv<V: Variant<validator::Msg>>(
        &mut self,
    ) -> Option<validator::Signed<V>> {
        while let Some(message) = self.outbound_channel.try_recv() {
            if let ToNetworkMessage::Consensus(msg) = message {
                if let Ok(msg) = msg.message.cast() {
                    return Some(msg);
                }
            }
        }
        None
    }

    /// Pops the next outbound catch-up request, skipping consensus messages.
    pub(crate) fn try_recv_catch_up(&mut self) -> Option<CatchUpRequest> {
        while let Some(message) = self.outbound_channel.try_recv() {
            if let ToNetworkMessage::CatchUp(req) = message {
                return Some(req);
            }
        }
        None
    }

    /// Discards all queued outbound messages.
    pub(crate) fn drain_outbound(&mut self) {
        while self.outbound_channel.try_recv().is_some() {}
    }
}
