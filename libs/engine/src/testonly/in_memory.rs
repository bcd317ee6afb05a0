//! In-memory storage implementation.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use pala_roles::validator::{self, testonly::Setup};
use rand::Rng as _;
use zksync_concurrency::ctx;

use crate::EngineInterface;

/// In-memory engine.
#[derive(Clone, Debug)]
pub struct Engine(Arc<EngineInner>);

impl Engine {
    /// New in-memory engine with a random payload manager.
    pub fn new(setup: &Setup) -> Self {
        Self::new_with_payloads(setup, PayloadManager::Random(100))
    }

    /// New in-memory engine with a pending payload manager.
    pub fn new_pending(setup: &Setup) -> Self {
        Self::new_with_payloads(setup, PayloadManager::Pending)
    }

    /// New in-memory engine with a rejecting payload manager.
    pub fn new_reject(setup: &Setup) -> Self {
        Self::new_with_payloads(setup, PayloadManager::Reject)
    }

    /// New in-memory engine.
    pub fn new_with_payloads(setup: &Setup, payload_manager: PayloadManager) -> Self {
        Self(Arc::new(EngineInner {
            genesis: setup.genesis.clone(),
            blocks: Mutex::default(),
            epoch_record: Mutex::default(),
            elections: Mutex::default(),
            payload_manager,
        }))
    }

    /// Registers an election result to be reported for the given block.
    pub fn schedule_election(&self, block: validator::BlockHash, schedule: validator::Schedule) {
        self.0.elections.lock().unwrap().insert(block, schedule);
    }

    /// Dumps the stored chain.
    pub fn dump(&self) -> Vec<(validator::Block, Option<validator::Notarization>)> {
        self.0.blocks.lock().unwrap().clone()
    }

    /// The stored epoch record.
    pub fn stored_epoch_record(&self) -> Option<validator::ClockNotarization> {
        self.0.epoch_record.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl EngineInterface for Engine {
    async fn genesis(&self, _ctx: &ctx::Ctx) -> ctx::Result<validator::Genesis> {
        Ok(self.0.genesis.clone())
    }

    async fn load_chain(
        &self,
        _ctx: &ctx::Ctx,
    ) -> ctx::Result<Vec<(validator::Block, Option<validator::Notarization>)>> {
        Ok(self.0.blocks.lock().unwrap().clone())
    }

    async fn store_block(&self, _ctx: &ctx::Ctx, block: &validator::Block) -> ctx::Result<()> {
        let mut blocks = self.0.blocks.lock().unwrap();
        let hash = block.hash();
        if !blocks.iter().any(|(b, _)| b.hash() == hash) {
            blocks.push((block.clone(), None));
        }
        Ok(())
    }

    async fn store_notarization(
        &self,
        _ctx: &ctx::Ctx,
        notarization: &validator::Notarization,
    ) -> ctx::Result<()> {
        let mut blocks = self.0.blocks.lock().unwrap();
        let hash = notarization.block();
        let entry = blocks
            .iter_mut()
            .find(|(b, _)| b.hash() == hash)
            .ok_or_else(|| anyhow::format_err!("notarization for an unknown block"))?;
        entry.1 = Some(notarization.clone());
        Ok(())
    }

    async fn epoch_record(
        &self,
        _ctx: &ctx::Ctx,
    ) -> ctx::Result<Option<validator::ClockNotarization>> {
        Ok(self.0.epoch_record.lock().unwrap().clone())
    }

    async fn set_epoch_record(
        &self,
        _ctx: &ctx::Ctx,
        record: &validator::ClockNotarization,
    ) -> ctx::Result<()> {
        *self.0.epoch_record.lock().unwrap() = Some(record.clone());
        Ok(())
    }

    async fn verify_payload(
        &self,
        _ctx: &ctx::Ctx,
        _seq: validator::Sequence,
        _payload: &validator::Payload,
    ) -> ctx::Result<()> {
        self.0.payload_manager.verify()
    }

    async fn propose_payload(
        &self,
        ctx: &ctx::Ctx,
        _seq: validator::Sequence,
    ) -> ctx::Result<validator::Payload> {
        self.0.payload_manager.propose(ctx).await
    }

    async fn election_result(
        &self,
        _ctx: &ctx::Ctx,
        block: &validator::Block,
    ) -> ctx::Result<Option<validator::Schedule>> {
        Ok(self.0.elections.lock().unwrap().get(&block.hash()).cloned())
    }
}

#[derive(Debug)]
struct EngineInner {
    genesis: validator::Genesis,
    blocks: Mutex<Vec<(validator::Block, Option<validator::Notarization>)>>,
    epoch_record: Mutex<Option<validator::ClockNotarization>>,
    elections: Mutex<HashMap<validator::BlockHash, validator::Schedule>>,
    payload_manager: PayloadManager,
}

/// Payload manager for testing purposes.
#[derive(Debug)]
pub enum PayloadManager {
    /// `propose()` creates random payloads of the given size and `verify()`
    /// accepts all payloads.
    Random(usize),
    /// `propose()` blocks indefinitely and `verify()` accepts all payloads.
    Pending,
    /// `propose()` creates empty payloads and `verify()` rejects all
    /// payloads.
    Reject,
}

impl PayloadManager {
    async fn propose(&self, ctx: &ctx::Ctx) -> ctx::Result<validator::Payload> {
        match self {
            PayloadManager::Random(size) => {
                let mut payload = validator::Payload(vec![0; *size]);
                ctx.rng().fill(&mut payload.0[..]);
                Ok(payload)
            }
            PayloadManager::Pending => {
                ctx.canceled().await;
                Err(ctx::Canceled.into())
            }
            PayloadManager::Reject => Ok(validator::Payload(vec![])),
        }
    }

    fn verify(&self) -> ctx::Result<()> {
        match self {
            PayloadManager::Random(_) | PayloadManager::Pending => Ok(()),
            PayloadManager::Reject => Err(anyhow::anyhow!("invalid payload").into()),
        }
    }
}
