use std::{collections::BTreeMap, sync::Arc};

use anyhow::Context as _;
use pala_roles::validator;
use zksync_concurrency::{ctx, error::Wrap as _, sync};

use crate::{
    block_store::{AdoptNotarizationError, ChainStore, ChainUpdate, InsertBlockError},
    metrics::{self, CHAIN_STORE},
    ChainState, EngineInterface, FinalityRule,
};

/// A wrapper around an EngineInterface which owns the in-memory fork tree,
/// the active role schedules, and the finality bookkeeping.
#[derive(Debug)]
pub struct EngineManager {
    interface: Box<dyn EngineInterface>,
    genesis: validator::Genesis,
    chain: sync::watch::Sender<ChainStore>,
    /// Role schedules by activation epoch. An election result in a block
    /// finalized at epoch `e` activates at `e + 2`, so roles for epochs up
    /// to `e + 1` are already fixed when the result lands.
    schedules: sync::watch::Sender<BTreeMap<validator::Epoch, validator::Schedule>>,
}

impl EngineManager {
    /// Epochs between a finalized election result and its activation.
    pub const ELECTION_DELAY: u64 = 2;

    /// Constructs an EngineManager. Takes ownership of the passed
    /// EngineInterface, i.e. the caller should modify the underlying
    /// storage ONLY through the constructed EngineManager. Replays the
    /// persisted chain, including any elections it finalized.
    pub async fn new(
        ctx: &ctx::Ctx,
        interface: Box<dyn EngineInterface>,
        rule: Box<dyn FinalityRule>,
    ) -> ctx::Result<(Arc<Self>, EngineManagerRunner)> {
        let genesis = interface.genesis(ctx).await.wrap("interface.genesis()")?;
        genesis.verify().context("genesis.verify()")?;

        let mut schedules = BTreeMap::new();
        schedules.insert(validator::Epoch(0), genesis.schedule.clone());

        let this = Arc::new(Self {
            chain: sync::watch::channel(ChainStore::new(&genesis, rule)).0,
            schedules: sync::watch::channel(schedules).0,
            genesis,
            interface,
        });

        let persisted = this
            .interface
            .load_chain(ctx)
            .await
            .wrap("interface.load_chain()")?;
        for (block, notarization) in persisted {
            let seq = block.seq();
            this.replay_block(ctx, block, notarization)
                .await
                .with_wrap(|| format!("replay of block {seq}"))?;
        }

        Ok((this.clone(), EngineManagerRunner(this)))
    }

    /// Genesis specification for this chain.
    pub fn genesis(&self) -> &validator::Genesis {
        &self.genesis
    }

    /// Subscribes to fork tree changes.
    pub fn subscribe(&self) -> sync::watch::Receiver<ChainStore> {
        self.chain.subscribe()
    }

    /// Current chain positions.
    pub fn state(&self) -> ChainState {
        self.chain.borrow().state()
    }

    /// The role schedule active at the given epoch.
    pub fn schedule(&self, epoch: validator::Epoch) -> validator::Schedule {
        let schedules = self.schedules.borrow();
        schedules
            .range(..=epoch)
            .next_back()
            .map(|(_, s)| s.clone())
            .unwrap_or_else(|| self.genesis.schedule.clone())
    }

    /// Verifies a notarization against the committee of its epoch.
    pub fn verify_notarization(&self, qc: &validator::Notarization) -> anyhow::Result<()> {
        let schedule = self.schedule(qc.epoch());
        qc.verify(&self.genesis, schedule.validators())
            .context("notarization.verify()")
    }

    /// Verifies a clock notarization against the committee of its epoch.
    pub fn verify_clock_notarization(
        &self,
        qc: &validator::ClockNotarization,
    ) -> anyhow::Result<()> {
        let schedule = self.schedule(qc.epoch());
        qc.verify(&self.genesis, schedule.validators())
            .context("clock_notarization.verify()")
    }

    /// Inserts a candidate block into the fork tree and persists it.
    /// Re-inserting an already-known block is an idempotent no-op.
    pub async fn insert_block(
        &self,
        ctx: &ctx::Ctx,
        block: &validator::Block,
    ) -> Result<(), InsertBlockError> {
        block
            .verify(&self.genesis)
            .map_err(|err| InsertBlockError::InvalidBlock(err.into()))?;
        let mut res = Ok(false);
        self.chain.send_if_modified(|chain| {
            match chain.try_insert(block.clone()) {
                Ok(modified) => {
                    res = Ok(modified);
                    modified
                }
                Err(err) => {
                    res = Err(err);
                    false
                }
            }
        });
        if res? {
            let t = metrics::ENGINE_INTERFACE.store_block_latency.start();
            self.interface
                .store_block(ctx, block)
                .await
                .map_err(InsertBlockError::Internal)?;
            t.observe();
            tracing::debug!(seq = %block.seq(), "inserted block");
        }
        Ok(())
    }

    /// Verifies and adopts a notarization, persisting it and propagating
    /// the consequences: freshest-chain advance, finalization, fork
    /// pruning, and election activation.
    pub async fn adopt_notarization(
        &self,
        ctx: &ctx::Ctx,
        qc: &validator::Notarization,
    ) -> Result<ChainUpdate, AdoptNotarizationError> {
        self.verify_notarization(qc)
            .map_err(AdoptNotarizationError::InvalidNotarization)?;
        self.apply_notarization(ctx, qc).await
    }

    /// Adopts an already-verified notarization.
    async fn apply_notarization(
        &self,
        ctx: &ctx::Ctx,
        qc: &validator::Notarization,
    ) -> Result<ChainUpdate, AdoptNotarizationError> {
        let mut res = Ok(crate::block_store::AdoptOutcome::default());
        self.chain.send_if_modified(|chain| {
            match chain.try_adopt(qc.clone()) {
                Ok(outcome) => {
                    let modified = outcome.modified;
                    res = Ok(outcome);
                    modified
                }
                Err(err) => {
                    res = Err(err);
                    false
                }
            }
        });
        let outcome = res?;
        if outcome.modified {
            let t = metrics::ENGINE_INTERFACE.store_notarization_latency.start();
            self.interface
                .store_notarization(ctx, qc)
                .await
                .map_err(AdoptNotarizationError::Internal)?;
            t.observe();
        }
        let mut update = outcome.update;
        if update.freshest_advanced {
            tracing::debug!(seq = %qc.seq(), "freshest notarized chain advanced");
        }
        for block in &outcome.newly_finalized {
            tracing::info!(seq = %block.seq(), "finalized block");
            let t = metrics::ENGINE_INTERFACE.election_result_latency.start();
            let elected = self
                .interface
                .election_result(ctx, block)
                .await
                .map_err(AdoptNotarizationError::Internal)?;
            t.observe();
            if let Some(schedule) = elected {
                let activation = validator::Epoch(block.epoch().0 + Self::ELECTION_DELAY);
                tracing::info!(
                    epoch = %activation,
                    "finalized an election result, new schedule activates"
                );
                self.schedules.send_modify(|schedules| {
                    schedules.insert(activation, schedule);
                });
                update.schedule_changed = true;
            }
        }
        Ok(update)
    }

    /// The durable epoch record, validated against the schedule of its
    /// epoch. An invalid record is dropped, falling back to `None`.
    pub async fn epoch_record(
        &self,
        ctx: &ctx::Ctx,
    ) -> ctx::Result<Option<validator::ClockNotarization>> {
        let t = metrics::ENGINE_INTERFACE.epoch_record_latency.start();
        let record = self
            .interface
            .epoch_record(ctx)
            .await
            .wrap("interface.epoch_record()")?;
        t.observe();
        let Some(record) = record else {
            return Ok(None);
        };
        if let Err(err) = self.verify_clock_notarization(&record) {
            tracing::warn!("ignoring invalid persisted epoch record: {err:#}");
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Replaces the durable epoch record.
    pub async fn set_epoch_record(
        &self,
        ctx: &ctx::Ctx,
        record: &validator::ClockNotarization,
    ) -> ctx::Result<()> {
        let t = metrics::ENGINE_INTERFACE.set_epoch_record_latency.start();
        self.interface
            .set_epoch_record(ctx, record)
            .await
            .wrap("interface.set_epoch_record()")?;
        t.observe();
        Ok(())
    }

    /// Verifies a proposed payload.
    pub async fn verify_payload(
        &self,
        ctx: &ctx::Ctx,
        seq: validator::Sequence,
        payload: &validator::Payload,
    ) -> ctx::Result<()> {
        let t = metrics::ENGINE_INTERFACE.verify_payload_latency.start();
        self.interface
            .verify_payload(ctx, seq, payload)
            .await
            .context("verify_payload()")?;
        t.observe();
        Ok(())
    }

    /// Proposes a payload for the next block.
    pub async fn propose_payload(
        &self,
        ctx: &ctx::Ctx,
        seq: validator::Sequence,
    ) -> ctx::Result<validator::Payload> {
        let t = metrics::ENGINE_INTERFACE.propose_payload_latency.start();
        let payload = self
            .interface
            .propose_payload(ctx, seq)
            .await
            .context("propose_payload()")?;
        t.observe();
        Ok(payload)
    }

    /// Replays a persisted block and its adopted notarization on startup.
    async fn replay_block(
        &self,
        ctx: &ctx::Ctx,
        block: validator::Block,
        notarization: Option<validator::Notarization>,
    ) -> ctx::Result<()> {
        let mut res = Ok(false);
        self.chain.send_if_modified(|chain| match chain.try_insert(block) {
            Ok(modified) => {
                res = Ok(modified);
                modified
            }
            Err(err) => {
                res = Err(err);
                false
            }
        });
        res.context("try_insert()")?;
        if let Some(qc) = notarization {
            match self.apply_notarization(ctx, &qc).await {
                Ok(_) => {}
                Err(AdoptNotarizationError::Internal(err)) => return Err(err),
                Err(err) => return Err(anyhow::Error::from(err).into()),
            }
        }
        Ok(())
    }

    fn scrape_metrics(&self) -> metrics::ChainStore {
        let m = metrics::ChainStore::default();
        let chain = self.chain.borrow();
        let state = chain.state();
        m.freshest_epoch.set(state.freshest.epoch.0);
        m.freshest_serial.set(state.freshest.serial);
        m.finalized_epoch.set(state.finalized.epoch.0);
        m.finalized_serial.set(state.finalized.serial);
        m.tree_size.set(chain.num_blocks() as u64);
        m
    }
}

/// Runner of the EngineManager background tasks.
#[must_use]
#[derive(Debug, Clone)]
pub struct EngineManagerRunner(Arc<EngineManager>);

impl EngineManagerRunner {
    /// Runs the background tasks of the EngineManager.
    pub async fn run(self, ctx: &ctx::Ctx) -> anyhow::Result<()> {
        let store_ref = Arc::downgrade(&self.0);
        let _ = CHAIN_STORE.before_scrape(move || Some(store_ref.upgrade()?.scrape_metrics()));
        ctx.canceled().await;
        Ok(())
    }
}
