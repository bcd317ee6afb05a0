use std::fmt;

use pala_roles::validator;
use zksync_concurrency::ctx;

/// Defines the interface between the consensus layer and the durable
/// block storage engine.
///
/// Implementations **must** propagate context cancellation using
/// [`ctx::Error::Canceled`].
#[async_trait::async_trait]
pub trait EngineInterface: 'static + fmt::Debug + Send + Sync {
    /// Genesis matching the current chain.
    /// Consensus code calls this method only once.
    async fn genesis(&self, ctx: &ctx::Ctx) -> ctx::Result<validator::Genesis>;

    /// Loads the persisted chain: blocks in insertion order (parents before
    /// children), each with its adopted notarization if one was stored.
    /// An empty store returns an empty vec; the genesis block is implicit.
    async fn load_chain(
        &self,
        ctx: &ctx::Ctx,
    ) -> ctx::Result<Vec<(validator::Block, Option<validator::Notarization>)>>;

    /// Persists a block. May return before the block is durably stored, but
    /// a successful call means the block will be stored eventually.
    async fn store_block(&self, ctx: &ctx::Ctx, block: &validator::Block) -> ctx::Result<()>;

    /// Persists an adopted notarization for an already-stored block,
    /// replacing any previously stored one for the same sequence.
    async fn store_notarization(
        &self,
        ctx: &ctx::Ctx,
        notarization: &validator::Notarization,
    ) -> ctx::Result<()>;

    /// The durable epoch record: the latest adopted clock notarization, if
    /// any. Used to recover the local epoch on restart.
    async fn epoch_record(&self, ctx: &ctx::Ctx)
        -> ctx::Result<Option<validator::ClockNotarization>>;

    /// Replaces the durable epoch record.
    async fn set_epoch_record(
        &self,
        ctx: &ctx::Ctx,
        record: &validator::ClockNotarization,
    ) -> ctx::Result<()>;

    /// Used by a voter to verify the payload of a proposed block.
    async fn verify_payload(
        &self,
        ctx: &ctx::Ctx,
        seq: validator::Sequence,
        payload: &validator::Payload,
    ) -> ctx::Result<()>;

    /// Used by the primary proposer to produce a payload for the next block.
    async fn propose_payload(
        &self,
        ctx: &ctx::Ctx,
        seq: validator::Sequence,
    ) -> ctx::Result<validator::Payload>;

    /// Election result carried by a block, if any. Consulted for every
    /// newly finalized block; a returned schedule activates two epochs
    /// after the block's epoch.
    async fn election_result(
        &self,
        ctx: &ctx::Ctx,
        block: &validator::Block,
    ) -> ctx::Result<Option<validator::Schedule>>;
}
