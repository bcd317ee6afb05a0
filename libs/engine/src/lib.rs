//! Chain model and the boundary to the durable block storage engine.
mod block_store;
mod finality;
mod interface;
mod manager;
mod metrics;
pub mod testonly;

pub use crate::{
    block_store::{
        AdoptNotarizationError, ChainState, ChainStore, ChainUpdate, InsertBlockError,
    },
    finality::{FinalityRule, PipelinedFinality},
    interface::EngineInterface,
    manager::{EngineManager, EngineManagerRunner},
};
