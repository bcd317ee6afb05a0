//! The configuration shared by all roles of the consensus state machine.
use std::sync::Arc;

use pala_engine::EngineManager;
use pala_roles::validator;
use zksync_concurrency::time;

/// Configuration of the bft component.
#[derive(Debug)]
pub struct Config {
    /// The validator's secret key.
    pub secret_key: validator::SecretKey,
    /// The maximum size of the payload of a block, in bytes. We will
    /// reject blocks with payloads larger than this.
    pub max_payload_size: usize,
    /// The duration of the epoch liveness timeout. Rearmed whenever the
    /// freshest notarized chain extends within the current epoch.
    pub epoch_timeout: time::Duration,
    /// Engine manager.
    pub engine_manager: Arc<EngineManager>,
}

impl Config {
    /// Genesis.
    pub fn genesis(&self) -> &validator::Genesis {
        self.engine_manager.genesis()
    }

    /// The role schedule active at the given epoch.
    pub(crate) fn schedule(&self, epoch: validator::Epoch) -> validator::Schedule {
        self.engine_manager.schedule(epoch)
    }

    /// Whether this node is a voter at the given epoch.
    pub(crate) fn is_voter(&self, epoch: validator::Epoch) -> bool {
        self.schedule(epoch).is_voter(&self.secret_key.public())
    }

    /// Whether this node is a proposer (primary or standby) at the given epoch.
    pub(crate) fn is_proposer(&self, epoch: validator::Epoch) -> bool {
        self.schedule(epoch).is_proposer(&self.secret_key.public())
    }

    /// Whether this node is the primary proposer of the given epoch.
    pub(crate) fn is_primary_proposer(&self, epoch: validator::Epoch) -> bool {
        *self.schedule(epoch).primary_proposer(epoch) == self.secret_key.public()
    }

    /// Capacity of the buffer of proposals that could not be inserted yet.
    pub(crate) fn max_uninserted_proposals(&self) -> usize {
        2 * self.genesis().pipeline_depth as usize
    }
}
