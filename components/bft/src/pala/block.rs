use pala_engine::InsertBlockError;
use pala_roles::validator;
use zksync_concurrency::{ctx, error::Wrap};

use super::StateMachine;

/// Errors that can occur when processing a notarized-block message.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// Future epoch. Blocks beyond the local epoch are refused so that an
    /// attacker cannot flood the fork tree with far-future blocks.
    #[error("future epoch (block epoch: {epoch:?}, current epoch: {current_epoch:?})")]
    Future {
        /// Epoch of the block.
        epoch: validator::Epoch,
        /// Current epoch.
        current_epoch: validator::Epoch,
    },
    /// The chain model refused the block.
    #[error("block not inserted: {0:#}")]
    NotInserted(#[source] InsertBlockError),
    /// Internal error. Unlike other error types, this one isn't supposed to
    /// be easily recoverable.
    #[error(transparent)]
    Internal(#[from] ctx::Error),
}

impl Wrap for Error {
    fn with_wrap<C: std::fmt::Display + Send + Sync + 'static, F: FnOnce() -> C>(
        self,
        f: F,
    ) -> Self {
        match self {
            Error::Internal(err) => Error::Internal(err.with_wrap(f)),
            err => err,
        }
    }
}

impl StateMachine {
    /// Processes a Block message. Blocks arrive from peers relaying already
    /// notarized chain segments, typically while we are catching up; their
    /// validity rests on the notarizations they and their descendants carry,
    /// not on the relayer.
    pub(crate) async fn on_block(
        &mut self,
        ctx: &ctx::Ctx,
        signed_message: validator::Signed<validator::Block>,
    ) -> Result<(), Error> {
        let config = self.config.clone();
        let block = &signed_message.msg;
        let epoch = block.epoch();
        let seq = block.seq();

        if epoch > self.local_epoch {
            let current_epoch = self.local_epoch;
            // A notarized block beyond our epoch means we are lagging.
            self.request_catch_up(epoch, seq, false);
            return Err(Error::Future {
                epoch,
                current_epoch,
            });
        }

        match config.engine_manager.insert_block(ctx, block).await {
            Ok(()) => {
                tracing::debug!(seq = %seq, "received block");
                self.adopt_embedded_notarizations(ctx, block).await?;
                Ok(())
            }
            Err(InsertBlockError::Internal(err)) => Err(Error::Internal(err)),
            Err(err @ InsertBlockError::ParentMissing { .. }) => {
                self.request_catch_up(epoch, seq, false);
                Err(Error::NotInserted(err))
            }
            Err(err) => Err(Error::NotInserted(err)),
        }
    }
}
