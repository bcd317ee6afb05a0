use pala_engine::AdoptNotarizationError;
use pala_roles::validator;
use zksync_concurrency::{ctx, error::Wrap};

use super::StateMachine;

/// Errors that can occur when processing a Notarization message.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// Notarization for an already finalized sequence.
    #[error("notarization for an already finalized sequence (finalized: {finalized})")]
    Old {
        /// Tail of the finalized chain.
        finalized: validator::Sequence,
    },
    /// Invalid certificate.
    #[error("invalid notarization: {0:#}")]
    InvalidMessage(#[source] anyhow::Error),
    /// The certified block is not in the fork tree.
    #[error("notarization for a missing block (sequence: {seq})")]
    MissingBlock {
        /// Sequence of the certificate.
        seq: validator::Sequence,
    },
    /// A different block is already notarized at this sequence.
    #[error("notarization conflicts with an adopted one (sequence: {seq})")]
    Conflicting {
        /// Sequence of the certificate.
        seq: validator::Sequence,
    },
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
    /// Processes a Notarization message. The certificate's validity does not
    /// depend on the relayer, so the only origin check is against the
    /// committee of the certificate's epoch.
    pub(crate) async fn on_notarization(
        &mut self,
        ctx: &ctx::Ctx,
        signed_message: validator::Signed<validator::Notarization>,
    ) -> Result<(), Error> {
        let config = self.config.clone();
        let qc = &signed_message.msg;
        let seq = qc.seq();

        let finalized = self.chain.borrow().finalized();
        if seq <= finalized {
            return Err(Error::Old { finalized });
        }

        match config.engine_manager.adopt_notarization(ctx, qc).await {
            Ok(update) => {
                tracing::debug!(seq = %seq, "received notarization");
                self.process_chain_update(ctx, update);
                Ok(())
            }
            Err(AdoptNotarizationError::Internal(err)) => Err(Error::Internal(err)),
            Err(AdoptNotarizationError::InvalidNotarization(err)) => {
                Err(Error::InvalidMessage(err))
            }
            Err(AdoptNotarizationError::BlockMissing { .. }) => {
                self.request_catch_up(seq.epoch, seq, false);
                Err(Error::MissingBlock { seq })
            }
            Err(AdoptNotarizationError::ConflictingBlock { .. }) => {
                // At most one block notarizes per sequence; a conflicting
                // certificate means this node or the sender diverged.
                self.request_catch_up(seq.epoch, seq, false);
                Err(Error::Conflicting { seq })
            }
        }
    }
}
