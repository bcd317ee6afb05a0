use pala_engine::InsertBlockError;
use pala_roles::validator;
use zksync_concurrency::{ctx, error::Wrap};

use super::StateMachine;
use crate::Provenance;

/// Errors that can occur when processing a Proposal message.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// Message signer isn't the primary proposer of the proposal's epoch.
    #[error("message signer isn't the primary proposer of the epoch (signer: {signer:?})")]
    NonPrimaryProposer {
        /// Signer of the message.
        signer: Box<validator::PublicKey>,
    },
    /// Past epoch.
    #[error("past epoch (current epoch: {current_epoch:?})")]
    Old {
        /// Current epoch.
        current_epoch: validator::Epoch,
    },
    /// Future epoch. The proposal was buffered for replay after catch-up.
    #[error("future epoch (proposal epoch: {epoch:?}, current epoch: {current_epoch:?})")]
    Future {
        /// Epoch of the proposal.
        epoch: validator::Epoch,
        /// Current epoch.
        current_epoch: validator::Epoch,
    },
    /// The buffer of uninserted proposals is full. The proposal is refused,
    /// relying on peer re-broadcast after catch-up.
    #[error("buffer of uninserted proposals is full")]
    BufferFull,
    /// Invalid message signature.
    #[error("invalid signature: {0:#}")]
    InvalidSignature(#[source] anyhow::Error),
    /// Invalid message.
    #[error("invalid message: {0:#}")]
    InvalidMessage(#[source] validator::ProposalVerifyError),
    /// Oversized payload.
    #[error("payload too large: got {got}B, max {max}B")]
    PayloadTooLarge {
        /// Size of the payload.
        got: usize,
        /// Maximum allowed size.
        max: usize,
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
    /// Processes a Proposal message: the shared entry point for blocks of
    /// the current epoch, whether produced locally or received from the
    /// primary proposer.
    pub(crate) async fn on_proposal(
        &mut self,
        ctx: &ctx::Ctx,
        signed_message: validator::Signed<validator::Proposal>,
        provenance: Provenance,
    ) -> Result<(), Error> {
        let config = self.config.clone();
        let message = &signed_message.msg;
        let author = &signed_message.key;
        let epoch = message.epoch();
        let seq = message.seq();

        // Check that the signer is the primary proposer of the proposal's epoch.
        if config.schedule(epoch).primary_proposer(epoch) != author {
            return Err(Error::NonPrimaryProposer {
                signer: author.clone().into(),
            });
        }

        // If the message is from a past epoch, ignore it.
        if epoch < self.local_epoch {
            return Err(Error::Old {
                current_epoch: self.local_epoch,
            });
        }

        // Check the signature on the message.
        signed_message.verify().map_err(Error::InvalidSignature)?;

        message
            .verify(config.genesis())
            .map_err(Error::InvalidMessage)?;

        if message.block.payload.len() > config.max_payload_size {
            return Err(Error::PayloadTooLarge {
                got: message.block.payload.len(),
                max: config.max_payload_size,
            });
        }

        // A proposal ahead of the local epoch cannot be voted on yet. Buffer
        // it and reconcile.
        if epoch > self.local_epoch {
            let current_epoch = self.local_epoch;
            if config.is_voter(current_epoch) {
                self.buffer_uninserted(signed_message)?;
            }
            self.request_catch_up(epoch, seq, false);
            return Err(Error::Future {
                epoch,
                current_epoch,
            });
        }

        let block = message.block.clone();
        if provenance == Provenance::Local {
            // Own proposal looped back from the broadcast. Keep it around
            // for late-joining voters.
            self.unnotarized_proposals.insert(seq, block.clone());
        }

        match config.engine_manager.insert_block(ctx, &block).await {
            Ok(()) => {
                tracing::debug!(seq = %seq, "received proposal");
                self.adopt_embedded_notarizations(ctx, &block).await?;
                if config.is_voter(self.local_epoch) {
                    self.unvoted_proposals.insert(seq, block);
                }
                Ok(())
            }
            Err(InsertBlockError::Internal(err)) => Err(Error::Internal(err)),
            Err(err @ InsertBlockError::ParentMissing { .. }) => {
                // Our frontier is behind the proposer's.
                self.request_catch_up(epoch, seq, false);
                if config.is_voter(self.local_epoch) {
                    self.buffer_uninserted(signed_message)?;
                }
                Err(Error::NotInserted(err))
            }
            Err(err @ InsertBlockError::DuplicateCertified { .. }) => {
                // A different block already notarized at this sequence,
                // which usually means we missed an epoch switch.
                self.request_catch_up(epoch, seq, false);
                Err(Error::NotInserted(err))
            }
            Err(err) => Err(Error::NotInserted(err)),
        }
    }

    /// Admits a proposal into the bounded buffer of uninserted proposals.
    fn buffer_uninserted(
        &mut self,
        signed_message: validator::Signed<validator::Proposal>,
    ) -> Result<(), Error> {
        let seq = signed_message.msg.seq();
        if self.uninserted_proposals.contains_key(&seq) {
            return Ok(());
        }
        if self.uninserted_proposals.len() >= self.config.max_uninserted_proposals() {
            return Err(Error::BufferFull);
        }
        self.uninserted_proposals.insert(seq, signed_message);
        Ok(())
    }
}
