use pala_engine::AdoptNotarizationError;
use pala_roles::validator;
use zksync_concurrency::{ctx, error::Wrap};

use super::StateMachine;
use crate::{ConsensusInputMessage, Target, ToNetworkMessage};

/// Errors that can occur when processing a Vote message.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// This node is not the primary proposer of the vote's epoch.
    #[error("not the primary proposer of the vote's epoch")]
    NotPrimaryProposer,
    /// Message signer isn't part of the voter committee.
    #[error("message signer isn't part of the voter committee (signer: {signer:?})")]
    NonValidatorSigner {
        /// Signer of the message.
        signer: Box<validator::PublicKey>,
    },
    /// Past epoch.
    #[error("past epoch (current epoch: {current_epoch:?})")]
    Old {
        /// Current epoch.
        current_epoch: validator::Epoch,
    },
    /// Future epoch. Votes are aggregated only for the epoch this node is
    /// currently the primary proposer of.
    #[error("future epoch (vote epoch: {epoch:?}, current epoch: {current_epoch:?})")]
    Future {
        /// Epoch of the vote.
        epoch: validator::Epoch,
        /// Current epoch.
        current_epoch: validator::Epoch,
    },
    /// Duplicate signer. We already have a vote from the same validator for
    /// the same block.
    #[error("duplicate signer (sequence: {seq}, signer: {signer:?})")]
    DuplicateSigner {
        /// Sequence of the vote.
        seq: validator::Sequence,
        /// Signer of the message.
        signer: Box<validator::PublicKey>,
    },
    /// Invalid message signature.
    #[error("invalid signature: {0:#}")]
    InvalidSignature(#[source] anyhow::Error),
    /// Invalid message.
    #[error("invalid message: {0:#}")]
    InvalidMessage(#[source] validator::VoteVerifyError),
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
    /// Processes a Vote message. Votes are accumulated per (sequence, block)
    /// into incrementally built notarizations; upon reaching the quorum
    /// threshold the notarization is broadcast and adopted locally. The
    /// explicit broadcast, beyond embedding in future blocks, is what lets
    /// the next leader recover the trailing notarizations after a leader
    /// switch.
    pub(crate) async fn on_vote(
        &mut self,
        ctx: &ctx::Ctx,
        signed_message: validator::Signed<validator::Vote>,
    ) -> Result<(), Error> {
        let config = self.config.clone();
        let message = &signed_message.msg;
        let author = &signed_message.key;
        let seq = message.seq;

        // Only the primary proposer aggregates votes, and only for its own
        // epoch.
        if seq.epoch < self.local_epoch {
            return Err(Error::Old {
                current_epoch: self.local_epoch,
            });
        }
        if seq.epoch > self.local_epoch {
            return Err(Error::Future {
                epoch: seq.epoch,
                current_epoch: self.local_epoch,
            });
        }
        if !config.is_primary_proposer(self.local_epoch) {
            return Err(Error::NotPrimaryProposer);
        }

        let schedule = config.schedule(seq.epoch);
        let committee = schedule.validators();

        // Check that the message signer is in the voter committee.
        let Some(index) = committee.index(author) else {
            return Err(Error::NonValidatorSigner {
                signer: author.clone().into(),
            });
        };

        // Check if we already have a vote from the same signer for the same
        // block.
        if let Some(qc) = self
            .votes_cache
            .get(&seq)
            .and_then(|candidates| candidates.get(&message.block))
        {
            if qc.signers.0[index] {
                return Err(Error::DuplicateSigner {
                    seq,
                    signer: author.clone().into(),
                });
            }
        }

        // Check the signature on the message.
        signed_message.verify().map_err(Error::InvalidSignature)?;

        message
            .verify(config.genesis())
            .map_err(Error::InvalidMessage)?;

        tracing::debug!(seq = %seq, "received vote from {author:?}");

        // Add the vote to the incrementally-constructed notarization.
        let qc = self
            .votes_cache
            .entry(seq)
            .or_default()
            .entry(message.block)
            .or_insert_with(|| validator::Notarization::new(message.clone(), committee));

        // Should always succeed as all checks have been already performed.
        qc.add(&signed_message, config.genesis(), committee)
            .expect("could not add vote to Notarization");

        let weight = qc.signers.weight(committee);
        if weight < committee.quorum_threshold() {
            return Ok(());
        }

        // ----------- We have a notarization. Now we process it. -----------

        // Consume the certificate. Competing vote sets for other blocks at
        // this sequence are moot once one of them notarizes.
        let qc = self
            .votes_cache
            .remove(&seq)
            .and_then(|mut candidates| candidates.remove(&message.block))
            .unwrap();

        tracing::info!(seq = %seq, weight, "notarization quorum reached");

        let msg = config
            .secret_key
            .sign_msg(validator::ConsensusMsg::Notarization(qc.clone()));
        self.outbound_channel
            .send(ToNetworkMessage::Consensus(ConsensusInputMessage {
                message: msg,
                target: Target::Broadcast,
            }));

        match config.engine_manager.adopt_notarization(ctx, &qc).await {
            Ok(update) => self.process_chain_update(ctx, update),
            Err(AdoptNotarizationError::Internal(err)) => return Err(Error::Internal(err)),
            Err(AdoptNotarizationError::BlockMissing { .. }) => {
                // Voters certified a block we never received.
                self.request_catch_up(seq.epoch, seq, false);
            }
            Err(err) => tracing::warn!("adopting own notarization: {err:#}"),
        }

        Ok(())
    }
}
