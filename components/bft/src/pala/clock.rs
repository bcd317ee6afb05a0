use pala_roles::validator;
use zksync_concurrency::{ctx, error::Wrap, metrics::LatencyHistogramExt as _, time};

use super::StateMachine;
use crate::{metrics, ConsensusInputMessage, Target, ToNetworkMessage};

/// Errors that can occur when processing a ClockMsg message.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// This node is not a proposer; clock messages are aggregated by
    /// proposers only.
    #[error("not a proposer")]
    NotProposer,
    /// Clock message for the current or a past epoch.
    #[error("past epoch (current epoch: {current_epoch:?})")]
    Old {
        /// Current epoch.
        current_epoch: validator::Epoch,
    },
    /// Clock message skipping ahead of the next epoch. Voters that far
    /// ahead imply this node is lagging.
    #[error("future epoch (target epoch: {epoch:?}, current epoch: {current_epoch:?})")]
    Future {
        /// Target epoch of the message.
        epoch: validator::Epoch,
        /// Current epoch.
        current_epoch: validator::Epoch,
    },
    /// Message signer isn't part of the voter committee.
    #[error("message signer isn't part of the voter committee (signer: {signer:?})")]
    NonValidatorSigner {
        /// Signer of the message.
        signer: Box<validator::PublicKey>,
    },
    /// Duplicate signer.
    #[error("duplicate signer (target epoch: {epoch:?}, signer: {signer:?})")]
    DuplicateSigner {
        /// Target epoch of the message.
        epoch: validator::Epoch,
        /// Signer of the message.
        signer: Box<validator::PublicKey>,
    },
    /// Invalid message signature.
    #[error("invalid signature: {0:#}")]
    InvalidSignature(#[source] anyhow::Error),
    /// Invalid message.
    #[error("invalid message: {0:#}")]
    InvalidMessage(#[source] validator::ClockMsgVerifyError),
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

/// Errors that can occur when processing a ClockNotarization message.
#[derive(Debug, thiserror::Error)]
pub(crate) enum QcError {
    /// Certificate for the current or a past epoch.
    #[error("past epoch (current epoch: {current_epoch:?})")]
    Old {
        /// Current epoch.
        current_epoch: validator::Epoch,
    },
    /// Invalid certificate.
    #[error("invalid clock notarization: {0:#}")]
    InvalidMessage(#[source] anyhow::Error),
    /// Internal error. Unlike other error types, this one isn't supposed to
    /// be easily recoverable.
    #[error(transparent)]
    Internal(#[from] ctx::Error),
}

impl Wrap for QcError {
    fn with_wrap<C: std::fmt::Display + Send + Sync + 'static, F: FnOnce() -> C>(
        self,
        f: F,
    ) -> Self {
        match self {
            QcError::Internal(err) => QcError::Internal(err.with_wrap(f)),
            err => err,
        }
    }
}

impl StateMachine {
    /// Processes a ClockMsg message. Clock messages for the next epoch are
    /// accumulated into an incrementally built clock notarization; upon
    /// reaching the quorum threshold the certificate is broadcast and the
    /// epoch advances.
    pub(crate) async fn on_clock(
        &mut self,
        ctx: &ctx::Ctx,
        signed_message: validator::Signed<validator::ClockMsg>,
    ) -> Result<(), Error> {
        let config = self.config.clone();
        let message = &signed_message.msg;
        let author = &signed_message.key;
        let epoch = message.epoch;

        if !config.is_proposer(self.local_epoch) {
            return Err(Error::NotProposer);
        }

        if epoch <= self.local_epoch {
            return Err(Error::Old {
                current_epoch: self.local_epoch,
            });
        }

        if epoch > self.local_epoch.next() {
            let current_epoch = self.local_epoch;
            let freshest = self.chain.borrow().freshest();
            self.request_catch_up(epoch, freshest, false);
            return Err(Error::Future {
                epoch,
                current_epoch,
            });
        }

        let schedule = config.schedule(epoch);
        let committee = schedule.validators();

        // Check that the message signer is in the voter committee.
        let Some(index) = committee.index(author) else {
            return Err(Error::NonValidatorSigner {
                signer: author.clone().into(),
            });
        };

        if let Some(qc) = self.clocks_cache.get(&epoch) {
            if qc.signers.0[index] {
                return Err(Error::DuplicateSigner {
                    epoch,
                    signer: author.clone().into(),
                });
            }
        }

        // Check the signature on the message.
        signed_message.verify().map_err(Error::InvalidSignature)?;

        message
            .verify(config.genesis())
            .map_err(Error::InvalidMessage)?;

        tracing::debug!(epoch = %epoch, "received clock message from {author:?}");

        let qc = self
            .clocks_cache
            .entry(epoch)
            .or_insert_with(|| validator::ClockNotarization::new(message.clone(), committee));

        // Should always succeed as all checks have been already performed.
        qc.add(&signed_message, config.genesis(), committee)
            .expect("could not add message to ClockNotarization");

        let weight = qc.signers.weight(committee);
        if weight < committee.quorum_threshold() {
            return Ok(());
        }

        // ----------- We have a clock notarization. Process it. -----------

        let qc = self.clocks_cache.remove(&epoch).unwrap();

        tracing::info!(epoch = %epoch, weight, "clock quorum reached");

        let msg = config
            .secret_key
            .sign_msg(validator::ConsensusMsg::ClockNotarization(qc.clone()));
        self.outbound_channel
            .send(ToNetworkMessage::Consensus(ConsensusInputMessage {
                message: msg,
                target: Target::Broadcast,
            }));

        self.on_epoch_changed(ctx, &qc).await?;

        Ok(())
    }

    /// Processes a ClockNotarization message. A valid certificate forces
    /// this node to its target epoch.
    pub(crate) async fn on_clock_notarization(
        &mut self,
        ctx: &ctx::Ctx,
        signed_message: validator::Signed<validator::ClockNotarization>,
    ) -> Result<(), QcError> {
        let qc = &signed_message.msg;

        if qc.epoch() <= self.local_epoch {
            return Err(QcError::Old {
                current_epoch: self.local_epoch,
            });
        }

        self.config
            .engine_manager
            .verify_clock_notarization(qc)
            .map_err(QcError::InvalidMessage)?;

        self.on_epoch_changed(ctx, qc).await?;

        Ok(())
    }

    /// Advances the local epoch to the certificate's target epoch. A no-op
    /// for targets at or below the local epoch.
    pub(crate) async fn on_epoch_changed(
        &mut self,
        ctx: &ctx::Ctx,
        qc: &validator::ClockNotarization,
    ) -> ctx::Result<()> {
        let epoch = qc.epoch();
        if epoch <= self.local_epoch {
            return Ok(());
        }

        tracing::info!(from = %self.local_epoch, to = %epoch, "advancing epoch");
        metrics::METRICS
            .epoch_latency
            .observe_latency(ctx.now() - self.epoch_start);
        self.epoch_start = ctx.now();
        self.local_epoch = epoch;
        metrics::METRICS.local_epoch.set(epoch.0);

        // The durable epoch record recovers the local epoch on restart.
        self.config
            .engine_manager
            .set_epoch_record(ctx, qc)
            .await
            .wrap("set_epoch_record()")?;

        // Proposer-side bookkeeping of abandoned epochs.
        self.unnotarized_proposals.clear();
        self.votes_cache.clear();
        self.clocks_cache.retain(|target, _| *target > epoch);
        // Voter-side bookkeeping. `has_voted` resets exactly here: serials
        // restart per epoch, so the at-most-one-vote guarantee is scoped to
        // the epoch lifetime.
        self.uninserted_proposals.clear();
        self.unvoted_proposals.clear();
        self.has_voted.clear();

        // Production stays suspended until the new primary proposer has
        // reconciled against every voter.
        self.proposer_sender.send_replace(None);
        if self.config.is_primary_proposer(epoch) {
            let freshest = self.chain.borrow().freshest();
            self.request_catch_up(epoch, freshest, true);
        }

        self.epoch_timeout = if self.config.is_voter(epoch) {
            time::Deadline::Finite(ctx.now() + self.config.epoch_timeout)
        } else {
            time::Deadline::Infinite
        };

        self.publish_status();
        Ok(())
    }
}
