//! Clock messages and clock notarizations, which drive epoch advancement.
use crate::validator::{
    AggregateSignature, Committee, Epoch, Genesis, GenesisHash, PublicKey, Signed, Signers,
};

/// A voter's signed statement that it is abandoning the previous epoch in
/// favor of `epoch`. Broadcast on liveness timeout.
/// WARNING: any change to this struct invalidates preexisting signatures.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClockMsg {
    /// Hash of the genesis, for domain separation.
    pub genesis: GenesisHash,
    /// The epoch the voter wants to move to.
    pub epoch: Epoch,
}

impl ClockMsg {
    /// Verifies the message.
    pub fn verify(&self, genesis: &Genesis) -> Result<(), ClockMsgVerifyError> {
        if self.genesis != genesis.hash() {
            return Err(ClockMsgVerifyError::GenesisMismatch);
        }
        if self.epoch == Epoch(0) {
            return Err(ClockMsgVerifyError::GenesisEpoch);
        }
        Ok(())
    }
}

/// Error returned by `ClockMsg::verify()`.
#[derive(Debug, thiserror::Error)]
pub enum ClockMsgVerifyError {
    /// Clock message for a different chain.
    #[error("clock message for a different chain")]
    GenesisMismatch,
    /// Clock message targeting the reserved genesis epoch.
    #[error("clock message targeting the reserved genesis epoch")]
    GenesisEpoch,
}

/// A quorum certificate over clock messages for the same target epoch.
/// Receiving one forces a node to the target epoch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClockNotarization {
    /// The clock message that the certificate is for.
    pub message: ClockMsg,
    /// The voters that signed the message.
    pub signers: Signers,
    /// The aggregate signature of the clock messages.
    pub signature: AggregateSignature,
}

impl ClockNotarization {
    /// Creates a new empty certificate for the given message and committee
    /// size.
    pub fn new(message: ClockMsg, committee: &Committee) -> Self {
        Self {
            message,
            signers: Signers::new(committee.len()),
            signature: AggregateSignature::default(),
        }
    }

    /// Epoch this certificate advances to.
    pub fn epoch(&self) -> Epoch {
        self.message.epoch
    }

    /// Adds a clock message to the certificate. Verifies the message and
    /// its signature before adding.
    pub fn add(
        &mut self,
        msg: &Signed<ClockMsg>,
        genesis: &Genesis,
        committee: &Committee,
    ) -> Result<(), ClockNotarizationAddError> {
        let Some(i) = committee.index(&msg.key) else {
            return Err(ClockNotarizationAddError::SignerNotInCommittee {
                signer: Box::new(msg.key.clone()),
            });
        };

        if self.signers.0[i] {
            return Err(ClockNotarizationAddError::DuplicateSigner {
                signer: Box::new(msg.key.clone()),
            });
        }

        msg.verify()
            .map_err(ClockNotarizationAddError::BadSignature)?;

        if self.message != msg.msg {
            return Err(ClockNotarizationAddError::InconsistentMessages);
        }

        msg.msg
            .verify(genesis)
            .map_err(ClockNotarizationAddError::InvalidMessage)?;

        self.signers.0.set(i, true);
        self.signature.add(&msg.sig);

        Ok(())
    }

    /// Verifies the integrity of the clock notarization.
    pub fn verify(
        &self,
        genesis: &Genesis,
        committee: &Committee,
    ) -> Result<(), ClockNotarizationVerifyError> {
        self.message
            .verify(genesis)
            .map_err(ClockNotarizationVerifyError::InvalidMessage)?;

        if self.signers.len() != committee.len() {
            return Err(ClockNotarizationVerifyError::BadSignersSet);
        }

        let weight = self.signers.weight(committee);
        let threshold = committee.quorum_threshold();
        if weight < threshold {
            return Err(ClockNotarizationVerifyError::NotEnoughWeight {
                got: weight,
                want: threshold,
            });
        }

        let messages_and_keys = committee
            .keys()
            .enumerate()
            .filter(|(i, _)| self.signers.0[*i])
            .map(|(_, pk)| (self.message.clone(), pk));

        self.signature
            .verify_messages(messages_and_keys)
            .map_err(ClockNotarizationVerifyError::BadSignature)
    }
}

/// Error returned by `ClockNotarization::add()`.
#[derive(Debug, thiserror::Error)]
pub enum ClockNotarizationAddError {
    /// Signer not present in the committee.
    #[error("signer not in committee: {signer:?}")]
    SignerNotInCommittee {
        /// Signer of the message.
        signer: Box<PublicKey>,
    },
    /// Message from the same signer already present.
    #[error("clock message from the same signer already in the certificate: {signer:?}")]
    DuplicateSigner {
        /// Signer of the message.
        signer: Box<PublicKey>,
    },
    /// Bad signature.
    #[error("bad signature: {0:#}")]
    BadSignature(#[source] anyhow::Error),
    /// Trying to add a message for a different target epoch.
    #[error("trying to add a clock message for a different target epoch")]
    InconsistentMessages,
    /// Invalid clock message.
    #[error("invalid clock message: {0:#}")]
    InvalidMessage(ClockMsgVerifyError),
}

/// Error returned by `ClockNotarization::verify()`.
#[derive(Debug, thiserror::Error)]
pub enum ClockNotarizationVerifyError {
    /// Invalid clock message.
    #[error(transparent)]
    InvalidMessage(#[from] ClockMsgVerifyError),
    /// Signers set does not match the committee.
    #[error("signers set does not match the committee")]
    BadSignersSet,
    /// Weight below the quorum threshold.
    #[error("signers have not reached the quorum threshold: got {got}, want {want}")]
    NotEnoughWeight {
        /// Weight of the signers present.
        got: u64,
        /// Required threshold.
        want: u64,
    },
    /// Bad aggregate signature.
    #[error("bad signature: {0:#}")]
    BadSignature(#[source] anyhow::Error),
}
