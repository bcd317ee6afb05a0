//! Votes and notarizations (the quorum certificates over votes).
use crate::validator::{
    AggregateSignature, BlockHash, Committee, Epoch, Genesis, GenesisHash, PublicKey, Sequence,
    Signed, Signers,
};

/// A voter's endorsement of a specific block at its sequence.
/// WARNING: any change to this struct invalidates preexisting signatures.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Vote {
    /// Hash of the genesis, for domain separation.
    pub genesis: GenesisHash,
    /// Sequence being voted on.
    pub seq: Sequence,
    /// Hash of the endorsed block.
    pub block: BlockHash,
}

impl Vote {
    /// Verifies the message.
    pub fn verify(&self, genesis: &Genesis) -> Result<(), VoteVerifyError> {
        if self.genesis != genesis.hash() {
            return Err(VoteVerifyError::GenesisMismatch);
        }
        Ok(())
    }
}

/// Error returned by `Vote::verify()`.
#[derive(Debug, thiserror::Error)]
pub enum VoteVerifyError {
    /// Vote for a different chain.
    #[error("vote for a different chain")]
    GenesisMismatch,
}

/// A notarization: a quorum certificate aggregating votes for one block at
/// one sequence. The certificate is over identical messages, so we only
/// need one vote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notarization {
    /// The vote that the certificate is for.
    pub message: Vote,
    /// The voters that signed the vote.
    pub signers: Signers,
    /// The aggregate signature of the votes.
    pub signature: AggregateSignature,
}

impl Notarization {
    /// Creates a new empty certificate for the given vote and committee size.
    pub fn new(message: Vote, committee: &Committee) -> Self {
        Self {
            message,
            signers: Signers::new(committee.len()),
            signature: AggregateSignature::default(),
        }
    }

    /// Sequence certified by this notarization.
    pub fn seq(&self) -> Sequence {
        self.message.seq
    }

    /// Epoch of the certified sequence.
    pub fn epoch(&self) -> Epoch {
        self.message.seq.epoch
    }

    /// Hash of the certified block.
    pub fn block(&self) -> BlockHash {
        self.message.block
    }

    /// Adds a vote to the certificate. Verifies the vote and its signature
    /// before adding.
    pub fn add(
        &mut self,
        msg: &Signed<Vote>,
        genesis: &Genesis,
        committee: &Committee,
    ) -> Result<(), NotarizationAddError> {
        // Check if the signer is in the committee.
        let Some(i) = committee.index(&msg.key) else {
            return Err(NotarizationAddError::SignerNotInCommittee {
                signer: Box::new(msg.key.clone()),
            });
        };

        // Check if we already have a vote from the same signer.
        if self.signers.0[i] {
            return Err(NotarizationAddError::DuplicateSigner {
                signer: Box::new(msg.key.clone()),
            });
        }

        // Verify the signature.
        msg.verify().map_err(NotarizationAddError::BadSignature)?;

        // Check that the vote is consistent with the certificate.
        if self.message != msg.msg {
            return Err(NotarizationAddError::InconsistentMessages);
        }

        // Check that the vote itself is valid.
        msg.msg
            .verify(genesis)
            .map_err(NotarizationAddError::InvalidMessage)?;

        self.signers.0.set(i, true);
        self.signature.add(&msg.sig);

        Ok(())
    }

    /// Verifies the integrity of the notarization.
    pub fn verify(
        &self,
        genesis: &Genesis,
        committee: &Committee,
    ) -> Result<(), NotarizationVerifyError> {
        self.message
            .verify(genesis)
            .map_err(NotarizationVerifyError::InvalidMessage)?;

        if self.signers.len() != committee.len() {
            return Err(NotarizationVerifyError::BadSignersSet);
        }

        let weight = self.signers.weight(committee);
        let threshold = committee.quorum_threshold();
        if weight < threshold {
            return Err(NotarizationVerifyError::NotEnoughWeight {
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
            .map_err(NotarizationVerifyError::BadSignature)
    }
}

/// Error returned by `Notarization::add()`.
#[derive(Debug, thiserror::Error)]
pub enum NotarizationAddError {
    /// Signer not present in the committee.
    #[error("signer not in committee: {signer:?}")]
    SignerNotInCommittee {
        /// Signer of the vote.
        signer: Box<PublicKey>,
    },
    /// Vote from the same signer already present.
    #[error("vote from the same signer already in the certificate: {signer:?}")]
    DuplicateSigner {
        /// Signer of the vote.
        signer: Box<PublicKey>,
    },
    /// Bad signature.
    #[error("bad signature: {0:#}")]
    BadSignature(#[source] anyhow::Error),
    /// Trying to add a vote for a different message.
    #[error("trying to add a vote for a different message")]
    InconsistentMessages,
    /// Invalid vote.
    #[error("invalid vote: {0:#}")]
    InvalidMessage(VoteVerifyError),
}

/// Error returned by `Notarization::verify()`.
#[derive(Debug, thiserror::Error)]
pub enum NotarizationVerifyError {
    /// Invalid vote.
    #[error(transparent)]
    InvalidMessage(#[from] VoteVerifyError),
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
