//! The top-level consensus message enum and the messages that have no
//! certificate machinery of their own.
use zksync_consensus_utils::enum_util::{BadVariantError, Variant};

use crate::validator::{
    Block, ClockMsg, ClockNotarization, Epoch, Genesis, GenesisHash, Msg, Notarization, Sequence,
    Vote,
};

/// A block plus the claim that it was produced by the epoch's primary
/// proposer; the claim is checked against the `Signed` wrapper's key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proposal {
    /// The proposed block.
    pub block: Block,
}

impl Proposal {
    /// Sequence of the proposed block.
    pub fn seq(&self) -> Sequence {
        self.block.seq()
    }

    /// Epoch of the proposed block.
    pub fn epoch(&self) -> Epoch {
        self.block.epoch()
    }

    /// Verifies the structural validity of the proposed block. Checking
    /// that the author is the epoch's primary proposer is left to the
    /// caller, which knows the schedule active at that epoch.
    pub fn verify(&self, genesis: &Genesis) -> Result<(), ProposalVerifyError> {
        self.block
            .verify(genesis)
            .map_err(ProposalVerifyError::InvalidBlock)?;
        Ok(())
    }
}

/// Error returned by `Proposal::verify()`.
#[derive(Debug, thiserror::Error)]
pub enum ProposalVerifyError {
    /// Structurally invalid block.
    #[error("invalid block: {0:#}")]
    InvalidBlock(#[source] crate::validator::BlockVerifyError),
}

/// Per-peer heartbeat: the sender's epoch and freshest notarized tail.
/// Lets peers detect that either side has fallen behind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerStatus {
    /// Hash of the genesis, for domain separation.
    pub genesis: GenesisHash,
    /// Local epoch of the sender.
    pub epoch: Epoch,
    /// Tail sequence of the sender's freshest notarized chain.
    pub freshest: Sequence,
}

/// Consensus messages.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsensusMsg {
    Proposal(Proposal),
    Vote(Vote),
    Notarization(Notarization),
    Block(Block),
    ClockMsg(ClockMsg),
    ClockNotarization(ClockNotarization),
    Status(PeerStatus),
}

impl ConsensusMsg {
    /// ConsensusMsg variant name.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Proposal(_) => "Proposal",
            Self::Vote(_) => "Vote",
            Self::Notarization(_) => "Notarization",
            Self::Block(_) => "Block",
            Self::ClockMsg(_) => "ClockMsg",
            Self::ClockNotarization(_) => "ClockNotarization",
            Self::Status(_) => "Status",
        }
    }

    /// Epoch that the message refers to.
    pub fn epoch(&self) -> Epoch {
        match self {
            Self::Proposal(msg) => msg.epoch(),
            Self::Vote(msg) => msg.seq.epoch,
            Self::Notarization(msg) => msg.epoch(),
            Self::Block(msg) => msg.epoch(),
            Self::ClockMsg(msg) => msg.epoch,
            Self::ClockNotarization(msg) => msg.epoch(),
            Self::Status(msg) => msg.epoch,
        }
    }
}

impl Variant<Msg> for Proposal {
    fn insert(self) -> Msg {
        ConsensusMsg::Proposal(self).insert()
    }
    fn extract(msg: Msg) -> Result<Self, BadVariantError> {
        let ConsensusMsg::Proposal(this) = Variant::extract(msg)? else {
            return Err(BadVariantError);
        };
        Ok(this)
    }
}

impl Variant<Msg> for Vote {
    fn insert(self) -> Msg {
        ConsensusMsg::Vote(self).insert()
    }
    fn extract(msg: Msg) -> Result<Self, BadVariantError> {
        let ConsensusMsg::Vote(this) = Variant::extract(msg)? else {
            return Err(BadVariantError);
        };
        Ok(this)
    }
}

impl Variant<Msg> for Notarization {
    fn insert(self) -> Msg {
        ConsensusMsg::Notarization(self).insert()
    }
    fn extract(msg: Msg) -> Result<Self, BadVariantError> {
        let ConsensusMsg::Notarization(this) = Variant::extract(msg)? else {
            return Err(BadVariantError);
        };
        Ok(this)
    }
}

impl Variant<Msg> for Block {
    fn insert(self) -> Msg {
        ConsensusMsg::Block(self).insert()
    }
    fn extract(msg: Msg) -> Result<Self, BadVariantError> {
        let ConsensusMsg::Block(this) = Variant::extract(msg)? else {
            return Err(BadVariantError);
        };
        Ok(this)
    }
}

impl Variant<Msg> for ClockMsg {
    fn insert(self) -> Msg {
        ConsensusMsg::ClockMsg(self).insert()
    }
    fn extract(msg: Msg) -> Result<Self, BadVariantError> {
        let ConsensusMsg::ClockMsg(this) = Variant::extract(msg)? else {
            return Err(BadVariantError);
        };
        Ok(this)
    }
}

impl Variant<Msg> for ClockNotarization {
    fn insert(self) -> Msg {
        ConsensusMsg::ClockNotarization(self).insert()
    }
    fn extract(msg: Msg) -> Result<Self, BadVariantError> {
        let ConsensusMsg::ClockNotarization(this) = Variant::extract(msg)? else {
            return Err(BadVariantError);
        };
        Ok(this)
    }
}

impl Variant<Msg> for PeerStatus {
    fn insert(self) -> Msg {
        ConsensusMsg::Status(self).insert()
    }
    fn extract(msg: Msg) -> Result<Self, BadVariantError> {
        let ConsensusMsg::Status(this) = Variant::extract(msg)? else {
            return Err(BadVariantError);
        };
        Ok(this)
    }
}
