//! Canonical byte encoding of messages, used exclusively for hashing and
//! signing. This is not a wire format: transport serialization belongs to
//! the network collaborator.
use zksync_consensus_crypto::ByteFmt;

use crate::validator::{
    AggregateSignature, Block, BlockHash, BlockHeader, ClockMsg, ClockNotarization, Committee,
    ConsensusMsg, Epoch, Genesis, GenesisHash, Msg, Notarization, Payload, PayloadHash,
    PeerStatus, Proposal, PublicKey, Schedule, Sequence, Signers, Vote,
};

/// Canonical encoding of a message, for hashing.
pub(crate) fn canonical<T: Canonical>(msg: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    msg.append(&mut buf);
    buf
}

/// Types with a canonical byte encoding.
pub(crate) trait Canonical {
    /// Appends the canonical encoding of `self` to `buf`.
    fn append(&self, buf: &mut Vec<u8>);
}

fn append_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    (bytes.len() as u64).append(buf);
    buf.extend_from_slice(bytes);
}

impl Canonical for u64 {
    fn append(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }
}

impl Canonical for Epoch {
    fn append(&self, buf: &mut Vec<u8>) {
        self.0.append(buf);
    }
}

impl Canonical for Sequence {
    fn append(&self, buf: &mut Vec<u8>) {
        self.epoch.append(buf);
        self.serial.append(buf);
    }
}

impl Canonical for GenesisHash {
    fn append(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&ByteFmt::encode(&self.0));
    }
}

impl Canonical for BlockHash {
    fn append(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&ByteFmt::encode(&self.0));
    }
}

impl Canonical for PayloadHash {
    fn append(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&ByteFmt::encode(&self.0));
    }
}

impl Canonical for PublicKey {
    fn append(&self, buf: &mut Vec<u8>) {
        append_bytes(buf, &ByteFmt::encode(self));
    }
}

impl Canonical for AggregateSignature {
    fn append(&self, buf: &mut Vec<u8>) {
        (self.0.len() as u64).append(buf);
        for sig in &self.0 {
            append_bytes(buf, &ByteFmt::encode(sig));
        }
    }
}

impl Canonical for Signers {
    fn append(&self, buf: &mut Vec<u8>) {
        (self.0.len() as u64).append(buf);
        append_bytes(buf, &self.0.to_bytes());
    }
}

impl Canonical for Payload {
    fn append(&self, buf: &mut Vec<u8>) {
        append_bytes(buf, &self.0);
    }
}

impl Canonical for BlockHeader {
    fn append(&self, buf: &mut Vec<u8>) {
        self.seq.append(buf);
        self.parent.append(buf);
        self.payload.append(buf);
    }
}

impl Canonical for Block {
    fn append(&self, buf: &mut Vec<u8>) {
        self.header.append(buf);
        self.payload.append(buf);
        (self.notarizations.len() as u64).append(buf);
        for notarization in &self.notarizations {
            notarization.append(buf);
        }
    }
}

impl Canonical for Vote {
    fn append(&self, buf: &mut Vec<u8>) {
        self.genesis.append(buf);
        self.seq.append(buf);
        self.block.append(buf);
    }
}

impl Canonical for Notarization {
    fn append(&self, buf: &mut Vec<u8>) {
        self.message.append(buf);
        self.signers.append(buf);
        self.signature.append(buf);
    }
}

impl Canonical for ClockMsg {
    fn append(&self, buf: &mut Vec<u8>) {
        self.genesis.append(buf);
        self.epoch.append(buf);
    }
}

impl Canonical for ClockNotarization {
    fn append(&self, buf: &mut Vec<u8>) {
        self.message.append(buf);
        self.signers.append(buf);
        self.signature.append(buf);
    }
}

impl Canonical for Proposal {
    fn append(&self, buf: &mut Vec<u8>) {
        self.block.append(buf);
    }
}

impl Canonical for PeerStatus {
    fn append(&self, buf: &mut Vec<u8>) {
        self.genesis.append(buf);
        self.epoch.append(buf);
        self.freshest.append(buf);
    }
}

impl Canonical for Committee {
    fn append(&self, buf: &mut Vec<u8>) {
        (self.len() as u64).append(buf);
        for validator in self.iter() {
            validator.key.append(buf);
            validator.weight.append(buf);
        }
    }
}

impl Canonical for Schedule {
    fn append(&self, buf: &mut Vec<u8>) {
        self.validators().append(buf);
        (self.proposers().len() as u64).append(buf);
        for proposer in self.proposers() {
            proposer.append(buf);
        }
    }
}

impl Canonical for Genesis {
    fn append(&self, buf: &mut Vec<u8>) {
        self.chain_id.append(buf);
        self.schedule.append(buf);
        self.pipeline_depth.append(buf);
    }
}

impl Canonical for ConsensusMsg {
    fn append(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Proposal(msg) => {
                buf.push(0);
                msg.append(buf);
            }
            Self::Vote(msg) => {
                buf.push(1);
                msg.append(buf);
            }
            Self::Notarization(msg) => {
                buf.push(2);
                msg.append(buf);
            }
            Self::Block(msg) => {
                buf.push(3);
                msg.append(buf);
            }
            Self::ClockMsg(msg) => {
                buf.push(4);
                msg.append(buf);
            }
            Self::ClockNotarization(msg) => {
                buf.push(5);
                msg.append(buf);
            }
            Self::Status(msg) => {
                buf.push(6);
                msg.append(buf);
            }
        }
    }
}

impl Canonical for Msg {
    fn append(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Consensus(msg) => {
                buf.push(0);
                msg.append(buf);
            }
        }
    }
}
