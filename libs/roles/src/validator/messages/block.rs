//! Blocks and the sequence numbers that order them.
use std::fmt;

use zksync_consensus_crypto::{keccak256::Keccak256, ByteFmt, Text, TextFmt};

use crate::validator::{conv, Genesis, Notarization};

/// A logical leader term. Epoch 0 is reserved for the genesis block;
/// the protocol starts operating at epoch 1 and advances epochs through
/// clock notarizations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(pub u64);

impl Epoch {
    /// The next epoch.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// The previous epoch, if any.
    pub fn prev(self) -> Option<Self> {
        self.0.checked_sub(1).map(Self)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, formatter)
    }
}

/// Position of a block in the chain: `(epoch, serial)`, ordered
/// lexicographically. The serial restarts at 1 with every epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sequence {
    /// Epoch in which the block was proposed.
    pub epoch: Epoch,
    /// Position within the epoch, starting at 1.
    pub serial: u64,
}

impl Sequence {
    /// The first sequence of the given epoch.
    pub fn first(epoch: Epoch) -> Self {
        Self { epoch, serial: 1 }
    }

    /// The next sequence within the same epoch.
    pub fn next(self) -> Self {
        Self {
            epoch: self.epoch,
            serial: self.serial + 1,
        }
    }

    /// Whether this is the first sequence of its epoch.
    pub fn is_first(&self) -> bool {
        self.serial == 1
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "({},{})", self.epoch, self.serial)
    }
}

/// Opaque application payload of a block. Its semantics belong to the
/// execution layer; consensus only hashes and size-checks it.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Payload(pub Vec<u8>);

impl Payload {
    /// Hash of the payload.
    pub fn hash(&self) -> PayloadHash {
        PayloadHash(Keccak256::new(&self.0))
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "<{} bytes>", self.0.len())
    }
}

/// Hash of a block payload.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PayloadHash(pub(crate) Keccak256);

impl TextFmt for PayloadHash {
    fn encode(&self) -> String {
        format!(
            "payload:keccak256:{}",
            hex::encode(ByteFmt::encode(&self.0))
        )
    }

    fn decode(text: Text) -> anyhow::Result<Self> {
        text.strip("payload:keccak256:")?.decode_hex().map(Self)
    }
}

impl fmt::Debug for PayloadHash {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&TextFmt::encode(self))
    }
}

/// Hash of a block header, identifying the block.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockHash(pub(crate) Keccak256);

impl TextFmt for BlockHash {
    fn encode(&self) -> String {
        format!("block:keccak256:{}", hex::encode(ByteFmt::encode(&self.0)))
    }

    fn decode(text: Text) -> anyhow::Result<Self> {
        text.strip("block:keccak256:")?.decode_hex().map(Self)
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&TextFmt::encode(self))
    }
}

/// Header of a block: its sequence, a reference to its parent and the
/// payload commitment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    /// Sequence of the block.
    pub seq: Sequence,
    /// Hash of the parent block's header.
    pub parent: BlockHash,
    /// Hash of the payload.
    pub payload: PayloadHash,
}

impl BlockHeader {
    /// Hash of the header, identifying the block.
    pub fn hash(&self) -> BlockHash {
        BlockHash(Keccak256::new(&conv::canonical(self)))
    }
}

/// A block: header, payload and piggybacked notarizations for ancestor
/// blocks that became available since the previous proposal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// Header of the block.
    pub header: BlockHeader,
    /// Application payload.
    pub payload: Payload,
    /// Notarizations of ancestor blocks within the pipelining window.
    /// The first block of an epoch carries up to K trailing notarizations
    /// from the previous epoch.
    pub notarizations: Vec<Notarization>,
}

impl Block {
    /// The genesis block of the given chain: sequence `(0,1)`, empty
    /// payload, parent reference derived from the genesis hash. It is
    /// considered notarized by convention.
    pub fn genesis(genesis: &Genesis) -> Self {
        Self {
            header: BlockHeader {
                seq: Sequence::first(Epoch(0)),
                parent: BlockHash(Keccak256::new(&ByteFmt::encode(&genesis.hash().0))),
                payload: Payload::default().hash(),
            },
            payload: Payload::default(),
            notarizations: vec![],
        }
    }

    /// Sequence of the block.
    pub fn seq(&self) -> Sequence {
        self.header.seq
    }

    /// Epoch of the block.
    pub fn epoch(&self) -> Epoch {
        self.header.seq.epoch
    }

    /// Hash identifying the block.
    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }

    /// Verifies the structural consistency of the block: the payload must
    /// match its commitment and piggybacked notarizations must target
    /// earlier sequences. Certificate validity is checked separately,
    /// against the committee of the certificate's epoch.
    pub fn verify(&self, genesis: &Genesis) -> Result<(), BlockVerifyError> {
        if self.payload.hash() != self.header.payload {
            return Err(BlockVerifyError::PayloadMismatch);
        }
        if self.notarizations.len() as u64 > genesis.pipeline_depth {
            return Err(BlockVerifyError::TooManyNotarizations {
                got: self.notarizations.len(),
            });
        }
        for notarization in &self.notarizations {
            if notarization.seq() >= self.header.seq {
                return Err(BlockVerifyError::NonAncestorNotarization {
                    seq: notarization.seq(),
                });
            }
        }
        Ok(())
    }
}

/// Error returned by `Block::verify()`.
#[derive(Debug, thiserror::Error)]
pub enum BlockVerifyError {
    /// Payload does not match the header commitment.
    #[error("payload does not match the header commitment")]
    PayloadMismatch,
    /// More piggybacked notarizations than the pipelining window allows.
    #[error("too many piggybacked notarizations ({got})")]
    TooManyNotarizations {
        /// Number of notarizations carried.
        got: usize,
    },
    /// Piggybacked notarization for a non-ancestor sequence.
    #[error("piggybacked notarization for non-ancestor sequence {seq}")]
    NonAncestorNotarization {
        /// Offending sequence.
        seq: Sequence,
    },
}
