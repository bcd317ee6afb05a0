//! Genesis of the chain: the protocol parameters every node must agree on.
use std::fmt;

use zksync_consensus_crypto::{keccak256::Keccak256, ByteFmt, Text, TextFmt};

use crate::validator::{conv, Schedule};

/// Genesis of the chain. Hashed into every vote and clock message for
/// cross-chain domain separation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Genesis {
    /// Identifier of the chain.
    pub chain_id: u64,
    /// Initial role schedule (voters + proposer rotation).
    pub schedule: Schedule,
    /// Pipelining window K: the maximum number of proposed blocks allowed
    /// beyond the freshest notarized tail without a notarization.
    pub pipeline_depth: u64,
}

impl Genesis {
    /// Hash of the genesis.
    pub fn hash(&self) -> GenesisHash {
        GenesisHash(Keccak256::new(&conv::canonical(self)))
    }

    /// Verifies the genesis parameters.
    pub fn verify(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.pipeline_depth > 0, "pipeline depth must be positive");
        Ok(())
    }
}

/// Hash of the genesis, identifying the chain.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenesisHash(pub(crate) Keccak256);

impl TextFmt for GenesisHash {
    fn encode(&self) -> String {
        format!(
            "genesis:keccak256:{}",
            hex::encode(ByteFmt::encode(&self.0))
        )
    }

    fn decode(text: Text) -> anyhow::Result<Self> {
        text.strip("genesis:keccak256:")?.decode_hex().map(Self)
    }
}

impl fmt::Debug for GenesisHash {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&TextFmt::encode(self))
    }
}
