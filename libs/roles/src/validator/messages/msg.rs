//! Generic message types.
use std::fmt;

use zksync_consensus_crypto::{keccak256::Keccak256, ByteFmt, Text, TextFmt};
use zksync_consensus_utils::enum_util::{BadVariantError, Variant};

use crate::validator::{conv, ConsensusMsg, PublicKey, Signature};

/// Generic message type for a validator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Msg {
    /// Consensus message.
    Consensus(ConsensusMsg),
}

impl Msg {
    /// Returns the hash of the message.
    pub fn hash(&self) -> MsgHash {
        MsgHash(Keccak256::new(&conv::canonical(self)))
    }
}

impl Variant<Msg> for ConsensusMsg {
    fn insert(self) -> Msg {
        Msg::Consensus(self)
    }
    fn extract(msg: Msg) -> Result<Self, BadVariantError> {
        let Msg::Consensus(this) = msg;
        Ok(this)
    }
}

/// Hash of a message.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MsgHash(pub(crate) Keccak256);

impl ByteFmt for MsgHash {
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        ByteFmt::decode(bytes).map(Self)
    }

    fn encode(&self) -> Vec<u8> {
        ByteFmt::encode(&self.0)
    }
}

impl TextFmt for MsgHash {
    fn decode(text: Text) -> anyhow::Result<Self> {
        text.strip("validator_msg:keccak256:")?
            .decode_hex()
            .map(Self)
    }

    fn encode(&self) -> String {
        format!(
            "validator_msg:keccak256:{}",
            hex::encode(ByteFmt::encode(&self.0))
        )
    }
}

impl fmt::Debug for MsgHash {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&TextFmt::encode(self))
    }
}

/// Strongly typed signed message.
/// WARNING: signature is not guaranteed to be valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signed<V: Variant<Msg>> {
    /// The message that was signed.
    pub msg: V,
    /// The public key of the signer.
    pub key: PublicKey,
    /// The signature.
    pub sig: Signature,
}

impl<V: Variant<Msg> + Clone> Signed<V> {
    /// Verify the signature on the message.
    pub fn verify(&self) -> anyhow::Result<()> {
        self.sig.verify_msg(&self.msg.clone().insert(), &self.key)
    }
}

impl<V: Variant<Msg>> Signed<V> {
    /// Casts a signed message variant to sub/super variant.
    /// It is an equivalent of constructing/deconstructing enum values.
    pub fn cast<U: Variant<Msg>>(self) -> Result<Signed<U>, BadVariantError> {
        Ok(Signed {
            msg: U::extract(self.msg.insert())?,
            key: self.key,
            sig: self.sig,
        })
    }
}
