//! Keys and signatures used by the validator role.
use std::{fmt, sync::Arc};

use zksync_consensus_crypto::{bls12_381, ByteFmt, Text, TextFmt};
use zksync_consensus_utils::enum_util::Variant;

use crate::validator::messages::{Msg, MsgHash, Signed};

/// A secret key for the validator role.
/// SecretKey is put into an Arc, so that we can clone it,
/// without copying the secret all over the RAM.
#[derive(Clone)]
pub struct SecretKey(pub(crate) Arc<bls12_381::SecretKey>);

impl SecretKey {
    /// Generates a secret key from a cryptographically-secure entropy source.
    pub fn generate() -> Self {
        Self(Arc::new(bls12_381::SecretKey::generate()))
    }

    /// Public key corresponding to this secret key.
    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.public())
    }

    /// Signs a strongly typed message.
    pub fn sign_msg<V: Variant<Msg>>(&self, msg: V) -> Signed<V> {
        let msg = msg.insert();
        Signed {
            sig: self.sign_hash(&msg.hash()),
            key: self.public(),
            msg: V::extract(msg).unwrap(),
        }
    }

    /// Signs a message hash.
    pub fn sign_hash(&self, msg_hash: &MsgHash) -> Signature {
        Signature(self.0.sign(&ByteFmt::encode(msg_hash)))
    }
}

impl ByteFmt for SecretKey {
    fn encode(&self) -> Vec<u8> {
        ByteFmt::encode(&*self.0)
    }

    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        ByteFmt::decode(bytes).map(Arc::new).map(Self)
    }
}

impl TextFmt for SecretKey {
    fn encode(&self) -> String {
        format!(
            "validator:secret:bls12_381:{}",
            hex::encode(ByteFmt::encode(&*self.0))
        )
    }

    fn decode(text: Text) -> anyhow::Result<Self> {
        text.strip("validator:secret:bls12_381:")?
            .decode_hex()
            .map(Arc::new)
            .map(Self)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        // The secret itself should never be logged.
        write!(fmt, "<secret for {}>", TextFmt::encode(&self.public()))
    }
}

/// A public key for the validator role.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey(pub(crate) bls12_381::PublicKey);

impl ByteFmt for PublicKey {
    fn encode(&self) -> Vec<u8> {
        ByteFmt::encode(&self.0)
    }

    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        ByteFmt::decode(bytes).map(Self)
    }
}

impl TextFmt for PublicKey {
    fn encode(&self) -> String {
        format!(
            "validator:public:bls12_381:{}",
            hex::encode(ByteFmt::encode(&self.0))
        )
    }

    fn decode(text: Text) -> anyhow::Result<Self> {
        text.strip("validator:public:bls12_381:")?
            .decode_hex()
            .map(Self)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&TextFmt::encode(self))
    }
}

/// A signature from a validator.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(pub(crate) bls12_381::Signature);

impl Signature {
    /// Verifies a message against a public key.
    pub fn verify_msg(&self, msg: &Msg, pk: &PublicKey) -> anyhow::Result<()> {
        self.verify_hash(&msg.hash(), pk)
    }

    /// Verifies a message hash against a public key.
    pub fn verify_hash(&self, msg_hash: &MsgHash, pk: &PublicKey) -> anyhow::Result<()> {
        self.0
            .verify(&ByteFmt::encode(msg_hash), &pk.0)
            .map_err(|err| anyhow::format_err!("invalid signature: {err:?}"))
    }
}

impl ByteFmt for Signature {
    fn encode(&self) -> Vec<u8> {
        ByteFmt::encode(&self.0)
    }

    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        ByteFmt::decode(bytes).map(Self)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "validator:signature:bls12_381:{}",
            hex::encode(ByteFmt::encode(&self.0))
        )
    }
}

/// An incrementally constructed aggregate signature.
/// The constituent signatures are kept and aggregated when the certificate
/// is verified; BLS verification does not depend on aggregation order.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AggregateSignature(pub(crate) Vec<bls12_381::Signature>);

impl AggregateSignature {
    /// Adds a signature to the aggregate.
    pub fn add(&mut self, sig: &Signature) {
        self.0.push(sig.0.clone());
    }

    /// Verifies a list of messages against a list of public keys.
    pub fn verify_messages<'a, V: Variant<Msg>>(
        &self,
        messages_and_keys: impl Iterator<Item = (V, &'a PublicKey)>,
    ) -> anyhow::Result<()> {
        let hashes_and_keys =
            messages_and_keys.map(|(message, key)| (message.insert().hash(), key));
        self.verify_hash(hashes_and_keys)
    }

    /// Verifies message hashes against a list of public keys.
    pub fn verify_hash<'a>(
        &self,
        hashes_and_keys: impl Iterator<Item = (MsgHash, &'a PublicKey)>,
    ) -> anyhow::Result<()> {
        let aggregate = bls12_381::AggregateSignature::aggregate(&self.0);

        let bytes_and_pks: Vec<_> = hashes_and_keys
            .map(|(hash, pk)| (ByteFmt::encode(&hash), pk))
            .collect();

        aggregate
            .verify(bytes_and_pks.iter().map(|(bytes, pk)| (&bytes[..], &pk.0)))
            .map_err(|err| anyhow::format_err!("invalid aggregate signature: {err:?}"))
    }

    /// Number of constituent signatures.
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Debug for AggregateSignature {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "<aggregate of {} signatures>", self.0.len())
    }
}
