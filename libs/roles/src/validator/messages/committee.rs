//! Voter committees, signer bitmaps and the proposer schedule.
use std::collections::BTreeMap;

use anyhow::Context as _;
use bit_vec::BitVec;

use crate::validator::{Epoch, PublicKey};

/// Voting weight.
pub type Weight = u64;

/// Voter representation inside a Committee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedValidator {
    /// Validator key.
    pub key: PublicKey,
    /// Validator weight inside the Committee.
    pub weight: Weight,
}

/// A set of voters for some span of epochs. We represent each voter by its
/// public key. Note that the order of the given validators is NOT preserved
/// in the committee.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Committee {
    vec: Vec<WeightedValidator>,
    indexes: BTreeMap<PublicKey, usize>,
    total_weight: u64,
}

impl Committee {
    /// Creates a new Committee from a list of weighted voters.
    pub fn new(validators: impl IntoIterator<Item = WeightedValidator>) -> anyhow::Result<Self> {
        let mut map = BTreeMap::new();
        let mut total_weight: u64 = 0;
        for v in validators {
            anyhow::ensure!(
                !map.contains_key(&v.key),
                "duplicate validator in committee"
            );
            anyhow::ensure!(v.weight > 0, "validator weight has to be positive");
            total_weight = total_weight
                .checked_add(v.weight)
                .context("sum of weights overflows")?;
            map.insert(v.key.clone(), v);
        }
        anyhow::ensure!(!map.is_empty(), "committee must contain at least one voter");
        let vec: Vec<_> = map.into_values().collect();
        Ok(Self {
            indexes: vec
                .iter()
                .enumerate()
                .map(|(i, v)| (v.key.clone(), i))
                .collect(),
            vec,
            total_weight,
        })
    }

    /// Iterates over the voters.
    pub fn iter(&self) -> impl Iterator<Item = &WeightedValidator> {
        self.vec.iter()
    }

    /// Iterates over the voter keys.
    pub fn keys(&self) -> impl Iterator<Item = &PublicKey> {
        self.vec.iter().map(|v| &v.key)
    }

    /// Number of voters.
    pub fn len(&self) -> usize {
        self.vec.len()
    }

    /// Whether the given key belongs to the committee.
    pub fn contains(&self, validator: &PublicKey) -> bool {
        self.indexes.contains_key(validator)
    }

    /// Voter by its index in the committee.
    pub fn get(&self, index: usize) -> Option<&WeightedValidator> {
        self.vec.get(index)
    }

    /// Index of a voter in the committee.
    pub fn index(&self, validator: &PublicKey) -> Option<usize> {
        self.indexes.get(validator).copied()
    }

    /// Weight threshold for a quorum certificate: `ceil(2/3 * total)`.
    pub fn quorum_threshold(&self) -> u64 {
        self.total_weight.saturating_mul(2).div_ceil(3)
    }

    /// Maximal total weight of faulty voters tolerated by the committee.
    pub fn max_faulty_weight(&self) -> u64 {
        (self.total_weight - 1) / 3
    }

    /// Sum of all voter weights.
    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }
}

/// Bitmap of signers over a committee, in committee index order.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signers(pub BitVec);

impl Signers {
    /// Constructs an empty Signers bitmap for a committee of the given size.
    pub fn new(n: usize) -> Self {
        Self(BitVec::from_elem(n, false))
    }

    /// Number of signers present in the bitmap.
    pub fn count(&self) -> usize {
        self.0.iter().filter(|b| *b).count()
    }

    /// Size of the corresponding committee.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no signer is present.
    pub fn is_empty(&self) -> bool {
        self.0.none()
    }

    /// Sum of the signers' weights.
    /// Panics if the bitmap length does not match the committee size.
    pub fn weight(&self, committee: &Committee) -> u64 {
        assert_eq!(self.len(), committee.len());
        committee
            .iter()
            .enumerate()
            .filter(|(i, _)| self.0[*i])
            .map(|(_, v)| v.weight)
            .sum()
    }
}

/// Role assignment for the chain: the voter committee plus the ordered list
/// of proposers from which each epoch's primary proposer is drawn
/// round-robin. A node may hold both roles at once; both predicates are
/// evaluated per epoch, not baked into types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schedule {
    validators: Committee,
    proposers: Vec<PublicKey>,
}

impl Schedule {
    /// Creates a new schedule.
    pub fn new(validators: Committee, proposers: Vec<PublicKey>) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !proposers.is_empty(),
            "schedule must contain at least one proposer"
        );
        Ok(Self {
            validators,
            proposers,
        })
    }

    /// The primary proposer (leader) of the given epoch.
    pub fn primary_proposer(&self, epoch: Epoch) -> &PublicKey {
        &self.proposers[(epoch.0 % self.proposers.len() as u64) as usize]
    }

    /// Whether the key is a proposer (primary or standby).
    pub fn is_proposer(&self, key: &PublicKey) -> bool {
        self.proposers.contains(key)
    }

    /// Whether the key is a voter.
    pub fn is_voter(&self, key: &PublicKey) -> bool {
        self.validators.contains(key)
    }

    /// The voter committee.
    pub fn validators(&self) -> &Committee {
        &self.validators
    }

    /// Proposer keys in rotation order.
    pub fn proposers(&self) -> &[PublicKey] {
        &self.proposers
    }
}
