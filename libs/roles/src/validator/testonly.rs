//! Test-only utilities.
use std::sync::Arc;

use bit_vec::BitVec;
use rand::{
    distributions::{Distribution, Standard},
    Rng,
};

use super::{
    AggregateSignature, Block, BlockHash, BlockHeader, ClockMsg, ClockNotarization, Committee,
    ConsensusMsg, Epoch, Genesis, GenesisHash, MsgHash, Notarization, Payload, PayloadHash,
    PeerStatus, Proposal, PublicKey, Schedule, SecretKey, Sequence, Signature, Signers, Vote,
    WeightedValidator,
};

/// Test setup specification.
#[derive(Debug, Clone)]
pub struct SetupSpec {
    /// ChainId
    pub chain_id: u64,
    /// Pipelining window.
    pub pipeline_depth: u64,
    /// Validator secret keys and weights.
    pub validator_weights: Vec<(SecretKey, u64)>,
}

impl SetupSpec {
    /// New `SetupSpec` with unit weights.
    pub fn new(rng: &mut impl Rng, validators: usize) -> Self {
        Self::new_with_weights(rng, vec![1; validators])
    }

    /// New `SetupSpec` with the given weights.
    pub fn new_with_weights(rng: &mut impl Rng, weights: Vec<u64>) -> Self {
        Self {
            chain_id: rng.gen_range(0..1000),
            pipeline_depth: rng.gen_range(1..5),
            validator_weights: weights.into_iter().map(|w| (rng.gen(), w)).collect(),
        }
    }
}

/// Setup.
#[derive(Debug, Clone)]
pub struct SetupInner {
    /// Validators' secret keys.
    pub validator_keys: Vec<SecretKey>,
    /// Past blocks, starting with the genesis block.
    pub blocks: Vec<Block>,
    /// Genesis config.
    pub genesis: Genesis,
}

impl std::ops::Deref for Setup {
    type Target = SetupInner;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Test setup. Every validator is both a voter and a proposer.
#[derive(Debug, Clone)]
pub struct Setup(pub(crate) SetupInner);

impl Setup {
    /// New `Setup`.
    pub fn new(rng: &mut impl Rng, validators: usize) -> Self {
        let spec = SetupSpec::new(rng, validators);
        Self::from_spec(rng, spec)
    }

    /// New `Setup` with the given weights.
    pub fn new_with_weights(rng: &mut impl Rng, weights: Vec<u64>) -> Self {
        let spec = SetupSpec::new_with_weights(rng, weights);
        Self::from_spec(rng, spec)
    }

    /// Generates a new `Setup` from the given `SetupSpec`.
    pub fn from_spec(_rng: &mut impl Rng, spec: SetupSpec) -> Self {
        let committee = Committee::new(spec.validator_weights.iter().map(|(k, w)| {
            WeightedValidator {
                key: k.public(),
                weight: *w,
            }
        }))
        .unwrap();
        let proposers = committee.keys().cloned().collect();
        let genesis = Genesis {
            chain_id: spec.chain_id,
            schedule: Schedule::new(committee, proposers).unwrap(),
            pipeline_depth: spec.pipeline_depth,
        };
        Self(SetupInner {
            blocks: vec![Block::genesis(&genesis)],
            validator_keys: spec.validator_weights.into_iter().map(|(k, _)| k).collect(),
            genesis,
        })
    }

    /// The voter committee of the setup.
    pub fn committee(&self) -> &Committee {
        self.genesis.schedule.validators()
    }

    /// Sequence of the next block, continuing the last block's epoch.
    /// The first block after genesis lands in epoch 1.
    pub fn next(&self) -> Sequence {
        let last = self.0.blocks.last().unwrap().seq();
        if last.epoch == Epoch(0) {
            Sequence::first(Epoch(1))
        } else {
            last.next()
        }
    }

    /// Sequence of the next block if it were proposed in the given epoch.
    pub fn next_in(&self, epoch: Epoch) -> Sequence {
        let last = self.0.blocks.last().unwrap().seq();
        if last.epoch == epoch {
            last.next()
        } else {
            assert!(epoch > last.epoch);
            Sequence::first(epoch)
        }
    }

    /// Pushes the next block with the given payload, extending the last
    /// block's epoch. The block piggybacks the parent's notarization,
    /// except when the parent is the genesis block.
    pub fn push_block(&mut self, payload: Payload) {
        let seq = self.next();
        self.push_block_in(seq.epoch, payload);
    }

    /// Pushes the next block in the given epoch.
    pub fn push_block_in(&mut self, epoch: Epoch, payload: Payload) {
        let seq = self.next_in(epoch);
        let parent = self.0.blocks.last().unwrap().clone();
        let notarizations = if parent.epoch() == Epoch(0) {
            vec![]
        } else {
            vec![self.make_notarization(&parent)]
        };
        self.0.blocks.push(Block {
            header: BlockHeader {
                seq,
                parent: parent.hash(),
                payload: payload.hash(),
            },
            payload,
            notarizations,
        });
    }

    /// Pushes `count` blocks with a random payload.
    pub fn push_blocks(&mut self, rng: &mut impl Rng, count: usize) {
        for _ in 0..count {
            self.push_block(rng.gen());
        }
    }

    /// Finds a block by its sequence.
    pub fn block(&self, seq: Sequence) -> Option<&Block> {
        self.0.blocks.iter().find(|b| b.seq() == seq)
    }

    /// Creates a Vote for the given block.
    pub fn make_vote(&self, block: &Block) -> Vote {
        Vote {
            genesis: self.genesis.hash(),
            seq: block.seq(),
            block: block.hash(),
        }
    }

    /// Creates a Notarization for the given block, signed by the full
    /// committee.
    pub fn make_notarization(&self, block: &Block) -> Notarization {
        let mut qc = Notarization::new(self.make_vote(block), self.committee());
        for key in &self.0.validator_keys {
            qc.add(
                &key.sign_msg(qc.message.clone()),
                &self.genesis,
                self.committee(),
            )
            .unwrap();
        }
        qc
    }

    /// Creates a ClockMsg targeting the given epoch.
    pub fn make_clock_msg(&self, epoch: Epoch) -> ClockMsg {
        ClockMsg {
            genesis: self.genesis.hash(),
            epoch,
        }
    }

    /// Creates a ClockNotarization for the given epoch, signed by the full
    /// committee.
    pub fn make_clock_notarization(&self, epoch: Epoch) -> ClockNotarization {
        let mut qc = ClockNotarization::new(self.make_clock_msg(epoch), self.committee());
        for key in &self.0.validator_keys {
            qc.add(
                &key.sign_msg(qc.message.clone()),
                &self.genesis,
                self.committee(),
            )
            .unwrap();
        }
        qc
    }
}

impl Distribution<SecretKey> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> SecretKey {
        SecretKey(Arc::new(rng.gen()))
    }
}

impl Distribution<PublicKey> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> PublicKey {
        PublicKey(rng.gen())
    }
}

impl Distribution<Signature> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Signature {
        Signature(rng.gen())
    }
}

impl Distribution<AggregateSignature> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> AggregateSignature {
        AggregateSignature((0..rng.gen_range(1..5)).map(|_| rng.gen()).collect())
    }
}

impl Distribution<MsgHash> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> MsgHash {
        MsgHash(rng.gen())
    }
}

impl Distribution<GenesisHash> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> GenesisHash {
        GenesisHash(rng.gen())
    }
}

impl Distribution<BlockHash> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> BlockHash {
        BlockHash(rng.gen())
    }
}

impl Distribution<PayloadHash> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> PayloadHash {
        PayloadHash(rng.gen())
    }
}

impl Distribution<Epoch> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Epoch {
        Epoch(rng.gen())
    }
}

impl Distribution<Sequence> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Sequence {
        Sequence {
            epoch: rng.gen(),
            serial: rng.gen(),
        }
    }
}

impl Distribution<Payload> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Payload {
        let size: usize = rng.gen_range(0..500);
        Payload((0..size).map(|_| rng.gen()).collect())
    }
}

impl Distribution<BlockHeader> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> BlockHeader {
        BlockHeader {
            seq: rng.gen(),
            parent: rng.gen(),
            payload: rng.gen(),
        }
    }
}

impl Distribution<Block> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Block {
        Block {
            header: rng.gen(),
            payload: rng.gen(),
            notarizations: vec![],
        }
    }
}

impl Distribution<Signers> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Signers {
        Signers(BitVec::from_bytes(&rng.gen::<[u8; 4]>()))
    }
}

impl Distribution<Vote> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vote {
        Vote {
            genesis: rng.gen(),
            seq: rng.gen(),
            block: rng.gen(),
        }
    }
}

impl Distribution<Notarization> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Notarization {
        Notarization {
            message: rng.gen(),
            signers: rng.gen(),
            signature: rng.gen(),
        }
    }
}

impl Distribution<ClockMsg> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ClockMsg {
        ClockMsg {
            genesis: rng.gen(),
            epoch: rng.gen(),
        }
    }
}

impl Distribution<ClockNotarization> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ClockNotarization {
        ClockNotarization {
            message: rng.gen(),
            signers: rng.gen(),
            signature: rng.gen(),
        }
    }
}

impl Distribution<Proposal> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Proposal {
        Proposal { block: rng.gen() }
    }
}

impl Distribution<PeerStatus> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> PeerStatus {
        PeerStatus {
            genesis: rng.gen(),
            epoch: rng.gen(),
            freshest: rng.gen(),
        }
    }
}

impl Distribution<ConsensusMsg> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ConsensusMsg {
        match rng.gen_range(0..7) {
            0 => ConsensusMsg::Proposal(rng.gen()),
            1 => ConsensusMsg::Vote(rng.gen()),
            2 => ConsensusMsg::Notarization(rng.gen()),
            3 => ConsensusMsg::Block(rng.gen()),
            4 => ConsensusMsg::ClockMsg(rng.gen()),
            5 => ConsensusMsg::ClockNotarization(rng.gen()),
            6 => ConsensusMsg::Status(rng.gen()),
            _ => unreachable!(),
        }
    }
}
