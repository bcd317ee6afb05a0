//! In-memory fork tree of candidate blocks and adopted notarizations.
use std::collections::{BTreeMap, HashMap, HashSet};

use pala_roles::validator;
use zksync_concurrency::{ctx, error::Wrap};

use crate::FinalityRule;

/// Errors that can occur when inserting a block into the chain.
#[derive(Debug, thiserror::Error)]
pub enum InsertBlockError {
    /// Structurally invalid block.
    #[error("invalid block: {0:#}")]
    InvalidBlock(#[source] anyhow::Error),
    /// The block's parent is not in the tree.
    #[error("parent of block {seq} is missing: {parent:?}")]
    ParentMissing {
        /// Sequence of the rejected block.
        seq: validator::Sequence,
        /// Hash of the missing parent.
        parent: validator::BlockHash,
    },
    /// A different block is already adopted-notarized at this sequence.
    #[error("a different block is already notarized at sequence {seq}")]
    DuplicateCertified {
        /// Sequence of the rejected block.
        seq: validator::Sequence,
    },
    /// The block does not descend from the finalized tip.
    #[error("block {seq} does not extend the finalized chain")]
    NotExtendingFinalized {
        /// Sequence of the rejected block.
        seq: validator::Sequence,
    },
    /// Internal error. Unlike other error types, this one isn't supposed
    /// to be easily recoverable.
    #[error(transparent)]
    Internal(#[from] ctx::Error),
}

impl Wrap for InsertBlockError {
    fn with_wrap<C: std::fmt::Display + Send + Sync + 'static, F: FnOnce() -> C>(
        self,
        f: F,
    ) -> Self {
        match self {
            InsertBlockError::Internal(err) => InsertBlockError::Internal(err.with_wrap(f)),
            err => err,
        }
    }
}

/// Errors that can occur when adopting a notarization.
#[derive(Debug, thiserror::Error)]
pub enum AdoptNotarizationError {
    /// Invalid notarization.
    #[error("invalid notarization: {0:#}")]
    InvalidNotarization(#[source] anyhow::Error),
    /// The certified block is not in the tree.
    #[error("notarized block {seq} is missing: {block:?}")]
    BlockMissing {
        /// Sequence of the notarization.
        seq: validator::Sequence,
        /// Hash of the missing block.
        block: validator::BlockHash,
    },
    /// A different block is already adopted-notarized at this sequence.
    /// This is the hard safety boundary; it never resolves locally.
    #[error("conflicting notarization for sequence {seq}")]
    ConflictingBlock {
        /// Sequence of the conflict.
        seq: validator::Sequence,
    },
    /// Internal error. Unlike other error types, this one isn't supposed
    /// to be easily recoverable.
    #[error(transparent)]
    Internal(#[from] ctx::Error),
}

impl Wrap for AdoptNotarizationError {
    fn with_wrap<C: std::fmt::Display + Send + Sync + 'static, F: FnOnce() -> C>(
        self,
        f: F,
    ) -> Self {
        match self {
            AdoptNotarizationError::Internal(err) => {
                AdoptNotarizationError::Internal(err.with_wrap(f))
            }
            err => err,
        }
    }
}

/// Snapshot of the chain positions that the consensus layer reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainState {
    /// Tail sequence of the freshest notarized chain.
    pub freshest: validator::Sequence,
    /// Hash of the freshest notarized tail block.
    pub freshest_hash: validator::BlockHash,
    /// Tail sequence of the finalized chain.
    pub finalized: validator::Sequence,
}

/// What changed as a result of adopting a notarization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainUpdate {
    /// The freshest notarized chain got a new tail.
    pub freshest_advanced: bool,
    /// The finalized prefix grew.
    pub finalized_advanced: bool,
    /// A newly finalized block carried an election result.
    pub schedule_changed: bool,
}

/// Outcome of `ChainStore::try_adopt`.
#[derive(Debug, Default)]
pub(crate) struct AdoptOutcome {
    /// The stored certificate changed (adopted or upgraded); persist it.
    pub(crate) modified: bool,
    pub(crate) update: ChainUpdate,
    /// Blocks finalized by this adoption, in chain order.
    pub(crate) newly_finalized: Vec<validator::Block>,
}

#[derive(Debug)]
struct BlockEntry {
    block: validator::Block,
    notarization: Option<validator::Notarization>,
    /// Whether this block and all of its ancestors are notarized.
    chain_notarized: bool,
}

/// The fork tree: candidate blocks keyed by hash, the adopted notarization
/// per sequence, and the freshest/finalized chain positions. Multiple
/// unnotarized candidates may coexist at one sequence; at most one block
/// per sequence ever becomes adopted-notarized.
#[derive(Debug)]
pub struct ChainStore {
    entries: HashMap<validator::BlockHash, BlockEntry>,
    children: HashMap<validator::BlockHash, Vec<validator::BlockHash>>,
    notarized: BTreeMap<validator::Sequence, validator::BlockHash>,
    freshest: validator::BlockHash,
    finalized: validator::BlockHash,
    rule: Box<dyn FinalityRule>,
}

impl ChainStore {
    /// New tree containing only the genesis block, which is notarized by
    /// convention.
    pub(crate) fn new(genesis: &validator::Genesis, rule: Box<dyn FinalityRule>) -> Self {
        let block = validator::Block::genesis(genesis);
        let hash = block.hash();
        let seq = block.seq();
        let mut entries = HashMap::new();
        entries.insert(
            hash,
            BlockEntry {
                block,
                notarization: None,
                chain_notarized: true,
            },
        );
        Self {
            entries,
            children: HashMap::new(),
            notarized: BTreeMap::from([(seq, hash)]),
            freshest: hash,
            finalized: hash,
            rule,
        }
    }

    /// Current chain positions.
    pub fn state(&self) -> ChainState {
        ChainState {
            freshest: self.freshest(),
            freshest_hash: self.freshest,
            finalized: self.finalized(),
        }
    }

    /// Tail sequence of the freshest notarized chain.
    pub fn freshest(&self) -> validator::Sequence {
        self.seq_of(&self.freshest)
    }

    /// Hash of the freshest notarized tail block.
    pub fn freshest_hash(&self) -> validator::BlockHash {
        self.freshest
    }

    /// Tail sequence of the finalized chain.
    pub fn finalized(&self) -> validator::Sequence {
        self.seq_of(&self.finalized)
    }

    /// Whether the block is in the tree.
    pub fn contains(&self, hash: &validator::BlockHash) -> bool {
        self.entries.contains_key(hash)
    }

    /// Block by hash.
    pub fn block(&self, hash: &validator::BlockHash) -> Option<&validator::Block> {
        self.entries.get(hash).map(|e| &e.block)
    }

    /// The adopted-notarized block at the given sequence, if any.
    pub fn notarized_block(&self, seq: validator::Sequence) -> Option<&validator::Block> {
        self.notarized.get(&seq).and_then(|h| self.block(h))
    }

    /// The adopted notarization for the given sequence, if any.
    pub fn notarization(&self, seq: validator::Sequence) -> Option<&validator::Notarization> {
        let hash = self.notarized.get(&seq)?;
        self.entries.get(hash)?.notarization.as_ref()
    }

    /// Whether a notarization is adopted at the given sequence.
    /// Genesis counts as notarized.
    pub fn is_notarized(&self, seq: validator::Sequence) -> bool {
        self.notarized.contains_key(&seq)
    }

    /// Number of blocks in the tree.
    pub fn num_blocks(&self) -> usize {
        self.entries.len()
    }

    /// Up to `max` trailing notarizations of the freshest notarized chain,
    /// in chain order. Used for piggybacking on proposals.
    pub fn trailing_notarizations(&self, max: usize) -> Vec<validator::Notarization> {
        let mut out = vec![];
        let mut cur = self.freshest;
        while out.len() < max {
            let Some(entry) = self.entries.get(&cur) else {
                break;
            };
            let Some(qc) = &entry.notarization else {
                break;
            };
            out.push(qc.clone());
            cur = entry.block.header.parent;
        }
        out.reverse();
        out
    }

    /// Inserts a candidate block. Returns `Ok(true)` if the tree changed,
    /// `Ok(false)` if the block was already known (idempotent re-insert).
    pub(crate) fn try_insert(&mut self, block: validator::Block) -> Result<bool, InsertBlockError> {
        let hash = block.hash();
        let seq = block.seq();
        if self.entries.contains_key(&hash) {
            return Ok(false);
        }
        // Known blocks were handled above, so any adopted entry here is a
        // different block.
        if self.notarized.contains_key(&seq) {
            return Err(InsertBlockError::DuplicateCertified { seq });
        }
        if seq <= self.finalized() {
            return Err(InsertBlockError::NotExtendingFinalized { seq });
        }
        let Some(parent) = self.entries.get(&block.header.parent) else {
            return Err(InsertBlockError::ParentMissing {
                seq,
                parent: block.header.parent,
            });
        };
        if parent.block.seq() >= seq {
            return Err(InsertBlockError::InvalidBlock(anyhow::format_err!(
                "block {seq} does not follow its parent {}",
                parent.block.seq()
            )));
        }
        // The parent chain must pass through the finalized tip.
        let finalized_seq = self.finalized();
        let mut cur = block.header.parent;
        while cur != self.finalized {
            let Some(entry) = self.entries.get(&cur) else {
                return Err(InsertBlockError::NotExtendingFinalized { seq });
            };
            if entry.block.seq() <= finalized_seq {
                return Err(InsertBlockError::NotExtendingFinalized { seq });
            }
            cur = entry.block.header.parent;
        }
        self.children
            .entry(block.header.parent)
            .or_default()
            .push(hash);
        self.entries.insert(
            hash,
            BlockEntry {
                block,
                notarization: None,
                chain_notarized: false,
            },
        );
        Ok(true)
    }

    /// Adopts a notarization for a block already in the tree. The caller
    /// must have verified the certificate against the committee of its
    /// epoch. On conflict for the same block, the certificate backed by
    /// more signers is kept.
    pub(crate) fn try_adopt(
        &mut self,
        qc: validator::Notarization,
    ) -> Result<AdoptOutcome, AdoptNotarizationError> {
        let seq = qc.seq();
        let hash = qc.block();
        let Some(entry) = self.entries.get_mut(&hash) else {
            return Err(AdoptNotarizationError::BlockMissing { seq, block: hash });
        };
        if entry.block.seq() != seq {
            return Err(AdoptNotarizationError::InvalidNotarization(
                anyhow::format_err!(
                    "notarization for sequence {seq} certifies a block at sequence {}",
                    entry.block.seq()
                ),
            ));
        }
        if let Some(&adopted) = self.notarized.get(&seq) {
            if adopted != hash {
                return Err(AdoptNotarizationError::ConflictingBlock { seq });
            }
            let modified = match &entry.notarization {
                Some(cur) if cur.signers.count() >= qc.signers.count() => false,
                // Genesis never gets a certificate; `None` here means a
                // first certificate for an already-adopted sequence.
                _ => {
                    entry.notarization = Some(qc);
                    true
                }
            };
            return Ok(AdoptOutcome {
                modified,
                ..AdoptOutcome::default()
            });
        }

        entry.notarization = Some(qc);
        let parent = entry.block.header.parent;
        self.notarized.insert(seq, hash);

        let mut outcome = AdoptOutcome {
            modified: true,
            ..AdoptOutcome::default()
        };
        if self
            .entries
            .get(&parent)
            .is_some_and(|p| p.chain_notarized)
        {
            let mut best = (self.freshest(), self.freshest);
            let mut stack = vec![hash];
            while let Some(h) = stack.pop() {
                if let Some(entry) = self.entries.get_mut(&h) {
                    entry.chain_notarized = true;
                    let s = entry.block.seq();
                    if s > best.0 {
                        best = (s, h);
                    }
                }
                for child in self.children.get(&h).cloned().unwrap_or_default() {
                    let adopted = self
                        .entries
                        .get(&child)
                        .is_some_and(|e| self.notarized.get(&e.block.seq()) == Some(&child));
                    if adopted {
                        stack.push(child);
                    }
                }
            }
            if best.1 != self.freshest {
                self.freshest = best.1;
                outcome.update.freshest_advanced = true;
                outcome.newly_finalized = self.update_finalized();
                outcome.update.finalized_advanced = !outcome.newly_finalized.is_empty();
            }
        }
        Ok(outcome)
    }

    /// Recomputes the finalized prefix of the freshest notarized chain and
    /// prunes superseded forks on advance. Returns the newly finalized
    /// blocks in chain order.
    fn update_finalized(&mut self) -> Vec<validator::Block> {
        let old_finalized = self.finalized();
        let mut hashes = vec![];
        let mut cur = self.freshest;
        while cur != self.finalized {
            hashes.push(cur);
            let Some(entry) = self.entries.get(&cur) else {
                return vec![];
            };
            cur = entry.block.header.parent;
        }
        hashes.push(self.finalized);
        hashes.reverse();
        let seqs: Vec<_> = hashes
            .iter()
            .filter_map(|h| self.entries.get(h))
            .map(|e| e.block.seq())
            .collect();
        let Some(tail) = self.rule.finalized_tail(&seqs) else {
            return vec![];
        };
        if tail <= old_finalized {
            return vec![];
        }
        let mut newly = vec![];
        for hash in &hashes {
            let Some(entry) = self.entries.get(hash) else {
                continue;
            };
            let seq = entry.block.seq();
            if seq > old_finalized && seq <= tail {
                newly.push(entry.block.clone());
                if seq == tail {
                    self.finalized = *hash;
                }
            }
        }
        self.prune();
        newly
    }

    /// Drops every fork that neither belongs to the finalized chain nor
    /// descends from the finalized tip.
    fn prune(&mut self) {
        let mut keep = HashSet::new();
        let mut cur = self.finalized;
        loop {
            keep.insert(cur);
            match self.entries.get(&cur) {
                Some(entry) if self.entries.contains_key(&entry.block.header.parent) => {
                    cur = entry.block.header.parent;
                }
                _ => break,
            }
        }
        let mut stack = vec![self.finalized];
        while let Some(h) = stack.pop() {
            for child in self.children.get(&h).cloned().unwrap_or_default() {
                if keep.insert(child) {
                    stack.push(child);
                }
            }
        }
        self.entries.retain(|h, _| keep.contains(h));
        self.children.retain(|h, _| keep.contains(h));
        for children in self.children.values_mut() {
            children.retain(|c| keep.contains(c));
        }
        self.notarized.retain(|_, h| keep.contains(h));
    }

    fn seq_of(&self, hash: &validator::BlockHash) -> validator::Sequence {
        self.entries
            .get(hash)
            .map(|e| e.block.seq())
            .unwrap_or(validator::Sequence {
                epoch: validator::Epoch(0),
                serial: 1,
            })
    }
}
