//! The pluggable finalization rule.
use std::fmt;

use pala_roles::validator;

/// Rule computing the finalized prefix of the freshest notarized chain.
/// The rule only ever sees sequences of adopted-notarized blocks, in chain
/// order; it must be monotone (a longer chain never finalizes less).
pub trait FinalityRule: 'static + fmt::Debug + Send + Sync {
    /// Given the sequences of the freshest notarized chain (ascending,
    /// starting at the current finalized tail), returns the sequence up to
    /// which the chain is finalized, or `None` if nothing new finalizes.
    fn finalized_tail(&self, chain: &[validator::Sequence]) -> Option<validator::Sequence>;
}

/// The doubly-pipelined rule: a block finalizes once it is followed on the
/// notarized chain by its direct successor within the same epoch.
#[derive(Debug, Default)]
pub struct PipelinedFinality;

impl FinalityRule for PipelinedFinality {
    fn finalized_tail(&self, chain: &[validator::Sequence]) -> Option<validator::Sequence> {
        chain
            .windows(2)
            .rev()
            .find(|w| w[0].epoch == w[1].epoch && w[0].next() == w[1])
            .map(|w| w[0])
    }
}
