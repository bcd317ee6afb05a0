//! Input and output messages of the consensus component. This is the contract
//! with the network collaborator: it owns the sending side of the input queue
//! and delivers every outbound message according to its target.
use pala_roles::validator;
use zksync_concurrency::oneshot;

/// Origin of an inbound consensus message. Messages broadcast by this node
/// loop back through the network with `Local` provenance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provenance {
    /// Produced by this node.
    Local,
    /// Received from a peer.
    Peer,
}

/// A consensus message delivered by the network, with an ack channel that is
/// signalled once the message has been processed.
#[derive(Debug)]
pub struct ConsensusReq {
    /// The signed consensus message.
    pub msg: validator::Signed<validator::ConsensusMsg>,
    /// Where the message came from.
    pub provenance: Provenance,
    /// Ack channel, used by the network to rate-limit per-peer delivery.
    pub ack: oneshot::Sender<()>,
}

/// Inputs of the consensus state machine, serialized onto its single queue.
#[derive(Debug)]
pub enum ConsensusInput {
    /// A consensus message from the network.
    Message(ConsensusReq),
    /// A previously issued catch-up request has been fully served. All data
    /// fetched during catch-up was already delivered as ordinary messages.
    SyncCompleted(CatchUpRequest),
}

/// Delivery scope of an outbound consensus message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    /// Best-effort broadcast to every consensus peer, this node included.
    Broadcast,
    /// Reliable broadcast to all proposers.
    Proposers,
    /// Direct send to the primary proposer of the message's epoch.
    PrimaryProposer,
}

/// Message to be sent by the network to consensus peers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsensusInputMessage {
    /// The signed consensus message.
    pub message: validator::Signed<validator::ConsensusMsg>,
    /// Delivery scope.
    pub target: Target,
}

/// A fire-and-forget request to fetch missing state from peers: epoch info
/// first, then clock state, then blocks and notarizations up to `seq`. The
/// request is idempotent and may be served by multiple peers concurrently;
/// the fetched data re-enters consensus as ordinary messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CatchUpRequest {
    /// Epoch the requester wants to reach.
    pub epoch: validator::Epoch,
    /// Sequence up to which chain data is needed.
    pub seq: validator::Sequence,
    /// Full reconciliation against every voter, requested by a node that
    /// just became the primary proposer.
    pub full: bool,
}

impl CatchUpRequest {
    /// Whether serving this request also serves `other`.
    pub fn covers(&self, other: &Self) -> bool {
        self.epoch >= other.epoch && self.seq >= other.seq && (self.full || !other.full)
    }

    /// Pointwise maximum of the two requests.
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            epoch: self.epoch.max(other.epoch),
            seq: self.seq.max(other.seq),
            full: self.full || other.full,
        }
    }
}

/// Messages sent by consensus to the network collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToNetworkMessage {
    /// A consensus message to deliver.
    Consensus(ConsensusInputMessage),
    /// A catch-up request to serve.
    CatchUp(CatchUpRequest),
}
