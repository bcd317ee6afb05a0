//! Metrics for the consensus component.

use std::time::Duration;

use vise::{Buckets, EncodeLabelSet, EncodeLabelValue, Family, Gauge, Histogram, Metrics, Unit};

/// Label for a consensus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue)]
#[metrics(rename_all = "snake_case")]
pub(crate) enum ConsensusMsgLabel {
    /// Label for a `Proposal` message.
    Proposal,
    /// Label for a `Vote` message.
    Vote,
    /// Label for a `Notarization` message.
    Notarization,
    /// Label for a `Block` message.
    Block,
    /// Label for a `ClockMsg` message.
    ClockMsg,
    /// Label for a `ClockNotarization` message.
    ClockNotarization,
    /// Label for a `Status` heartbeat.
    Status,
}

impl ConsensusMsgLabel {
    /// Attaches a result to this label.
    pub(crate) fn with_result<E>(self, result: &Result<(), E>) -> ProcessingLatencyLabels {
        ProcessingLatencyLabels {
            r#type: self,
            result: match result {
                Ok(()) => ResultLabel::Ok,
                Err(_) => ResultLabel::Err,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue)]
#[metrics(rename_all = "snake_case")]
enum ResultLabel {
    Ok,
    Err,
}

/// Labels for processing latency metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelSet)]
pub(crate) struct ProcessingLatencyLabels {
    r#type: ConsensusMsgLabel,
    result: ResultLabel,
}

/// Metrics defined by the consensus component.
#[derive(Debug, Metrics)]
#[metrics(prefix = "consensus")]
pub(crate) struct ConsensusMetrics {
    /// The local epoch of the node.
    pub(crate) local_epoch: Gauge<u64>,
    /// Time spent in an epoch, measured from entering the epoch until
    /// entering the next one.
    #[metrics(buckets = Buckets::exponential(0.125..=512.0, 2.0), unit = Unit::Seconds)]
    pub(crate) epoch_latency: Histogram<Duration>,
    /// Size of a proposed payload in bytes.
    #[metrics(buckets = Buckets::exponential(4_096.0..=4_194_304.0, 2.0), unit = Unit::Bytes)]
    pub(crate) proposal_payload_size: Histogram<usize>,
    /// Latency of processing inbound messages.
    #[metrics(buckets = Buckets::LATENCIES, unit = Unit::Seconds)]
    pub(crate) message_processing_latency: Family<ProcessingLatencyLabels, Histogram<Duration>>,
}

/// Global instance of [`ConsensusMetrics`].
#[vise::register]
pub(crate) static METRICS: vise::Global<ConsensusMetrics> = vise::Global::new();
