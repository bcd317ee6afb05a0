use std::time;

#[vise::register]
pub(super) static ENGINE_INTERFACE: vise::Global<EngineInterface> = vise::Global::new();

#[derive(Debug, vise::Metrics)]
#[metrics(prefix = "pala_engine_interface")]
pub(super) struct EngineInterface {
    /// Latency of a successful `store_block()` call.
    #[metrics(unit = vise::Unit::Seconds, buckets = vise::Buckets::LATENCIES)]
    pub(super) store_block_latency: vise::Histogram<time::Duration>,
    /// Latency of a successful `store_notarization()` call.
    #[metrics(unit = vise::Unit::Seconds, buckets = vise::Buckets::LATENCIES)]
    pub(super) store_notarization_latency: vise::Histogram<time::Duration>,
    /// Latency of a successful `verify_payload()` call.
    #[metrics(unit = vise::Unit::Seconds, buckets = vise::Buckets::LATENCIES)]
    pub(super) verify_payload_latency: vise::Histogram<time::Duration>,
    /// Latency of a successful `propose_payload()` call.
    #[metrics(unit = vise::Unit::Seconds, buckets = vise::Buckets::LATENCIES)]
    pub(super) propose_payload_latency: vise::Histogram<time::Duration>,
    /// Latency of a successful `epoch_record()` call.
    #[metrics(unit = vise::Unit::Seconds, buckets = vise::Buckets::LATENCIES)]
    pub(super) epoch_record_latency: vise::Histogram<time::Duration>,
    /// Latency of a successful `set_epoch_record()` call.
    #[metrics(unit = vise::Unit::Seconds, buckets = vise::Buckets::LATENCIES)]
    pub(super) set_epoch_record_latency: vise::Histogram<time::Duration>,
    /// Latency of a successful `election_result()` call.
    #[metrics(unit = vise::Unit::Seconds, buckets = vise::Buckets::LATENCIES)]
    pub(super) election_result_latency: vise::Histogram<time::Duration>,
}

#[vise::register]
pub(super) static CHAIN_STORE: vise::Collector<Option<ChainStore>> = vise::Collector::new();

#[derive(Debug, vise::Metrics)]
#[metrics(prefix = "pala_engine_chain")]
pub(super) struct ChainStore {
    /// Epoch of the freshest notarized tail.
    pub(super) freshest_epoch: vise::Gauge<u64>,
    /// Serial of the freshest notarized tail.
    pub(super) freshest_serial: vise::Gauge<u64>,
    /// Epoch of the finalized tail.
    pub(super) finalized_epoch: vise::Gauge<u64>,
    /// Serial of the finalized tail.
    pub(super) finalized_serial: vise::Gauge<u64>,
    /// Number of blocks in the fork tree.
    pub(super) tree_size: vise::Gauge<u64>,
}
