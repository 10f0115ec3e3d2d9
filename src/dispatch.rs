//! Message dispatch: the inbound half of the pipeline, classifying raw
//! packets and routing them to the pipeline/role. Thin by design — all of
//! the actual branching lives in `BeaconPipeline::handle_packet`, which this
//! module simply drives from an inbound receiver.

use std::sync::Arc;

use crate::pipeline::{BeaconPipeline, BeaconRole};
use crate::transport::Packet;

/// Runs the dispatch loop: receive a packet, classify it, hand it to the
/// pipeline. Exits when the inbound channel is closed.
pub async fn run(pipeline: Arc<BeaconPipeline>, role: Arc<dyn BeaconRole>, inbound: flume::Receiver<Packet>) {
    while let Ok(packet) = inbound.recv_async().await {
        pipeline.handle_packet(role.as_ref(), packet).await;
    }
    tracing::info!("dispatch loop exiting, inbound channel closed");
}
