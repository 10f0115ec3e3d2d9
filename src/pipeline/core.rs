//! Core BS specialization: each propagation tick originates a fresh down-stream
//! PCB and a fresh core PCB, then propagates inbound beacons onward to
//! routing neighbors only. Registration sends to the local path server and
//! reverse-routes toward the originating core path server.

use std::sync::Arc;

use async_trait::async_trait;

use super::{now_secs, BeaconPipeline, BeaconRole, DELTA, TIME_INTERVAL};
use crate::pcb::{InfoOpaqueField, OpaqueFieldType, PathSegment};
use crate::topology::EdgeRouter;
use crate::transport::{Packet, PathSegmentInfo, PathSegmentRecords};

pub struct CoreRole;

fn fresh_iof(local_isd: u16) -> InfoOpaqueField {
    let now = now_secs();
    let timestamp = ((now + DELTA) % (TIME_INTERVAL * 65536)) / TIME_INTERVAL;
    InfoOpaqueField {
        of_type: OpaqueFieldType::TdcXovr,
        up_flag: false,
        timestamp: timestamp as u16,
        isd_id: local_isd,
    }
}

#[async_trait]
impl BeaconRole for CoreRole {
    async fn originate(&self, pipeline: &BeaconPipeline) {
        let down_stream = PathSegment::new(fresh_iof(pipeline.local.isd_id));
        let core_pcb = PathSegment::new(fresh_iof(pipeline.local.isd_id));

        for router in &pipeline.topology.child_edge_routers {
            let mut pcb = down_stream.clone();
            let marking = pipeline.create_ad_marking(0, router.interface.if_id);
            pcb.ads.push(marking);
            if let Err(err) = pipeline.transport.send(router.addr, Packet::Beacon(pcb)).await {
                tracing::warn!(target = %router.addr, %err, "failed to send down-stream pcb");
            }
        }

        for router in &pipeline.topology.routing_edge_routers {
            let mut pcb = core_pcb.clone();
            let marking = pipeline.create_ad_marking(0, router.interface.if_id);
            pcb.ads.push(marking);
            if let Err(err) = pipeline.transport.send(router.addr, Packet::Beacon(pcb)).await {
                tracing::warn!(target = %router.addr, %err, "failed to send core pcb");
            }
        }
    }

    fn propagation_targets(&self, pipeline: &BeaconPipeline) -> Vec<EdgeRouter> {
        pipeline.topology.routing_edge_routers.clone()
    }

    async fn register(&self, pipeline: &BeaconPipeline, pcb: PathSegment) {
        let Some(first) = pcb.ads.first().map(|a| a.pcbm.clone()) else {
            return;
        };

        if let Some(&path_server) = pipeline.topology.path_servers.first() {
            let record = PathSegmentRecords {
                info: PathSegmentInfo::Core {
                    src_isd: first.spcbf.isd_id,
                    src_ad: first.ad_id,
                },
                pcb: pcb.clone(),
            };
            if let Err(err) = pipeline
                .transport
                .send(path_server, Packet::PathRec(record))
                .await
            {
                tracing::warn!(%err, "failed to register core segment with local path server");
            }
        }

        if let Some(first_hop) = pcb.ads.first() {
            if let Some(next_hop) = pipeline.topology.ifid_to_addr(first_hop.pcbm.hof.ingress_if) {
                let record = PathSegmentRecords {
                    info: PathSegmentInfo::Core {
                        src_isd: first.spcbf.isd_id,
                        src_ad: first.ad_id,
                    },
                    pcb,
                };
                if let Err(err) = pipeline.transport.send(next_hop, Packet::PathRec(record)).await {
                    tracing::warn!(%err, "failed to reverse-route core segment registration");
                }
            }
        }
    }

    async fn ingest(&self, pipeline: &BeaconPipeline, pcb: PathSegment) {
        if pcb.contains_ad(pipeline.local.ad_id) {
            tracing::debug!(ad_id = pipeline.local.ad_id, "beacon already seen, dropping");
            return;
        }
        pipeline.store_candidate(&pcb);
        if let Err(err) = pipeline.queues.beacons_tx.send(pcb) {
            tracing::warn!(%err, "beacon queue closed");
        }
    }
}
