//! Beacon Pipeline: the skeleton shared by the core and local dialects.
//! Three `flume` queues, a shared `PathStore`, and a `BeaconRole` strategy
//! object hold everything role-specific: a role discriminator over one
//! generic pipeline, the idiomatic Rust shape for "shared skeleton, varying
//! strategy" (see design notes).

pub mod core;
pub mod local;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::Config;
use crate::crypto::CryptoService;
use crate::path_store::{PathStore, PathStoreRecord};
use crate::pcb::{AdMarking, HopOpaqueField, IsdAs, PathSegment, PcbMarking, PeerMarking, SupportPcbField, SupportPeerField};
use crate::topology::{EdgeRouter, Topology};
use crate::transport::{CertReply, OutboundTransport, Packet, TrcReply};
use crate::trust_store::TrustStore;

/// 24h in seconds, added before truncating to the 16-bit origination field
/// (§4.6); also used to reconstruct a PCB's absolute origination time for
/// Path Store bookkeeping.
pub const DELTA: u64 = 24 * 60 * 60;
/// Truncated timestamp resolution, in seconds.
pub const TIME_INTERVAL: u64 = 4;

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

/// Strategy hook distinguishing a core BS from a local BS over the shared
/// pipeline skeleton.
#[async_trait]
pub trait BeaconRole: Send + Sync {
    /// Called once per propagation tick before the `beacons` queue is
    /// drained, to originate any fresh PCBs for this AD's role.
    async fn originate(&self, pipeline: &BeaconPipeline);

    /// Decides the set of edge routers a drained-and-marked PCB should be
    /// sent to during propagation. Each router's own interface carries the
    /// egress `if_id` this AD marking and the forwarded copy's `rotf.if_id`
    /// must use for that hop.
    fn propagation_targets<'a>(&self, pipeline: &'a BeaconPipeline) -> Vec<EdgeRouter>;

    /// Emits whatever registration messages this role sends for a
    /// fully-marked, signature-stripped PCB pulled off `reg_queue`.
    async fn register(&self, pipeline: &BeaconPipeline, pcb: PathSegment);

    /// Accepts or rejects an inbound PCB, enqueuing it appropriately.
    async fn ingest(&self, pipeline: &BeaconPipeline, pcb: PathSegment);

    /// Handles an inbound certificate chain reply. Only the local BS role
    /// issues cert requests, so the core role's default is a no-op.
    async fn handle_cert_reply(&self, _pipeline: &BeaconPipeline, _reply: CertReply) {}

    /// Handles an inbound TRC reply. Only the local BS role issues TRC
    /// requests, so the core role's default is a no-op.
    async fn handle_trc_reply(&self, _pipeline: &BeaconPipeline, _reply: TrcReply) {}
}

pub struct Queues {
    pub beacons_tx: flume::Sender<PathSegment>,
    pub beacons_rx: flume::Receiver<PathSegment>,
    pub reg_tx: flume::Sender<PathSegment>,
    pub reg_rx: flume::Receiver<PathSegment>,
    pub unverified_tx: flume::Sender<PathSegment>,
    pub unverified_rx: flume::Receiver<PathSegment>,
}

impl Queues {
    pub fn new() -> Self {
        let (beacons_tx, beacons_rx) = flume::unbounded();
        let (reg_tx, reg_rx) = flume::unbounded();
        let (unverified_tx, unverified_rx) = flume::unbounded();
        Self {
            beacons_tx,
            beacons_rx,
            reg_tx,
            reg_rx,
            unverified_tx,
            unverified_rx,
        }
    }
}

impl Default for Queues {
    fn default() -> Self {
        Self::new()
    }
}

/// The shared pipeline state: topology, config, crypto, queues, and the path
/// store, wrapped so worker tasks can hold an `Arc` each.
pub struct BeaconPipeline {
    pub local: IsdAs,
    pub self_addr: SocketAddr,
    pub topology: Topology,
    pub config: Config,
    pub crypto: CryptoService,
    pub trust_store: TrustStore,
    pub queues: Queues,
    pub path_store: Mutex<PathStore>,
    pub transport: Arc<dyn OutboundTransport>,
}

impl BeaconPipeline {
    /// Builds the AD marking this BS contributes for a hop from `ingress_if`
    /// to `egress_if`, signing the textual concatenation of its fields.
    pub fn create_ad_marking(&self, ingress_if: u16, egress_if: u16) -> AdMarking {
        let pcbm = PcbMarking {
            ad_id: self.local.ad_id,
            ssf: 0,
            hof: HopOpaqueField { ingress_if, egress_if },
            spcbf: SupportPcbField { isd_id: self.local.isd_id },
        };

        let pms: Vec<PeerMarking> = self
            .topology
            .peer_edge_routers
            .iter()
            .map(|router| PeerMarking {
                neighbor_ad: router.interface.neighbor_ad,
                hof: HopOpaqueField {
                    ingress_if: router.interface.if_id,
                    egress_if,
                },
                spf: SupportPeerField { isd_id: self.local.isd_id },
            })
            .collect();

        let mut marking = AdMarking { pcbm, pms, sig: None };
        let sig = self.crypto.sign(&marking.signing_bytes());
        marking.sig = Some(sig);
        marking
    }

    /// Inserts an accepted PCB into the Path Store as a fresh candidate.
    /// Called once per hop the beacon is accepted at (see "PCB lifecycle",
    /// §3): the candidate pool tracks every beacon this AD has seen and
    /// trusts, independent of whether it is also re-propagated.
    pub fn store_candidate(&self, pcb: &PathSegment) {
        let now = now_secs();
        let origin = pcb.timestamp(DELTA, TIME_INTERVAL);
        let record = PathStoreRecord::new(Arc::new(pcb.clone()), now, origin);
        self.path_store.lock().add_record(record, now);
    }

    /// Dispatches an inbound packet.
    pub async fn handle_packet(&self, role: &dyn BeaconRole, packet: Packet) {
        match packet {
            Packet::Beacon(pcb) => role.ingest(self, pcb).await,
            Packet::IfidReq | Packet::IfidRep => {
                tracing::debug!("ifid request/reply handling not implemented");
            }
            Packet::CertRep(reply) => role.handle_cert_reply(self, reply).await,
            Packet::TrcRep(reply) => role.handle_trc_reply(self, reply).await,
            Packet::CertReqLocal(_) | Packet::TrcReqLocal(_) | Packet::PathRec(_) => {
                tracing::debug!("packet type not handled by this role");
            }
        }
    }

    /// Runs the propagation worker loop: one tick per `propagation_time`
    /// seconds, originate (role-specific), then drain `beacons` and forward.
    pub async fn run_propagation(self: Arc<Self>, role: Arc<dyn BeaconRole>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(self.config.propagation_time.max(1)));
        loop {
            interval.tick().await;
            role.originate(&self).await;

            while let Ok(pcb) = self.queues.beacons_rx.try_recv() {
                let ingress_if = pcb.rotf.if_id;
                for router in role.propagation_targets(&self) {
                    let egress_if = router.interface.if_id;
                    let marking = self.create_ad_marking(ingress_if, egress_if);
                    let mut outbound = pcb.clone();
                    outbound.rotf.if_id = egress_if;
                    outbound.ads.push(marking);
                    if let Err(err) = self.transport.send(router.addr, Packet::Beacon(outbound)).await {
                        tracing::warn!(target = %router.addr, %err, "failed to propagate beacon");
                    }
                }
                self.path_store.lock().mark_sent(pcb.segment_id(), now_secs());
                if let Err(err) = self.queues.reg_tx.send(pcb) {
                    tracing::warn!(%err, "registration queue closed");
                }
            }
        }
    }

    /// Runs the registration worker loop: one tick per `registration_time`
    /// seconds, drain `reg_queue`, strip signatures, and hand off to the
    /// role's registration logic.
    pub async fn run_registration(self: Arc<Self>, role: Arc<dyn BeaconRole>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(self.config.registration_time.max(1)));
        loop {
            interval.tick().await;
            while let Ok(mut pcb) = self.queues.reg_rx.try_recv() {
                if !self.config.registers_paths {
                    tracing::debug!("registration disabled, discarding drained path segment");
                    continue;
                }
                let marking = self.create_ad_marking(pcb.rotf.if_id, 0);
                pcb.ads.push(marking);
                pcb.remove_signatures();
                role.register(&self, pcb).await;
            }
        }
    }
}
