//! Local BS specialization: verifies inbound beacons lazily, issuing cert/TRC
//! requests on a miss and re-draining `unverified_beacons` whenever a reply
//! lands. `REQUESTS_TIMEOUT` bounds how often an outstanding request is
//! reissued.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;

use super::{now_secs, BeaconPipeline, BeaconRole};
use crate::crypto::{CertChain, Trc};
use crate::error::CryptoError;
use crate::pcb::{IsdAs, PathSegment};
use crate::topology::EdgeRouter;
use crate::transport::{CertRequest, Packet, PathSegmentInfo, PathSegmentRecords, TrcRequest};

const REQUESTS_TIMEOUT: u64 = 10;

/// An outstanding request is resendable once it's older than the timeout;
/// shared by the TRC and cert request paths.
fn request_is_stale(last_sent: u64, now: u64) -> bool {
    now.saturating_sub(last_sent) > REQUESTS_TIMEOUT
}

pub struct LocalRole {
    registered_beacons: Mutex<Vec<PathSegment>>,
    requested_certs: Mutex<HashMap<(IsdAs, u32), u64>>,
    requested_trcs: Mutex<HashMap<(u16, u32), u64>>,
}

impl Default for LocalRole {
    fn default() -> Self {
        Self {
            registered_beacons: Mutex::new(Vec::new()),
            requested_certs: Mutex::new(HashMap::new()),
            requested_trcs: Mutex::new(HashMap::new()),
        }
    }
}

impl LocalRole {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_registered(&self, pcb: &PathSegment) -> bool {
        self.registered_beacons.lock().iter().any(|reg| reg.compare_hops(pcb))
    }

    /// Trust-fetch controller: returns `true` only once both the TRC
    /// and (cert-or-core-ad) conditions are satisfied, issuing/resending a
    /// request as a side effect whenever they are not.
    async fn check_certs_trc(&self, pipeline: &BeaconPipeline, subject: IsdAs, trc_version: u32, if_id: u16) -> bool {
        let trc_key = (subject.isd_id, trc_version);
        if !pipeline.trust_store.has_trc(pipeline.local, subject.isd_id, trc_version) {
            self.maybe_request_trc(pipeline, subject, trc_version, if_id, trc_key).await;
            return false;
        }

        let trc = match self.load_trc(pipeline, subject.isd_id, trc_version) {
            Some(trc) => trc,
            None => return false,
        };

        let cert_key = (subject, 0);
        if pipeline.trust_store.has_cert(pipeline.local, subject, 0) || trc.core_ads.contains(&subject) {
            return true;
        }

        self.maybe_request_cert(pipeline, subject, if_id, cert_key).await;
        false
    }

    async fn maybe_request_trc(&self, pipeline: &BeaconPipeline, subject: IsdAs, trc_version: u32, if_id: u16, key: (u16, u32)) {
        let now = now_secs();
        let mut requested = self.requested_trcs.lock();
        let should_send = match requested.get(&key) {
            Some(&last) => request_is_stale(last, now),
            None => true,
        };
        if should_send {
            requested.insert(key, now);
            drop(requested);
            if let Some(&cert_server) = pipeline.topology.certificate_servers.first() {
                let req = TrcRequest {
                    src_addr: pipeline.self_addr,
                    if_id,
                    src_isd: pipeline.local.isd_id,
                    src_ad: pipeline.local.ad_id,
                    target_isd: subject.isd_id,
                    trc_version,
                };
                if let Err(err) = pipeline.transport.send(cert_server, Packet::TrcReqLocal(req)).await {
                    tracing::warn!(%err, "failed to send trc request");
                }
            }
        }
    }

    async fn maybe_request_cert(&self, pipeline: &BeaconPipeline, subject: IsdAs, if_id: u16, key: (IsdAs, u32)) {
        let now = now_secs();
        let mut requested = self.requested_certs.lock();
        let should_send = match requested.get(&key) {
            Some(&last) => request_is_stale(last, now),
            None => true,
        };
        if should_send {
            requested.insert(key, now);
            drop(requested);
            if let Some(&cert_server) = pipeline.topology.certificate_servers.first() {
                let req = CertRequest {
                    src_addr: pipeline.self_addr,
                    if_id,
                    src_isd: pipeline.local.isd_id,
                    src_ad: pipeline.local.ad_id,
                    target_isd: subject.isd_id,
                    target_ad: subject.ad_id,
                    cert_version: 0,
                };
                if let Err(err) = pipeline.transport.send(cert_server, Packet::CertReqLocal(req)).await {
                    tracing::warn!(%err, "failed to send cert request");
                }
            }
        }
    }

    fn load_trc(&self, pipeline: &BeaconPipeline, target_isd: u16, version: u32) -> Option<Trc> {
        let bytes = pipeline.trust_store.load_trc(pipeline.local, target_isd, version).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(trc) => Some(trc),
            Err(err) => {
                let err = CryptoError::MalformedTrc(err.to_string());
                tracing::warn!(isd = target_isd, version, %err, "discarding unparseable trc");
                None
            }
        }
    }

    fn load_cert(&self, pipeline: &BeaconPipeline, subject: IsdAs) -> Option<CertChain> {
        let bytes = pipeline.trust_store.load_cert(pipeline.local, subject, 0).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(chain) => Some(chain),
            Err(err) => {
                let err = CryptoError::MalformedChain(err.to_string());
                tracing::warn!(%subject, %err, "discarding unparseable cert chain");
                None
            }
        }
    }

    fn verify_beacon(&self, pipeline: &BeaconPipeline, pcb: &PathSegment, subject: IsdAs, trc: &Trc) -> bool {
        let Some(last) = pcb.ads.last() else {
            return false;
        };
        let Some(sig) = last.sig.as_ref() else {
            return false;
        };
        let chain = match self.load_cert(pipeline, subject) {
            Some(chain) => chain,
            None if trc.core_ads.contains(&subject) => CertChain {
                subject,
                issuer: subject,
                public_key: *trc.key_for(subject).unwrap_or(&[0u8; 33]),
            },
            None => return false,
        };
        pipeline.crypto.verify(&last.signing_bytes(), sig, subject, &chain, trc)
    }

    /// Shared by `ingest` and by the post-reply re-drain of
    /// `unverified_beacons`; `true` means the PCB was consumed (accepted or
    /// dropped), `false` means it must stay in `unverified_beacons`.
    async fn process_pcb(&self, pipeline: &BeaconPipeline, pcb: PathSegment) -> bool {
        if self.is_registered(&pcb) {
            pipeline.store_candidate(&pcb);
            if let Err(err) = pipeline.queues.beacons_tx.send(pcb) {
                tracing::warn!(%err, "beacon queue closed");
            }
            return true;
        }

        let Some(last) = pcb.last_pcbm() else {
            return true;
        };
        let subject = IsdAs::new(last.spcbf.isd_id, last.ad_id);
        let trc_version = pcb.rotf.rot_version;
        let if_id = pcb.rotf.if_id;

        if !self.check_certs_trc(pipeline, subject, trc_version, if_id).await {
            return false;
        }

        let Some(trc) = self.load_trc(pipeline, subject.isd_id, trc_version) else {
            return false;
        };

        if self.verify_beacon(pipeline, &pcb, subject, &trc) {
            self.registered_beacons.lock().push(pcb.clone());
            pipeline.store_candidate(&pcb);
            if let Err(err) = pipeline.queues.beacons_tx.send(pcb) {
                tracing::warn!(%err, "beacon queue closed");
            }
        } else {
            tracing::warn!(ad = %subject, "beacon failed verification, dropping");
        }
        true
    }

    /// Drains `unverified_beacons` exactly once, re-running the check/verify
    /// logic on each entry; anything still not ready is pushed back.
    pub async fn handle_unverified_beacons(&self, pipeline: &BeaconPipeline) {
        let mut pending = Vec::new();
        while let Ok(pcb) = pipeline.queues.unverified_rx.try_recv() {
            pending.push(pcb);
        }
        for pcb in pending {
            if !self.process_pcb(pipeline, pcb.clone()).await {
                if let Err(err) = pipeline.queues.unverified_tx.send(pcb) {
                    tracing::warn!(%err, "unverified beacon queue closed");
                }
            }
        }
    }

    pub async fn process_cert_rep(&self, pipeline: &BeaconPipeline, reply: crate::transport::CertReply) {
        let subject = IsdAs::new(reply.target_isd, reply.target_ad);
        if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(&reply.cert_b64) {
            if let Err(err) = pipeline.trust_store.store_cert(pipeline.local, subject, reply.cert_version, &bytes) {
                tracing::warn!(%err, "failed to persist certificate chain");
            }
        }
        self.requested_certs.lock().remove(&(subject, reply.cert_version));
        self.handle_unverified_beacons(pipeline).await;
    }

    pub async fn process_trc_rep(&self, pipeline: &BeaconPipeline, reply: crate::transport::TrcReply) {
        if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(&reply.trc_b64) {
            if let Err(err) = pipeline.trust_store.store_trc(pipeline.local, reply.target_isd, reply.trc_version, &bytes) {
                tracing::warn!(%err, "failed to persist trc");
            }
        }
        self.requested_trcs.lock().remove(&(reply.target_isd, reply.trc_version));
        self.handle_unverified_beacons(pipeline).await;
    }
}

#[async_trait]
impl BeaconRole for LocalRole {
    async fn originate(&self, _pipeline: &BeaconPipeline) {
        // Local BS does not originate beacons; it only verifies and
        // re-propagates/registers what it receives.
    }

    fn propagation_targets(&self, _pipeline: &BeaconPipeline) -> Vec<EdgeRouter> {
        Vec::new()
    }

    async fn register(&self, pipeline: &BeaconPipeline, pcb: PathSegment) {
        if let Some(&path_server) = pipeline.topology.path_servers.first() {
            let record = PathSegmentRecords {
                info: PathSegmentInfo::Up,
                pcb: pcb.clone(),
            };
            if let Err(err) = pipeline.transport.send(path_server, Packet::PathRec(record)).await {
                tracing::warn!(%err, "failed to register up-segment");
            }
        }

        if let Some(first_hop) = pcb.ads.first() {
            if let Some(next_hop) = pipeline.topology.ifid_to_addr(first_hop.pcbm.hof.ingress_if) {
                let record = PathSegmentRecords {
                    info: PathSegmentInfo::Down,
                    pcb,
                };
                if let Err(err) = pipeline.transport.send(next_hop, Packet::PathRec(record)).await {
                    tracing::warn!(%err, "failed to register down-segment");
                }
            }
        }
    }

    async fn ingest(&self, pipeline: &BeaconPipeline, pcb: PathSegment) {
        if !self.process_pcb(pipeline, pcb.clone()).await {
            if let Err(err) = pipeline.queues.unverified_tx.send(pcb) {
                tracing::warn!(%err, "unverified beacon queue closed");
            }
        }
    }

    async fn handle_cert_reply(&self, pipeline: &BeaconPipeline, reply: crate::transport::CertReply) {
        self.process_cert_rep(pipeline, reply).await;
    }

    async fn handle_trc_reply(&self, pipeline: &BeaconPipeline, reply: crate::transport::TrcReply) {
        self.process_trc_rep(pipeline, reply).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::crypto::CryptoService;
    use crate::path_store::PathStore;
    use crate::pcb::{AdMarking, HopOpaqueField, InfoOpaqueField, OpaqueFieldType, PcbMarking, RotField, SupportPcbField};
    use crate::pipeline::Queues;
    use crate::policy::PathPolicy;
    use crate::topology::{EdgeRouter, Interface, Topology};
    use crate::transport::{ChannelTransport, Packet, TrcReply};
    use k256::ecdsa::SigningKey;
    use rand::rngs::OsRng;

    fn test_pipeline(cert_servers: Vec<std::net::SocketAddr>) -> (Arc<BeaconPipeline>, flume::Receiver<(std::net::SocketAddr, Packet)>) {
        let signing_key = SigningKey::random(&mut OsRng);
        let crypto = CryptoService::from_raw_key(&signing_key.to_bytes()).unwrap();
        let (transport, outbound_rx) = ChannelTransport::new();
        let pipeline = Arc::new(BeaconPipeline {
            local: IsdAs::new(1, 20),
            self_addr: "127.0.0.1:10000".parse().unwrap(),
            topology: Topology {
                is_core_ad: false,
                isd_id: 1,
                ad_id: 20,
                child_edge_routers: vec![],
                routing_edge_routers: vec![EdgeRouter {
                    addr: "127.0.0.1:20001".parse().unwrap(),
                    interface: Interface { if_id: 7, neighbor_ad: 11 },
                }],
                peer_edge_routers: vec![],
                path_servers: vec!["127.0.0.1:30000".parse().unwrap()],
                certificate_servers: cert_servers,
            },
            config: Config::default(),
            crypto,
            trust_store: crate::trust_store::TrustStore::new(tempfile::tempdir().unwrap().keep()),
            queues: Queues::new(),
            path_store: Mutex::new(PathStore::new(PathPolicy::default())),
            transport: Arc::new(transport),
        });
        (pipeline, outbound_rx)
    }

    fn pcb_from_upstream(upstream_crypto: &CryptoService, upstream: IsdAs) -> PathSegment {
        let mut pcb = PathSegment::new(InfoOpaqueField {
            of_type: OpaqueFieldType::TdcXovr,
            up_flag: false,
            timestamp: 0,
            isd_id: upstream.isd_id,
        });
        pcb.rotf = RotField { rot_version: 3, if_id: 7 };
        let pcbm = PcbMarking {
            ad_id: upstream.ad_id,
            ssf: 0,
            hof: HopOpaqueField { ingress_if: 1, egress_if: 7 },
            spcbf: SupportPcbField { isd_id: upstream.isd_id },
        };
        let mut marking = AdMarking { pcbm, pms: vec![], sig: None };
        marking.sig = Some(upstream_crypto.sign(&marking.signing_bytes()));
        pcb.ads.push(marking);
        pcb
    }

    #[test]
    fn request_is_stale_respects_ten_second_window() {
        assert!(!request_is_stale(1000, 1005));
        assert!(!request_is_stale(1000, 1010));
        assert!(request_is_stale(1000, 1011));
    }

    #[tokio::test]
    async fn trust_miss_requests_trc_and_queues_unverified() {
        let cert_server: std::net::SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let (pipeline, outbound_rx) = test_pipeline(vec![cert_server]);
        let role = LocalRole::new();
        let upstream_crypto = CryptoService::from_raw_key(&SigningKey::random(&mut OsRng).to_bytes()).unwrap();
        let upstream = IsdAs::new(1, 11);
        let pcb = pcb_from_upstream(&upstream_crypto, upstream);

        role.ingest(&pipeline, pcb).await;

        assert!(pipeline.queues.unverified_rx.try_recv().is_ok());
        let (target, packet) = outbound_rx.try_recv().unwrap();
        assert_eq!(target, cert_server);
        assert!(matches!(packet, Packet::TrcReqLocal(_)));
    }

    #[tokio::test]
    async fn full_trust_miss_then_verify_flow() {
        let cert_server: std::net::SocketAddr = "127.0.0.1:40001".parse().unwrap();
        let (pipeline, _outbound_rx) = test_pipeline(vec![cert_server]);
        let role = LocalRole::new();

        let upstream = IsdAs::new(1, 11);
        let upstream_crypto = CryptoService::from_raw_key(&SigningKey::random(&mut OsRng).to_bytes()).unwrap();
        let pcb = pcb_from_upstream(&upstream_crypto, upstream);

        role.ingest(&pipeline, pcb.clone()).await;
        assert!(pipeline.queues.beacons_rx.try_recv().is_err(), "not verified yet");

        let trc = crate::crypto::Trc {
            version: 3,
            core_ads: vec![upstream],
            core_keys: vec![(upstream, upstream_crypto.public_key_bytes())],
        };
        let trc_bytes = serde_json::to_vec(&trc).unwrap();
        let trc_reply = TrcReply {
            target_isd: upstream.isd_id,
            trc_version: 3,
            trc_b64: base64::engine::general_purpose::STANDARD.encode(trc_bytes),
        };
        role.process_trc_rep(&pipeline, trc_reply).await;

        assert!(pipeline.trust_store.has_trc(pipeline.local, upstream.isd_id, 3));
        assert!(role.registered_beacons.lock().iter().any(|r| r.compare_hops(&pcb)));
        let delivered = pipeline.queues.beacons_rx.try_recv().expect("verified beacon delivered");
        assert!(delivered.compare_hops(&pcb));
        assert_eq!(pipeline.path_store.lock().len(), 1, "verified beacon becomes a path store candidate");
    }

    #[tokio::test]
    async fn unverifiable_beacon_never_reaches_beacons_queue() {
        let cert_server: std::net::SocketAddr = "127.0.0.1:40002".parse().unwrap();
        let (pipeline, _outbound_rx) = test_pipeline(vec![cert_server]);
        let role = LocalRole::new();

        let upstream = IsdAs::new(1, 11);
        let upstream_crypto = CryptoService::from_raw_key(&SigningKey::random(&mut OsRng).to_bytes()).unwrap();
        let pcb = pcb_from_upstream(&upstream_crypto, upstream);

        let wrong_key = CryptoService::from_raw_key(&SigningKey::random(&mut OsRng).to_bytes()).unwrap();
        let trc = crate::crypto::Trc {
            version: 3,
            core_ads: vec![upstream],
            core_keys: vec![(upstream, wrong_key.public_key_bytes())],
        };
        pipeline
            .trust_store
            .store_trc(pipeline.local, upstream.isd_id, 3, &serde_json::to_vec(&trc).unwrap())
            .unwrap();

        role.ingest(&pipeline, pcb).await;

        assert!(pipeline.queues.beacons_rx.try_recv().is_err());
        assert!(pipeline.queues.unverified_rx.try_recv().is_err());
        assert_eq!(pipeline.path_store.lock().len(), 0, "failed verification never becomes a candidate");
    }
}
