//! Propagation completeness: within one
//! propagation tick, each `child_edge_router` receives exactly one beacon
//! message per originated down-stream PCB, and each `routing_edge_router`
//! receives one per originated core PCB plus one per drained inbound PCB.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use beacon_server::config::Config;
use beacon_server::crypto::CryptoService;
use beacon_server::path_store::PathStore;
use beacon_server::pcb::{InfoOpaqueField, IsdAs, OpaqueFieldType, PathSegment};
use beacon_server::pipeline::core::CoreRole;
use beacon_server::pipeline::{BeaconPipeline, BeaconRole, Queues};
use beacon_server::policy::PathPolicy;
use beacon_server::topology::{EdgeRouter, Interface, Topology};
use beacon_server::transport::{ChannelTransport, Packet};
use k256::ecdsa::SigningKey;
use parking_lot::Mutex;
use rand::rngs::OsRng;

fn fresh_pcb() -> PathSegment {
    PathSegment::new(InfoOpaqueField {
        of_type: OpaqueFieldType::TdcXovr,
        up_flag: false,
        timestamp: 0,
        isd_id: 1,
    })
}

#[tokio::test]
async fn one_tick_reaches_every_router_the_right_number_of_times() {
    let signing_key = SigningKey::random(&mut OsRng);
    let crypto = CryptoService::from_raw_key(&signing_key.to_bytes()).unwrap();
    let (transport, outbound_rx) = ChannelTransport::new();

    let child_a: SocketAddr = "127.0.0.1:22001".parse().unwrap();
    let child_b: SocketAddr = "127.0.0.1:22002".parse().unwrap();
    let routing_a: SocketAddr = "127.0.0.1:22003".parse().unwrap();

    let mut config = Config::default();
    config.propagation_time = 1;

    let pipeline = Arc::new(BeaconPipeline {
        local: IsdAs::new(1, 10),
        self_addr: "127.0.0.1:10000".parse().unwrap(),
        topology: Topology {
            is_core_ad: true,
            isd_id: 1,
            ad_id: 10,
            child_edge_routers: vec![
                EdgeRouter { addr: child_a, interface: Interface { if_id: 5, neighbor_ad: 100 } },
                EdgeRouter { addr: child_b, interface: Interface { if_id: 6, neighbor_ad: 101 } },
            ],
            routing_edge_routers: vec![EdgeRouter {
                addr: routing_a,
                interface: Interface { if_id: 9, neighbor_ad: 200 },
            }],
            peer_edge_routers: vec![],
            path_servers: vec!["127.0.0.1:30000".parse().unwrap()],
            certificate_servers: vec![],
        },
        config,
        crypto,
        trust_store: beacon_server::trust_store::TrustStore::new(tempfile::tempdir().unwrap().keep()),
        queues: Queues::new(),
        path_store: Mutex::new(PathStore::new(PathPolicy::default())),
        transport: Arc::new(transport),
    });

    // Pre-queue one inbound PCB as if it had already been accepted by ingest,
    // and register it as a path store candidate the way `CoreRole::ingest`
    // would have.
    let inbound = fresh_pcb();
    let inbound_id = inbound.segment_id();
    pipeline.store_candidate(&inbound);
    pipeline.queues.beacons_tx.send(inbound).unwrap();

    let role: Arc<dyn BeaconRole> = Arc::new(CoreRole);
    let handle = tokio::spawn(pipeline.clone().run_propagation(role));

    // tokio::time::interval fires immediately on its first tick, so a short
    // real sleep is enough to observe exactly one tick's worth of output.
    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.abort();
    let _ = handle.await;

    let mut per_target: std::collections::HashMap<SocketAddr, usize> = std::collections::HashMap::new();
    let mut egress_ifs_at: std::collections::HashMap<SocketAddr, Vec<u16>> = std::collections::HashMap::new();
    let mut forwarded_copy = None;
    while let Ok((target, packet)) = outbound_rx.try_recv() {
        let Packet::Beacon(pcb) = packet else { panic!("expected a Beacon packet") };
        *per_target.entry(target).or_insert(0) += 1;
        let marking = pcb.ads.last().expect("propagated beacon carries at least one ad marking");
        egress_ifs_at.entry(target).or_default().push(marking.pcbm.hof.egress_if);
        // The pre-queued inbound pcb keeps its zero timestamp; only the
        // freshly originated core/down-stream pcbs get `fresh_iof`'s
        // near-certainly-nonzero one, so this tells the two apart among
        // routing_a's two deliveries.
        if pcb.iof.timestamp == 0 {
            forwarded_copy = Some(pcb);
        }
    }

    assert_eq!(per_target.get(&child_a).copied().unwrap_or(0), 1);
    assert_eq!(per_target.get(&child_b).copied().unwrap_or(0), 1);
    // One originated core PCB + one drained inbound PCB.
    assert_eq!(per_target.get(&routing_a).copied().unwrap_or(0), 2);

    // Each edge router gets its own egress if_id (5, 6, 9), never the
    // hardcoded 0 a prior version of propagation used for every target.
    assert_eq!(egress_ifs_at[&child_a], vec![5]);
    assert_eq!(egress_ifs_at[&child_b], vec![6]);
    assert_eq!(egress_ifs_at[&routing_a], vec![9, 9]);

    // The re-propagated copy of the drained inbound PCB carries the real
    // egress if_id in its rotf, not the 0 a prior version hardcoded for
    // every target.
    let forwarded_copy = forwarded_copy.expect("drained inbound pcb must be re-propagated to routing_a");
    assert_eq!(forwarded_copy.rotf.if_id, 9);

    // The drained inbound PCB should also have been handed to registration.
    assert!(pipeline.queues.reg_rx.try_recv().is_ok());

    // Once propagated, the Path Store candidate's `last_sent_time` reflects
    // this tick rather than the 0-default it was inserted with.
    let store = pipeline.path_store.lock();
    let candidate = store.get_candidates(1)[0];
    assert_eq!(candidate.id, inbound_id);
    assert!(candidate.last_sent_time > 0);
}
