//! CLI entry point: `beacon_server {core|local} <IP> <topo_file> <conf_file>`.
//! Loads topology/config/policy/key, wires the pipeline skeleton to the
//! chosen role, and supervises the propagation, registration, and dispatch
//! workers as a `JoinSet` until shutdown.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine;
use clap::{Parser, ValueEnum};
use parking_lot::Mutex;
use tokio::task::JoinSet;

use beacon_server::config::Config;
use beacon_server::crypto::CryptoService;
use beacon_server::path_store::PathStore;
use beacon_server::pcb::IsdAs;
use beacon_server::pipeline::core::CoreRole;
use beacon_server::pipeline::local::LocalRole;
use beacon_server::pipeline::{BeaconPipeline, BeaconRole, Queues};
use beacon_server::policy::PathPolicy;
use beacon_server::topology::Topology;
use beacon_server::transport::ChannelTransport;
use beacon_server::trust_store::TrustStore;

/// Port the beacon server binds for inbound traffic. The real socket/dispatcher
/// layer is out of scope; this only gives `self_addr` a concrete value
/// for reverse-routing and request `src_addr` fields.
const BEACON_SERVER_PORT: u16 = 31040;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Role {
    Core,
    Local,
}

/// `beacon_server {core|local} <IP> <topo_file> <conf_file>`.
#[derive(Debug, Parser)]
#[command(name = "beacon_server", version, about = "Path-construction beacon server")]
struct Cli {
    role: Role,
    ip: IpAddr,
    topo_file: PathBuf,
    conf_file: PathBuf,
}

/// Prints the full cause chain of a fatal startup error (missing key
/// file, bad topology, wrong role assertion) and aborts the process.
fn fatal(err: anyhow::Error) -> ! {
    tracing::error!(error = %err, "fatal startup error");
    eprintln!("beacon_server: fatal: {err:#}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let topology = Topology::load(&cli.topo_file).unwrap_or_else(|err| fatal(err.into()));
    let role_is_core = matches!(cli.role, Role::Core);
    let role_name = if role_is_core { "core" } else { "local" };
    if let Err(err) = topology.check_role(role_is_core, role_name) {
        fatal(err.into());
    }

    let config = Config::load(&cli.conf_file).unwrap_or_else(|err| fatal(err.into()));
    let policy = PathPolicy::load(&config.policy_file);

    let key_b64 = std::fs::read_to_string(&config.key_file).unwrap_or_else(|err| {
        fatal(anyhow::Error::new(err).context(format!("reading signing key {}", config.key_file.display())))
    });
    let key_bytes = base64::engine::general_purpose::STANDARD
        .decode(key_b64.trim())
        .unwrap_or_else(|err| fatal(anyhow::Error::new(err).context("decoding signing key")));
    let crypto = CryptoService::from_raw_key(&key_bytes).unwrap_or_else(|err| fatal(anyhow::Error::new(err)));

    let local = IsdAs::new(topology.isd_id, topology.ad_id);
    let self_addr = SocketAddr::new(cli.ip, BEACON_SERVER_PORT);
    let trust_store = TrustStore::new(config.trust_root_dir.clone());
    let (transport, _outbound_rx) = ChannelTransport::new();

    tracing::info!(%local, %self_addr, role = role_name, "beacon server starting");

    let pipeline = Arc::new(BeaconPipeline {
        local,
        self_addr,
        topology,
        config,
        crypto,
        trust_store,
        queues: Queues::new(),
        path_store: Mutex::new(PathStore::new(policy)),
        transport: Arc::new(transport),
    });

    let role: Arc<dyn BeaconRole> = if role_is_core {
        Arc::new(CoreRole)
    } else {
        Arc::new(LocalRole::new())
    };

    // The real socket/dispatcher layer (out of scope here) would feed inbound
    // packets into this sender; holding it here keeps the dispatch loop
    // alive (awaiting on an always-open channel) rather than exiting the
    // instant it is constructed.
    let (_inbound_tx, inbound_rx) = flume::unbounded::<beacon_server::transport::Packet>();

    let mut workers = JoinSet::new();
    workers.spawn(pipeline.clone().run_propagation(role.clone()));
    workers.spawn(pipeline.clone().run_registration(role.clone()));
    workers.spawn(beacon_server::dispatch::run(pipeline.clone(), role.clone(), inbound_rx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
        Some(result) = workers.join_next() => {
            if let Err(err) = result {
                tracing::error!(%err, "worker task panicked");
            }
        }
    }
}
