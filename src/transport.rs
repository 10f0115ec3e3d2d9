//! Outbound transport shim and the wire packet types. The real
//! dispatcher/socket layer is out of scope; this defines the interface the
//! pipeline sends through and provides a channel-backed implementation,
//! wrapping an outbound `flume::Sender`, for wiring the binary and for
//! tests.

use std::net::SocketAddr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::pcb::PathSegment;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertRequest {
    pub src_addr: SocketAddr,
    pub if_id: u16,
    pub src_isd: u16,
    pub src_ad: u32,
    pub target_isd: u16,
    pub target_ad: u32,
    pub cert_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrcRequest {
    pub src_addr: SocketAddr,
    pub if_id: u16,
    pub src_isd: u16,
    pub src_ad: u32,
    pub target_isd: u16,
    pub trc_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertReply {
    pub target_isd: u16,
    pub target_ad: u32,
    pub cert_version: u32,
    pub cert_b64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrcReply {
    pub target_isd: u16,
    pub trc_version: u32,
    pub trc_b64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PathSegmentInfo {
    Up,
    Down,
    Core { src_isd: u16, src_ad: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSegmentRecords {
    pub info: PathSegmentInfo,
    pub pcb: PathSegment,
}

/// The tagged union of everything the beacon server may send or receive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Packet {
    IfidReq,
    IfidRep,
    Beacon(PathSegment),
    CertReqLocal(CertRequest),
    CertRep(CertReply),
    TrcReqLocal(TrcRequest),
    TrcRep(TrcReply),
    PathRec(PathSegmentRecords),
}

#[async_trait]
pub trait OutboundTransport: Send + Sync {
    async fn send(&self, to: SocketAddr, packet: Packet) -> Result<(), TransportError>;
}

/// In-memory transport backed by a `flume` channel, used by the binary's own
/// loopback wiring and by tests. A production dispatcher would implement
/// `OutboundTransport` over a real UDP/TCP socket.
#[derive(Clone)]
pub struct ChannelTransport {
    sender: flume::Sender<(SocketAddr, Packet)>,
}

impl ChannelTransport {
    pub fn new() -> (Self, flume::Receiver<(SocketAddr, Packet)>) {
        let (sender, receiver) = flume::unbounded();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl OutboundTransport for ChannelTransport {
    async fn send(&self, to: SocketAddr, packet: Packet) -> Result<(), TransportError> {
        self.sender.send((to, packet)).map_err(|_| TransportError::Closed)
    }
}
