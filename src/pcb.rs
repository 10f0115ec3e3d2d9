//! The path-construction beacon data model: `IsdAs`, opaque fields, AD/peer
//! markings, and the `PathSegment` (PCB) itself.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;

pub type IfId = u16;

/// An AD's identity within an ISD: `(isd_id, ad_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IsdAs {
    pub isd_id: u16,
    pub ad_id: u32,
}

impl IsdAs {
    pub const fn new(isd_id: u16, ad_id: u32) -> Self {
        Self { isd_id, ad_id }
    }
}

impl fmt::Display for IsdAs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.isd_id, self.ad_id)
    }
}

/// Opaque field type tag carried in `InfoOpaqueField`. Only the cross-over
/// variant used by beacon origination is modeled; others pass through
/// untouched once a PCB is relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpaqueFieldType {
    TdcXovr,
}

/// `iof` — governs how a PCB was produced and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoOpaqueField {
    pub of_type: OpaqueFieldType,
    pub up_flag: bool,
    /// 4-second resolution truncated timestamp; see core origination timing.
    pub timestamp: u16,
    pub isd_id: u16,
}

/// `rotf` — the TRC version this PCB's latest signature should be checked
/// against, plus the ingress interface at the last hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RotField {
    pub rot_version: u32,
    pub if_id: IfId,
}

/// A hop opaque field: the ingress/egress interfaces an AD marking traverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopOpaqueField {
    pub ingress_if: IfId,
    pub egress_if: IfId,
}

impl fmt::Display for HopOpaqueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.ingress_if, self.egress_if)
    }
}

/// `spcbf` — support field naming the ISD an AD marking was produced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportPcbField {
    pub isd_id: u16,
}

impl fmt::Display for SupportPcbField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.isd_id)
    }
}

/// `spf` — the peer-marking analogue of `spcbf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportPeerField {
    pub isd_id: u16,
}

impl fmt::Display for SupportPeerField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.isd_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcbMarking {
    pub ad_id: u32,
    pub ssf: u8,
    pub hof: HopOpaqueField,
    pub spcbf: SupportPcbField,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMarking {
    pub neighbor_ad: u32,
    pub hof: HopOpaqueField,
    pub spf: SupportPeerField,
}

impl fmt::Display for PeerMarking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.neighbor_ad, self.hof, self.spf)
    }
}

/// One AD's signed contribution to a PCB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdMarking {
    pub pcbm: PcbMarking,
    pub pms: Vec<PeerMarking>,
    /// Absent once a PCB has had its signatures stripped for registration.
    pub sig: Option<Vec<u8>>,
}

impl AdMarking {
    /// The textual concatenation that is signed and, later, re-verified:
    /// stringified struct members as the signing input. This must stay
    /// byte-for-byte stable.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut s = String::new();
        s.push_str(&self.pcbm.ad_id.to_string());
        s.push_str(&self.pcbm.hof.to_string());
        s.push_str(&self.pcbm.spcbf.to_string());
        for pm in &self.pms {
            s.push_str(&pm.to_string());
        }
        s.into_bytes()
    }
}

/// A path-construction beacon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSegment {
    pub iof: InfoOpaqueField,
    pub rotf: RotField,
    pub ads: Vec<AdMarking>,
}

impl PathSegment {
    pub fn new(iof: InfoOpaqueField) -> Self {
        Self {
            iof,
            rotf: RotField::default(),
            ads: Vec::new(),
        }
    }

    /// Stable hash over the AD sequence, used as the Path Store record key.
    pub fn segment_id(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for ad in &self.ads {
            ad.pcbm.ad_id.hash(&mut hasher);
            ad.pcbm.hof.ingress_if.hash(&mut hasher);
            ad.pcbm.hof.egress_if.hash(&mut hasher);
        }
        hasher.finish()
    }

    pub fn n_hops(&self) -> usize {
        self.ads.len()
    }

    pub fn n_peer_links(&self) -> usize {
        self.ads.iter().map(|a| a.pms.len()).sum()
    }

    /// Reconstructs the absolute origination time from the truncated 16-bit
    /// field, inverting the formula in core origination.
    pub fn timestamp(&self, delta: u64, time_interval: u64) -> u64 {
        let scaled = self.iof.timestamp as u64 * time_interval;
        scaled.wrapping_sub(delta)
    }

    /// True if `subject` already appears among this PCB's AD markings —
    /// the loop-freedom check.
    pub fn contains_ad(&self, subject: u32) -> bool {
        self.ads.iter().any(|a| a.pcbm.ad_id == subject)
    }

    /// Structural comparison used by the Local BS to recognize a beacon whose
    /// hop sequence it has already registered, independent of signatures.
    pub fn compare_hops(&self, other: &PathSegment) -> bool {
        if self.ads.len() != other.ads.len() {
            return false;
        }
        self.ads.iter().zip(other.ads.iter()).all(|(a, b)| {
            a.pcbm.ad_id == b.pcbm.ad_id
                && a.pcbm.hof.ingress_if == b.pcbm.hof.ingress_if
                && a.pcbm.hof.egress_if == b.pcbm.hof.egress_if
        })
    }

    pub fn last_pcbm(&self) -> Option<&PcbMarking> {
        self.ads.last().map(|a| &a.pcbm)
    }

    /// Strips all signatures, as done before a PCB is handed to registration.
    pub fn remove_signatures(&mut self) {
        for ad in &mut self.ads {
            ad.sig = None;
        }
    }
}
