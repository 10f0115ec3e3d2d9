//! Topology loading. One immutable JSON document per AD, describing its edge
//! routers, path/certificate servers, and its `is_core_ad` role.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TopologyError;
use crate::pcb::IfId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub if_id: IfId,
    pub neighbor_ad: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRouter {
    pub addr: SocketAddr,
    pub interface: Interface,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub is_core_ad: bool,
    pub isd_id: u16,
    pub ad_id: u32,
    #[serde(default)]
    pub child_edge_routers: Vec<EdgeRouter>,
    #[serde(default)]
    pub routing_edge_routers: Vec<EdgeRouter>,
    #[serde(default)]
    pub peer_edge_routers: Vec<EdgeRouter>,
    #[serde(default)]
    pub path_servers: Vec<SocketAddr>,
    #[serde(default)]
    pub certificate_servers: Vec<SocketAddr>,
}

impl Topology {
    pub fn load(path: &Path) -> Result<Self, TopologyError> {
        let raw = std::fs::read_to_string(path).map_err(|source| TopologyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| TopologyError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Enforces the role/topology consistency that the process treats as a
    /// fatal startup error rather than a recoverable one.
    pub fn check_role(&self, role_is_core: bool, role_name: &'static str) -> Result<(), TopologyError> {
        if self.is_core_ad != role_is_core {
            return Err(TopologyError::RoleMismatch {
                role: role_name,
                found: self.is_core_ad,
            });
        }
        Ok(())
    }

    /// Looks up the address to reach `if_id` across any of our edge-router
    /// lists, used when reverse-routing a registration toward its origin.
    pub fn ifid_to_addr(&self, if_id: IfId) -> Option<SocketAddr> {
        self.child_edge_routers
            .iter()
            .chain(self.routing_edge_routers.iter())
            .chain(self.peer_edge_routers.iter())
            .find(|r| r.interface.if_id == if_id)
            .map(|r| r.addr)
    }
}
