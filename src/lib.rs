//! Beacon Server library: PCB pipeline, Path Store, and supporting
//! collaborators (trust material, crypto, policy, topology/config loading,
//! transport). The binary (`src/main.rs`) wires these into the CLI entry
//! point; everything here is usable standalone for tests
//! and for embedding in an alternate front end.

pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod error;
pub mod path_store;
pub mod pcb;
pub mod pipeline;
pub mod policy;
pub mod topology;
pub mod transport;
pub mod trust_store;
