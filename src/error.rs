//! Error types, one `thiserror` enum per concern, matching the module boundaries
//! of the rest of the crate. Nothing here is meant to cross the pipeline's
//! internal control flow — expected, recoverable conditions (a missing cert, a
//! bad signature, a looped beacon) are ordinary branches in the worker loops,
//! not `Result::Err`. These enums cover the things that really can fail:
//! malformed on-disk documents, I/O, and startup configuration.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrustStoreError {
    #[error("io error accessing trust material: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid private key material")]
    InvalidKey,
    #[error("malformed certificate chain: {0}")]
    MalformedChain(String),
    #[error("malformed TRC: {0}")]
    MalformedTrc(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("io error reading topology {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed topology {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("topology declares is_core_ad={found} but role `{role}` was requested")]
    RoleMismatch { role: &'static str, found: bool },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport channel closed")]
    Closed,
}
