//! Process configuration. TOML on disk, `serde` defaults everywhere: a
//! `#[serde(default)]` struct with a manual `Default` impl resolving
//! platform data directories via `directories`.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub propagation_time: u64,
    pub registration_time: u64,
    pub registers_paths: bool,
    pub policy_file: PathBuf,
    pub trust_root_dir: PathBuf,
    pub key_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let dirs = ProjectDirs::from("org", "scion-rs", "beacon-server");
        let data_dir = dirs
            .as_ref()
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            propagation_time: 5,
            registration_time: 5,
            registers_paths: true,
            policy_file: data_dir.join("path_policy.json"),
            trust_root_dir: data_dir.join("trust"),
            key_file: data_dir.join("signing.key"),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}
