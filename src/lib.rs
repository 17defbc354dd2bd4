//! Jewel Core - Redundant file storage over a peer-to-peer network
//!
//! This crate stores a file as redundant blocks spread over several peers so
//! that it stays retrievable when some of them disappear. The redundancy
//! technique is pluggable (plain duplication or Reed-Solomon parity
//! fragments) behind one store/retrieve contract.

pub mod block;
pub mod network;
pub mod scheme;
pub mod storage;

use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Main error type for Jewel operations
#[derive(Error, Debug)]
pub enum JewelError {
    #[error("Block error: {0}")]
    Block(#[from] block::BlockError),

    #[error("Scheme error: {0}")]
    Scheme(#[from] scheme::SchemeError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Directory error: {0}")]
    Directory(#[from] network::DirectoryError),

    #[error("Transport error: {0}")]
    Transport(#[from] network::TransportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, JewelError>;

/// Node configuration, read once at startup
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct JewelConfig {
    /// Redundancy scheme used for every store
    pub scheme: scheme::SchemeConfig,

    /// Fewest blocks a store with failed peers may end with
    pub min_viable_copies: usize,

    /// Deadline for each directory and transport call (milliseconds)
    pub peer_timeout_ms: u64,

    /// Upper bound on concurrent stripes per store
    pub max_concurrent_stripes: usize,

    /// Verify retrieved content against its content-derived id
    pub verify_checksum: bool,

    /// Seed for peer selection; entropy when absent
    pub selection_seed: Option<u64>,

    /// Directory retrieved files are written to
    pub download_dir: String,
}

impl Default for JewelConfig {
    fn default() -> Self {
        Self {
            scheme: scheme::SchemeConfig::default(),
            min_viable_copies: 1,
            peer_timeout_ms: 10_000,
            max_concurrent_stripes: 8,
            verify_checksum: true,
            selection_seed: None,
            download_dir: "./jewel_data".to_string(),
        }
    }
}

impl JewelConfig {
    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| JewelError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.peer_timeout_ms == 0 {
            return Err(JewelError::Config("peer_timeout_ms must be positive".into()));
        }
        if self.max_concurrent_stripes == 0 {
            return Err(JewelError::Config(
                "max_concurrent_stripes must be positive".into(),
            ));
        }
        // Rejects a zero factor or impossible fragment counts up front
        self.scheme.build()?;
        Ok(())
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn orchestrator_options(&self) -> storage::OrchestratorOptions {
        storage::OrchestratorOptions {
            min_viable_copies: self.min_viable_copies,
            peer_timeout: self.peer_timeout(),
            max_concurrent_stripes: self.max_concurrent_stripes,
            verify_checksum: self.verify_checksum,
        }
    }

    /// Sink writing retrieved files under `download_dir`
    pub fn file_sink(&self) -> storage::FsFileSink {
        storage::FsFileSink::new(&self.download_dir)
    }
}

/// Install a `tracing` subscriber; `RUST_LOG` overrides `default_directive`
///
/// Returns false when a global subscriber was already set.
pub fn init_logging(default_directive: &str) -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
