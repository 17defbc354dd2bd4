//! Network Module - Peer directory, transport and peer selection
//!
//! The storage core only sees peers through the [`PeerDirectory`] and
//! [`Transport`] traits. [`LocalNetwork`] is an in-process implementation of
//! both, used for tests and simulations.

mod local;
mod peer_store;
mod protocol;
mod selection;

pub use local::{LocalNetwork, PayloadFault};
pub use peer_store::{PeerStore, PeerStoreError, StoredBlock};
pub use protocol::{ErrorCode, PeerRequest, PeerResponse, WirePayload};
pub use selection::{InOrderSelector, PeerSelector, RandomSelector};

use crate::block::{Block, BlockId, Metadata};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Opaque peer identifier (e.g. a network address)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Directory unavailable: {0}")]
    Unavailable(String),

    #[error("Directory request timed out")]
    Timeout,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Peer unreachable: {0}")]
    Unreachable(PeerId),

    #[error("Timed out talking to {0}")]
    Timeout(PeerId),

    #[error("Block {block} not found on {peer}")]
    NotFound { peer: PeerId, block: BlockId },

    #[error("Peer {peer} rejected request: {reason}")]
    Rejected { peer: PeerId, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Membership and placement lookups
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    /// Peers eligible to host the file described by `metadata`, in discovery order
    async fn peers_available_to_host(
        &self,
        metadata: &Metadata,
    ) -> Result<Vec<PeerId>, DirectoryError>;

    /// Peers currently holding `block`
    async fn hosting_peers(&self, block: &BlockId) -> Result<Vec<PeerId>, DirectoryError>;

    /// Root block id stored under a file name, if any
    async fn resolve_filename(&self, name: &str) -> Result<Option<BlockId>, DirectoryError>;

    /// Make a file resolvable by name once its blocks are stored
    async fn publish_file(&self, _metadata: &Metadata) -> Result<(), DirectoryError> {
        Ok(())
    }

    /// Metadata published for the file rooted at `root`
    ///
    /// Directories that keep no metadata answer `None`; fragments are then
    /// only checked as part of the rebuilt file.
    async fn file_metadata(&self, _root: &BlockId) -> Result<Option<Metadata>, DirectoryError> {
        Ok(None)
    }
}

/// Block transfer to and from a single peer
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `blocks` to `peer`, in order
    async fn stripe(&self, peer: &PeerId, blocks: &[Block]) -> Result<(), TransportError>;

    /// Fetch the encoded payload of `block` from `peer`
    async fn retrieve(&self, peer: &PeerId, block: &BlockId)
        -> Result<WirePayload, TransportError>;
}
