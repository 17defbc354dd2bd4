//! Storage Module - Storing and retrieving files through a redundancy scheme
//!
//! [`StorageOrchestrator`] sequences the block producer, the peer directory,
//! the active scheme and the transport. Every peer-level failure is
//! translated into [`StorageError`] here.

mod file;
mod orchestrator;

pub use file::{FileData, FileSink, FsFileSink, MemorySink};
pub use orchestrator::{OrchestratorOptions, PeerOutcome, StorageOrchestrator, StoreReport};

use crate::block::{BlockError, BlockId};
use crate::network::{DirectoryError, PeerId, TransportError};
use crate::scheme::SchemeError;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No peers available to host blocks")]
    NoPeersAvailable,

    #[error("No peers host {0}")]
    NoHostsFound(String),

    #[error("Peer directory unavailable: {0}")]
    DirectoryUnavailable(DirectoryError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Store incomplete: {surviving} of {required} required blocks stored, failed peers: {failed_peers:?}")]
    StoreIncomplete {
        failed_peers: Vec<PeerId>,
        surviving: usize,
        required: usize,
    },

    #[error("Corrupt payload from {peer}: {reason}")]
    CorruptPayload { peer: PeerId, reason: String },

    #[error("Reassembled content does not match {0}")]
    ChecksumMismatch(BlockId),

    #[error("Retrieval of {block} failed after {attempts} attempts")]
    RetrievalFailed { block: BlockId, attempts: usize },

    #[error("Not enough blocks available: have {have}, need {need}")]
    InsufficientBlocks { have: usize, need: usize },

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SchemeError> for StorageError {
    fn from(err: SchemeError) -> Self {
        match err {
            SchemeError::InvalidInput(msg) => StorageError::InvalidInput(msg),
            SchemeError::NoPeersAvailable => StorageError::NoPeersAvailable,
            SchemeError::InvariantViolation(msg) => StorageError::InvariantViolation(msg),
            SchemeError::InsufficientBlocks { have, need } => {
                StorageError::InsufficientBlocks { have, need }
            }
            SchemeError::ErasureCoding(msg) => StorageError::InvariantViolation(msg),
            SchemeError::CorruptFragments { root, reason } => {
                tracing::warn!("Fragments of {} do not rebuild: {}", root, reason);
                StorageError::ChecksumMismatch(root)
            }
        }
    }
}

impl From<BlockError> for StorageError {
    fn from(err: BlockError) -> Self {
        StorageError::InvalidInput(err.to_string())
    }
}
