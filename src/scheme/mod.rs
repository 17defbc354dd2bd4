//! Redundant Storage Schemes
//!
//! A scheme decides how many copies or fragments of a file are produced and
//! how they are spread over the peers able to host them. The orchestrator
//! only talks to [`RedundancyStrategy`]; each technique is its own type,
//! chosen once through [`SchemeConfig`].

mod allocation;
mod duplication;
mod parity;

pub use allocation::Allocation;
pub use duplication::Duplication;
pub use parity::ParityFragmentation;

use crate::block::{Block, BlockId};
use crate::network::PeerId;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemeError {
    #[error("Invalid scheme configuration: {0}")]
    InvalidInput(String),

    #[error("No peers available to host blocks")]
    NoPeersAvailable,

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Not enough blocks to reassemble: have {have}, need {need}")]
    InsufficientBlocks { have: usize, need: usize },

    #[error("Erasure coding error: {0}")]
    ErasureCoding(String),

    #[error("Fragments of {root} do not rebuild: {reason}")]
    CorruptFragments { root: BlockId, reason: String },
}

/// A redundancy technique
///
/// Implementations are pure: no I/O, no interior mutability, and
/// configuration fixed at construction.
pub trait RedundancyStrategy: Send + Sync + fmt::Debug {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Expand the blocks of one file into the blocks that get stored
    fn introduce_redundancy(&self, blocks: &[Block]) -> Result<Vec<Block>, SchemeError>;

    /// Assign every block to exactly one peer, round robin in peer order
    fn allocate(&self, blocks: Vec<Block>, peers: &[PeerId]) -> Result<Allocation, SchemeError> {
        Allocation::round_robin(blocks, peers)
    }

    /// Block ids to fetch when retrieving the file rooted at `root`
    fn retrieval_plan(&self, root: &BlockId) -> Vec<BlockId>;

    /// How many entries of the retrieval plan are needed to rebuild the file
    fn blocks_required(&self) -> usize;

    /// Rebuild file bytes from fetched plan entries, `None` marking a miss
    ///
    /// Entries that cannot belong together yield `CorruptFragments`.
    fn reassemble(
        &self,
        root: &BlockId,
        blocks: Vec<Option<Vec<u8>>>,
    ) -> Result<Vec<u8>, SchemeError>;
}

/// Selects the scheme a node runs with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemeConfig {
    /// Store `factor` identical copies of the file
    Duplication { factor: usize },

    /// Split into data fragments and add Reed-Solomon parity fragments
    ParityFragmentation {
        data_fragments: usize,
        parity_fragments: usize,
    },
}

impl SchemeConfig {
    pub fn build(&self) -> Result<Arc<dyn RedundancyStrategy>, SchemeError> {
        let strategy: Arc<dyn RedundancyStrategy> = match *self {
            SchemeConfig::Duplication { factor } => Arc::new(Duplication::new(factor)?),
            SchemeConfig::ParityFragmentation {
                data_fragments,
                parity_fragments,
            } => Arc::new(ParityFragmentation::new(data_fragments, parity_fragments)?),
        };
        Ok(strategy)
    }
}

impl Default for SchemeConfig {
    fn default() -> Self {
        SchemeConfig::Duplication { factor: 3 }
    }
}

/// Schemes that start from a single whole-file block share this precondition
fn single_block<'a>(scheme: &str, blocks: &'a [Block]) -> Result<&'a Block, SchemeError> {
    match blocks {
        [block] => Ok(block),
        _ => Err(SchemeError::InvariantViolation(format!(
            "{} expects exactly one input block, got {}",
            scheme,
            blocks.len()
        ))),
    }
}
