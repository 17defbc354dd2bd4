//! Naive duplication: store N identical copies of the whole file

use super::{single_block, RedundancyStrategy, SchemeError};
use crate::block::{Block, BlockId};

use std::num::NonZeroUsize;

/// Replicates the single whole-file block `factor` times
///
/// Copies share the block's bytes. Each copy lands on a different peer as
/// long as there are at least `factor` peers; with fewer peers some hold more
/// than one copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Duplication {
    factor: NonZeroUsize,
}

impl Duplication {
    /// Create a duplication scheme, rejecting a factor of zero
    pub fn new(factor: usize) -> Result<Self, SchemeError> {
        let factor = NonZeroUsize::new(factor).ok_or_else(|| {
            SchemeError::InvalidInput("redundancy factor must be at least 1".into())
        })?;
        Ok(Self { factor })
    }

    pub fn factor(&self) -> usize {
        self.factor.get()
    }
}

impl RedundancyStrategy for Duplication {
    fn name(&self) -> &'static str {
        "duplication"
    }

    fn introduce_redundancy(&self, blocks: &[Block]) -> Result<Vec<Block>, SchemeError> {
        let block = single_block(self.name(), blocks)?;
        Ok(vec![block.clone(); self.factor.get()])
    }

    fn retrieval_plan(&self, root: &BlockId) -> Vec<BlockId> {
        vec![root.file_id()]
    }

    fn blocks_required(&self) -> usize {
        1
    }

    fn reassemble(
        &self,
        _root: &BlockId,
        blocks: Vec<Option<Vec<u8>>>,
    ) -> Result<Vec<u8>, SchemeError> {
        blocks
            .into_iter()
            .flatten()
            .next()
            .ok_or(SchemeError::InsufficientBlocks { have: 0, need: 1 })
    }
}
