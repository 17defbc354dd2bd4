//! Fragmentation with parity using Reed-Solomon
//!
//! Splits a file into K data fragments plus M parity fragments where any K
//! of the K+M are enough to rebuild it. This gives fault tolerance without
//! full replication.

use super::{single_block, RedundancyStrategy, SchemeError};
use crate::block::{Block, BlockId};

use reed_solomon_erasure::galois_8::ReedSolomon;

/// Length prefix carried in front of the payload so padding can be stripped
const LEN_PREFIX: usize = std::mem::size_of::<u64>();

/// GF(2^8) limits a code to 256 shards
const MAX_FRAGMENTS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParityFragmentation {
    data_fragments: usize,
    parity_fragments: usize,
}

impl ParityFragmentation {
    pub fn new(data_fragments: usize, parity_fragments: usize) -> Result<Self, SchemeError> {
        if data_fragments == 0 || parity_fragments == 0 {
            return Err(SchemeError::InvalidInput(format!(
                "need at least one data and one parity fragment, got {}+{}",
                data_fragments, parity_fragments
            )));
        }
        if data_fragments + parity_fragments > MAX_FRAGMENTS {
            return Err(SchemeError::InvalidInput(format!(
                "at most {} fragments supported, got {}",
                MAX_FRAGMENTS,
                data_fragments + parity_fragments
            )));
        }

        Ok(Self {
            data_fragments,
            parity_fragments,
        })
    }

    pub fn data_fragments(&self) -> usize {
        self.data_fragments
    }

    pub fn parity_fragments(&self) -> usize {
        self.parity_fragments
    }

    /// Total number of fragments
    pub fn total_fragments(&self) -> usize {
        self.data_fragments + self.parity_fragments
    }

    /// Overhead factor (total / data)
    pub fn overhead(&self) -> f32 {
        self.total_fragments() as f32 / self.data_fragments as f32
    }

    fn codec(&self) -> Result<ReedSolomon, SchemeError> {
        ReedSolomon::new(self.data_fragments, self.parity_fragments)
            .map_err(|e| SchemeError::ErasureCoding(e.to_string()))
    }

    fn fragment_size(&self, payload_len: usize) -> usize {
        (payload_len + self.data_fragments - 1) / self.data_fragments
    }
}

impl RedundancyStrategy for ParityFragmentation {
    fn name(&self) -> &'static str {
        "parity_fragmentation"
    }

    fn introduce_redundancy(&self, blocks: &[Block]) -> Result<Vec<Block>, SchemeError> {
        let block = single_block(self.name(), blocks)?;
        let root = block.id().root;

        let mut payload = Vec::with_capacity(LEN_PREFIX + block.len());
        payload.extend_from_slice(&(block.len() as u64).to_le_bytes());
        payload.extend_from_slice(block.data());

        let fragment_size = self.fragment_size(payload.len());

        // Data fragments, zero padded to fragment_size
        let mut fragments: Vec<Vec<u8>> = payload
            .chunks(fragment_size)
            .map(|chunk| {
                let mut fragment = chunk.to_vec();
                fragment.resize(fragment_size, 0);
                fragment
            })
            .collect();
        fragments.resize(self.total_fragments(), vec![0u8; fragment_size]);

        self.codec()?
            .encode(&mut fragments)
            .map_err(|e| SchemeError::ErasureCoding(e.to_string()))?;

        Ok(fragments
            .into_iter()
            .enumerate()
            .map(|(index, data)| Block::new(BlockId::fragment(root, index as u16), data))
            .collect())
    }

    fn retrieval_plan(&self, root: &BlockId) -> Vec<BlockId> {
        (0..self.total_fragments())
            .map(|index| BlockId::fragment(root.root, index as u16))
            .collect()
    }

    fn blocks_required(&self) -> usize {
        self.data_fragments
    }

    fn reassemble(
        &self,
        root: &BlockId,
        mut blocks: Vec<Option<Vec<u8>>>,
    ) -> Result<Vec<u8>, SchemeError> {
        if blocks.len() != self.total_fragments() {
            return Err(SchemeError::InvariantViolation(format!(
                "expected {} fragments for {}, got {}",
                self.total_fragments(),
                root,
                blocks.len()
            )));
        }

        let have = blocks.iter().filter(|b| b.is_some()).count();
        if have < self.data_fragments {
            return Err(SchemeError::InsufficientBlocks {
                have,
                need: self.data_fragments,
            });
        }

        let corrupt = |reason: String| SchemeError::CorruptFragments {
            root: root.file_id(),
            reason,
        };

        self.codec()?
            .reconstruct_data(&mut blocks)
            .map_err(|e| corrupt(e.to_string()))?;

        let mut payload = Vec::new();
        for fragment in blocks.into_iter().take(self.data_fragments) {
            let fragment = fragment.ok_or_else(|| corrupt("data fragment not rebuilt".into()))?;
            payload.extend_from_slice(&fragment);
        }

        if payload.len() < LEN_PREFIX {
            return Err(corrupt("payload shorter than its length prefix".into()));
        }

        let mut prefix = [0u8; LEN_PREFIX];
        prefix.copy_from_slice(&payload[..LEN_PREFIX]);
        let original_len = u64::from_le_bytes(prefix) as usize;

        if original_len > payload.len() - LEN_PREFIX {
            return Err(corrupt(format!(
                "length prefix claims {} bytes, only {} present",
                original_len,
                payload.len() - LEN_PREFIX
            )));
        }

        payload.truncate(LEN_PREFIX + original_len);
        payload.drain(..LEN_PREFIX);
        Ok(payload)
    }
}
