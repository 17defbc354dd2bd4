//! Round-robin placement of blocks onto peers

use super::SchemeError;
use crate::block::{Block, BlockId};
use crate::network::PeerId;

use std::collections::HashSet;

/// Blocks assigned to each peer for one store call
///
/// Peers appear in the order they first received a block, and each peer's
/// blocks keep their assignment order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allocation {
    entries: Vec<(PeerId, Vec<Block>)>,
}

impl Allocation {
    /// Cycle through `peers` handing out one block per peer per round
    ///
    /// Repeated peer ids count once. With more blocks than peers the
    /// busiest peer holds `ceil(blocks / peers)` blocks.
    pub fn round_robin(blocks: Vec<Block>, peers: &[PeerId]) -> Result<Self, SchemeError> {
        let mut seen = HashSet::with_capacity(peers.len());
        let distinct: Vec<&PeerId> = peers.iter().filter(|p| seen.insert(*p)).collect();

        if distinct.is_empty() {
            return Err(SchemeError::NoPeersAvailable);
        }

        let mut entries: Vec<(PeerId, Vec<Block>)> = distinct
            .into_iter()
            .take(blocks.len())
            .map(|peer| (peer.clone(), Vec::new()))
            .collect();

        let slots = entries.len();
        for (i, block) in blocks.into_iter().enumerate() {
            entries[i % slots].1.push(block);
        }

        Ok(Self { entries })
    }

    /// Blocks assigned to a peer
    pub fn get(&self, peer: &PeerId) -> Option<&[Block]> {
        self.entries
            .iter()
            .find(|(p, _)| p == peer)
            .map(|(_, blocks)| blocks.as_slice())
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerId> {
        self.entries.iter().map(|(peer, _)| peer)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &[Block])> {
        self.entries
            .iter()
            .map(|(peer, blocks)| (peer, blocks.as_slice()))
    }

    /// Number of peers holding at least one block
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of placed blocks
    pub fn block_count(&self) -> usize {
        self.entries.iter().map(|(_, blocks)| blocks.len()).sum()
    }

    pub fn max_blocks_per_peer(&self) -> usize {
        self.entries
            .iter()
            .map(|(_, blocks)| blocks.len())
            .max()
            .unwrap_or(0)
    }

    /// Peer -> block ids, for reporting once the blocks themselves are gone
    pub fn placements(&self) -> Vec<(PeerId, Vec<BlockId>)> {
        self.entries
            .iter()
            .map(|(peer, blocks)| (peer.clone(), blocks.iter().map(|b| *b.id()).collect()))
            .collect()
    }
}

impl IntoIterator for Allocation {
    type Item = (PeerId, Vec<Block>);
    type IntoIter = std::vec::IntoIter<(PeerId, Vec<Block>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
