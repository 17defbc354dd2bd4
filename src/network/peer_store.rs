//! Block storage held by a single peer

use super::protocol::{ErrorCode, PeerRequest, PeerResponse, WirePayload};
use crate::block::{BlockId, ContentHash};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerStoreError {
    #[error("Block not found: {0}")]
    NotFound(BlockId),

    #[error("Insufficient storage space: need {needed} bytes, {available} available")]
    InsufficientSpace { needed: u64, available: u64 },

    #[error("Block integrity check failed: {0}")]
    IntegrityCheckFailed(BlockId),
}

impl PeerStoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PeerStoreError::NotFound(_) => ErrorCode::NotFound,
            PeerStoreError::InsufficientSpace { .. } => ErrorCode::InsufficientSpace,
            PeerStoreError::IntegrityCheckFailed(_) => ErrorCode::InternalError,
        }
    }
}

/// Information about a stored block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredBlock {
    pub block_id: BlockId,

    /// Size in bytes
    pub size_bytes: u64,

    /// Content hash for integrity
    pub content_hash: ContentHash,

    /// How many copies of this block were striped here
    pub copies: u32,

    /// Creation timestamp
    pub created_at: i64,

    #[serde(skip)]
    data: Vec<u8>,
}

#[derive(Default)]
struct Inner {
    blocks: HashMap<BlockId, StoredBlock>,
    used_storage_bytes: u64,
}

/// In-memory block store of one peer
///
/// Blocks are content addressed, so a second copy of a block already held
/// only bumps its copy count and is not charged twice.
pub struct PeerStore {
    /// Maximum storage offered to network (bytes)
    max_storage_bytes: u64,

    inner: RwLock<Inner>,
}

impl PeerStore {
    pub fn new(max_storage_bytes: u64) -> Self {
        Self {
            max_storage_bytes,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Store a set of blocks, all or nothing
    pub fn store_blocks(&self, blocks: Vec<(BlockId, Vec<u8>)>) -> Result<(), PeerStoreError> {
        let mut inner = self.inner.write();

        let mut needed = 0u64;
        let mut pending: Vec<BlockId> = Vec::new();
        for (id, data) in &blocks {
            if !inner.blocks.contains_key(id) && !pending.contains(id) {
                needed += data.len() as u64;
                pending.push(*id);
            }
        }

        let available = self.max_storage_bytes.saturating_sub(inner.used_storage_bytes);
        if needed > available {
            return Err(PeerStoreError::InsufficientSpace { needed, available });
        }

        let now = chrono::Utc::now().timestamp();
        for (id, data) in blocks {
            if let Some(existing) = inner.blocks.get_mut(&id) {
                existing.copies += 1;
                continue;
            }

            let size = data.len() as u64;
            inner.blocks.insert(
                id,
                StoredBlock {
                    block_id: id,
                    size_bytes: size,
                    content_hash: ContentHash::hash(&data),
                    copies: 1,
                    created_at: now,
                    data,
                },
            );
            inner.used_storage_bytes += size;
        }

        Ok(())
    }

    /// Retrieve a block's bytes
    pub fn retrieve_block(&self, id: &BlockId) -> Result<Vec<u8>, PeerStoreError> {
        let inner = self.inner.read();
        let block = inner.blocks.get(id).ok_or(PeerStoreError::NotFound(*id))?;

        if !block.content_hash.verify(&block.data) {
            return Err(PeerStoreError::IntegrityCheckFailed(*id));
        }

        Ok(block.data.clone())
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.inner.read().blocks.contains_key(id)
    }

    /// Index entry for a block, without its bytes
    pub fn stored_block(&self, id: &BlockId) -> Option<StoredBlock> {
        self.inner.read().blocks.get(id).map(|block| StoredBlock {
            data: Vec::new(),
            ..block.clone()
        })
    }

    /// Check if we have space for a block
    pub fn has_space(&self, size_bytes: u64) -> bool {
        self.available_space() >= size_bytes
    }

    /// Get available space
    pub fn available_space(&self) -> u64 {
        self.max_storage_bytes
            .saturating_sub(self.inner.read().used_storage_bytes)
    }

    /// Bytes charged for the blocks held
    pub fn used_bytes(&self) -> u64 {
        self.inner.read().used_storage_bytes
    }

    /// Distinct blocks held
    pub fn block_count(&self) -> usize {
        self.inner.read().blocks.len()
    }

    /// Serve one protocol request
    pub fn handle(&self, request: PeerRequest) -> PeerResponse {
        match request {
            PeerRequest::Stripe { blocks } => {
                let mut decoded = Vec::with_capacity(blocks.len());
                for payload in &blocks {
                    let id = match payload.block_id.parse::<BlockId>() {
                        Ok(id) => id,
                        Err(e) => return PeerResponse::error(ErrorCode::InvalidRequest, e.to_string()),
                    };
                    let data = match payload.decode() {
                        Ok(data) => data,
                        Err(e) => return PeerResponse::error(ErrorCode::InvalidRequest, e.to_string()),
                    };
                    decoded.push((id, data));
                }

                let block_ids = decoded.iter().map(|(id, _)| id.to_string()).collect();
                match self.store_blocks(decoded) {
                    Ok(()) => PeerResponse::Stored { block_ids },
                    Err(e) => PeerResponse::error(e.code(), e.to_string()),
                }
            }

            PeerRequest::Retrieve { block_id } => {
                let id = match block_id.parse::<BlockId>() {
                    Ok(id) => id,
                    Err(e) => return PeerResponse::error(ErrorCode::InvalidRequest, e.to_string()),
                };
                match self.retrieve_block(&id) {
                    Ok(data) => PeerResponse::Block(WirePayload::from_parts(&id, &data)),
                    Err(e) => PeerResponse::error(e.code(), e.to_string()),
                }
            }
        }
    }
}
