//! Peer Protocol - Request/Response messages exchanged with a storage peer

use crate::block::{Block, BlockId};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// A block as it travels over the wire: id plus base64 encoded bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePayload {
    /// Block id in text form
    pub block_id: String,

    /// Standard base64 of the block bytes
    pub data: String,
}

impl WirePayload {
    pub fn encode(block: &Block) -> Self {
        Self::from_parts(block.id(), block.data())
    }

    pub fn from_parts(block_id: &BlockId, data: &[u8]) -> Self {
        Self {
            block_id: block_id.to_string(),
            data: STANDARD.encode(data),
        }
    }

    /// Decode the carried bytes
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(self.data.as_bytes())
    }
}

/// Requests a peer understands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerRequest {
    /// Store blocks, in order
    Stripe { blocks: Vec<WirePayload> },

    /// Return a stored block
    Retrieve { block_id: String },
}

/// Responses a peer sends back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerResponse {
    /// Blocks stored successfully
    Stored { block_ids: Vec<String> },

    /// Block returned
    Block(WirePayload),

    /// Error response
    Error { code: ErrorCode, message: String },
}

/// Error codes for peer operations
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    /// Block not found
    NotFound,

    /// Not enough storage space
    InsufficientSpace,

    /// Payload or id could not be decoded
    InvalidRequest,

    /// Internal error
    InternalError,
}

impl PeerResponse {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        PeerResponse::Error {
            code,
            message: message.into(),
        }
    }
}
