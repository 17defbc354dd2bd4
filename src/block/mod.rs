//! Block Module - Content-addressed units of file data
//!
//! A file is turned into one whole-file block whose id is the BLAKE3 digest of
//! its bytes. Fragmenting schemes derive further blocks from it that share the
//! same root digest and carry a fragment index.

mod hashing;
mod producer;

pub use hashing::ContentHash;
pub use producer::{BlockProducer, ContentProducer, Metadata};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

const FRAGMENT_SEPARATOR: &str = "-frag-";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("Cannot build a block from an empty file")]
    EmptyData,

    #[error("File name must not be empty")]
    EmptyName,

    #[error("Invalid block id: {0}")]
    InvalidId(String),
}

/// Identifier of a block: the file's root digest plus an optional fragment index
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId {
    /// Content hash of the whole file
    pub root: ContentHash,

    /// Fragment index, `None` for the whole-file block
    pub fragment: Option<u16>,
}

impl BlockId {
    /// Id of the whole-file block for the given bytes
    pub fn for_content(data: &[u8]) -> Self {
        Self::root(ContentHash::hash(data))
    }

    pub fn root(root: ContentHash) -> Self {
        Self {
            root,
            fragment: None,
        }
    }

    pub fn fragment(root: ContentHash, index: u16) -> Self {
        Self {
            root,
            fragment: Some(index),
        }
    }

    /// The whole-file id this block belongs to
    pub fn file_id(&self) -> Self {
        Self::root(self.root)
    }

    pub fn is_fragment(&self) -> bool {
        self.fragment.is_some()
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fragment {
            Some(index) => write!(f, "{}{}{:02}", self.root, FRAGMENT_SEPARATOR, index),
            None => write!(f, "{}", self.root),
        }
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self)
    }
}

impl FromStr for BlockId {
    type Err = BlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (root, fragment) = match s.split_once(FRAGMENT_SEPARATOR) {
            Some((root, index)) => {
                let index = index
                    .parse::<u16>()
                    .map_err(|e| BlockError::InvalidId(format!("{}: {}", s, e)))?;
                (root, Some(index))
            }
            None => (s, None),
        };

        let root = ContentHash::from_base58(root)
            .map_err(|e| BlockError::InvalidId(format!("{}: {}", s, e)))?;

        Ok(Self { root, fragment })
    }
}

/// An immutable block payload
///
/// Cloning a block shares its bytes; duplicated copies of a block are
/// references to one allocation.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    id: BlockId,
    checksum: ContentHash,
    data: Arc<[u8]>,
}

impl Block {
    /// Build a block with an explicit id
    pub fn new(id: BlockId, data: impl Into<Arc<[u8]>>) -> Self {
        let data = data.into();
        Self {
            id,
            checksum: ContentHash::hash(&data),
            data,
        }
    }

    /// Build the whole-file block for the given bytes
    pub fn whole(data: impl Into<Arc<[u8]>>) -> Self {
        let data = data.into();
        let checksum = ContentHash::hash(&data);
        Self {
            id: BlockId::root(checksum),
            checksum,
            data,
        }
    }

    pub fn id(&self) -> &BlockId {
        &self.id
    }

    /// Digest of this block's own payload
    pub fn checksum(&self) -> &ContentHash {
        &self.checksum
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True when both blocks reference the same payload allocation
    pub fn shares_payload(&self, other: &Block) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .finish()
    }
}
