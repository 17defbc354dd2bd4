//! Block and metadata production for a file being stored

use super::{Block, BlockError, BlockId, ContentHash};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata describing a file-to-block mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Original filename
    pub name: String,

    /// Id of the whole-file block
    pub root: BlockId,

    /// Content hash of the file bytes
    pub checksum: ContentHash,

    /// Original file size (bytes)
    pub size: u64,

    /// MIME type
    pub mime_type: String,

    /// Creation timestamp
    pub created_at: i64,

    /// Fragment index -> digest of that fragment, for fragmenting schemes
    #[serde(default)]
    pub fragment_checksums: BTreeMap<u16, ContentHash>,
}

impl Metadata {
    /// Remember the digests of the fragments derived from this file
    pub fn record_blocks(&mut self, blocks: &[Block]) {
        self.fragment_checksums = blocks
            .iter()
            .filter(|block| block.id().root == self.root.root)
            .filter_map(|block| block.id().fragment.map(|index| (index, *block.checksum())))
            .collect();
    }

    /// Digest a block of this file must have, when known
    pub fn block_checksum(&self, id: &BlockId) -> Option<ContentHash> {
        if id.root != self.root.root {
            return None;
        }
        match id.fragment {
            None => Some(self.checksum),
            Some(index) => self.fragment_checksums.get(&index).copied(),
        }
    }
}

/// Turns raw file bytes into blocks and metadata
pub trait BlockProducer: Send + Sync {
    fn make_block(&self, data: &[u8]) -> Result<Block, BlockError>;

    fn make_metadata(&self, block: &Block, name: &str) -> Result<Metadata, BlockError>;
}

/// BLAKE3-addressed producer: one whole-file block per file
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentProducer;

impl BlockProducer for ContentProducer {
    fn make_block(&self, data: &[u8]) -> Result<Block, BlockError> {
        if data.is_empty() {
            return Err(BlockError::EmptyData);
        }
        Ok(Block::whole(data))
    }

    fn make_metadata(&self, block: &Block, name: &str) -> Result<Metadata, BlockError> {
        if name.trim().is_empty() {
            return Err(BlockError::EmptyName);
        }

        let mime_type = mime_guess::from_path(name)
            .first_or_octet_stream()
            .to_string();

        Ok(Metadata {
            name: name.to_string(),
            root: block.id().file_id(),
            checksum: *block.checksum(),
            size: block.len() as u64,
            mime_type,
            created_at: chrono::Utc::now().timestamp(),
            fragment_checksums: BTreeMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_block_and_metadata() {
        let producer = ContentProducer;

        let block = producer.make_block(b"hello").unwrap();
        let metadata = producer.make_metadata(&block, "a.txt").unwrap();

        assert_eq!(metadata.name, "a.txt");
        assert_eq!(metadata.root, *block.id());
        assert_eq!(metadata.checksum, ContentHash::hash(b"hello"));
        assert_eq!(metadata.size, 5);
        assert_eq!(metadata.mime_type, "text/plain");
        assert!(metadata.created_at > 0);
    }

    #[test]
    fn test_fragment_checksums_recorded() {
        let block = ContentProducer.make_block(b"hello world").unwrap();
        let mut metadata = ContentProducer.make_metadata(&block, "a.txt").unwrap();
        let root = block.id().root;

        let fragments = vec![
            Block::new(BlockId::fragment(root, 0), b"hello".to_vec()),
            Block::new(BlockId::fragment(root, 1), b" world".to_vec()),
        ];
        metadata.record_blocks(&fragments);

        assert_eq!(metadata.fragment_checksums.len(), 2);
        assert_eq!(
            metadata.block_checksum(&BlockId::fragment(root, 1)),
            Some(ContentHash::hash(b" world"))
        );
        assert_eq!(metadata.block_checksum(&BlockId::fragment(root, 2)), None);
        assert_eq!(metadata.block_checksum(block.id()), Some(root));

        let other = BlockId::fragment(ContentHash::hash(b"other"), 0);
        assert_eq!(metadata.block_checksum(&other), None);

        let json = serde_json::to_string(&metadata).unwrap();
        assert_eq!(serde_json::from_str::<Metadata>(&json).unwrap(), metadata);
    }

    #[test]
    fn test_empty_file_rejected() {
        assert_eq!(
            ContentProducer.make_block(b"").unwrap_err(),
            BlockError::EmptyData
        );
    }

    #[test]
    fn test_empty_name_rejected() {
        let block = ContentProducer.make_block(b"hello").unwrap();
        assert_eq!(
            ContentProducer.make_metadata(&block, "  ").unwrap_err(),
            BlockError::EmptyName
        );
    }

    #[test]
    fn test_unknown_extension_is_octet_stream() {
        let block = ContentProducer.make_block(b"\x00\x01").unwrap();
        let metadata = ContentProducer.make_metadata(&block, "blob").unwrap();
        assert_eq!(metadata.mime_type, "application/octet-stream");
    }
}
