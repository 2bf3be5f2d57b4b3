//! Block, block reference and delivered batch types.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifies a block by number and hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    pub number: u64,
    pub hash: String,
}

impl BlockRef {
    pub fn new(number: u64, hash: impl Into<String>) -> Self {
        Self {
            number,
            hash: hash.into(),
        }
    }
}

impl std::fmt::Display for BlockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.hash.is_empty() {
            write!(f, "#{}", self.number)
        } else {
            write!(f, "#{} ({})", self.number, self.hash)
        }
    }
}

/// Any block document the portal can return.
///
/// The streaming core only ever looks at the header number; everything else
/// belongs to the dataset-specific mapping layer.
pub trait PortalBlock: DeserializeOwned + Send + 'static {
    /// Block height.
    fn number(&self) -> u64;

    /// Block hash, empty when the field selection did not include it.
    fn hash(&self) -> &str;

    fn block_ref(&self) -> BlockRef {
        BlockRef::new(self.number(), self.hash())
    }
}

/// Block header as sent by the portal: `number`, `hash` and whatever else was selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    #[serde(default)]
    pub hash: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A raw portal block: a header plus opaque dataset-specific item lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl PortalBlock for Block {
    fn number(&self) -> u64 {
        self.header.number
    }

    fn hash(&self) -> &str {
        &self.header.hash
    }
}

/// One release of the stream: blocks in ascending order plus the tip known
/// when the underlying request was made.
#[derive(Debug, Clone)]
pub struct StreamBatch<B = Block> {
    pub blocks: Vec<B>,
    pub finalized_head: Option<BlockRef>,
}

impl<B: PortalBlock> StreamBatch<B> {
    /// Number of the first block in the batch.
    pub fn first_block(&self) -> Option<u64> {
        self.blocks.first().map(PortalBlock::number)
    }

    /// Number of the last block in the batch, the watermark after delivery.
    pub fn last_block(&self) -> Option<u64> {
        self.blocks.last().map(PortalBlock::number)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_keeps_unknown_fields() {
        let line = r#"{"header":{"number":7,"hash":"0x07","timestamp":1},"logs":[{"logIndex":0}]}"#;
        let block: Block = serde_json::from_str(line).unwrap();
        assert_eq!(block.number(), 7);
        assert_eq!(block.hash(), "0x07");
        assert_eq!(block.header.extra["timestamp"], 1);
        assert!(block.data.contains_key("logs"));
    }

    #[test]
    fn header_hash_is_optional() {
        let block: Block = serde_json::from_str(r#"{"header":{"number":3}}"#).unwrap();
        assert_eq!(block.block_ref(), BlockRef::new(3, ""));
    }

    #[test]
    fn batch_bounds() {
        let blocks: Vec<Block> = (10..13)
            .map(|n| serde_json::from_value(serde_json::json!({"header": {"number": n}})).unwrap())
            .collect();
        let batch = StreamBatch {
            blocks,
            finalized_head: Some(BlockRef::new(20, "")),
        };
        assert_eq!(batch.first_block(), Some(10));
        assert_eq!(batch.last_block(), Some(12));
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn block_ref_display() {
        assert_eq!(BlockRef::new(5, "").to_string(), "#5");
        assert_eq!(BlockRef::new(5, "0xab").to_string(), "#5 (0xab)");
    }
}
