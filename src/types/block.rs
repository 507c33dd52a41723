//! Ordered text blocks within one turn.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Turn-unique handle for a rendered block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// Wire position of a block: the message segment it belongs to plus its
/// index within that message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockKey {
    pub segment: u32,
    pub index: u32,
}

impl BlockKey {
    pub fn new(segment: u32, index: u32) -> Self {
        Self { segment, index }
    }
}

/// Kind of text a block holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BlockKind {
    Reasoning,
    Prose,
}

/// A reasoning or prose block assembled from deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub id: BlockId,
    pub key: BlockKey,
    pub kind: BlockKind,
    /// Canonical text (always current, even while a render is pending).
    pub text: String,
    pub finalized: bool,
    /// Whether any incremental delta was applied.
    pub streamed: bool,
}
