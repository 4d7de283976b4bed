//! Basic blocks
//!
//! A block is an ordered list of instruction ids whose last entry is its
//! only terminator. Blocks inside a `try` region record the catch block
//! that handles exceptions thrown from them.

use super::value::{BlockId, InstrId};

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    /// Optional label for debugging
    pub label: Option<String>,
    pub(crate) instrs: Vec<InstrId>,
    /// Catch block receiving exceptions thrown here
    pub handler: Option<BlockId>,
    pub(crate) alive: bool,
}

impl BasicBlock {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            label: None,
            instrs: Vec::new(),
            handler: None,
            alive: true,
        }
    }

    pub fn with_label(id: BlockId, label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::new(id)
        }
    }

    pub fn instrs(&self) -> &[InstrId] {
        &self.instrs
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Inside a `try` region
    pub fn is_guarded(&self) -> bool {
        self.handler.is_some()
    }
}
