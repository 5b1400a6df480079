use crate::transaction::TransactionKind;
use std::collections::HashMap;

use super::chain::Block;

/// Where a credential's issuance record was sealed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IndexEntry {
    pub block_index: u64,
    pub transaction_id: String,
}

/// Credential id -> sealing location, maintained incrementally as blocks
/// are appended so verification never scans the whole ledger.
#[derive(Debug, Clone, Default)]
pub struct CredentialIndex {
    entries: HashMap<String, IndexEntry>,
}

impl CredentialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rebuild(blocks: &[Block]) -> Self {
        let mut index = Self::new();
        for block in blocks {
            index.index_block(block);
        }
        index
    }

    /// Record every issuance in `block`. The first sealing of an id wins.
    pub fn index_block(&mut self, block: &Block) {
        for tx in &block.transactions {
            if let TransactionKind::CredentialIssuance(issuance) = &tx.kind {
                self.entries
                    .entry(issuance.credential_id.clone())
                    .or_insert_with(|| IndexEntry {
                        block_index: block.index,
                        transaction_id: tx.id.clone(),
                    });
            }
        }
    }

    pub fn get(&self, credential_id: &str) -> Option<&IndexEntry> {
        self.entries.get(credential_id)
    }

    pub fn contains(&self, credential_id: &str) -> bool {
        self.entries.contains_key(credential_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
