use crate::crypto::{meets_difficulty, Sha256Hash};
use crate::error::ChainError;
use crate::miner::{mine_block, mine_block_with, MiningControl};
use crate::transaction::{CustomTx, Transaction, TransactionKind};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::state::{CredentialIndex, IndexEntry};
use super::validation::{validate_chain, ChainValidation};

/// Predecessor hash recorded in the genesis block.
pub const GENESIS_PREVIOUS_HASH: Sha256Hash = [0u8; 32];

/// Fixed genesis creation time (2024-01-01T00:00:00Z) so every ledger
/// created at the same difficulty shares the same genesis block.
pub const GENESIS_TIMESTAMP: i64 = 1_704_067_200_000;

pub const GENESIS_MESSAGE: &str = "Academic Authenticity Validator Genesis Block";

/// A sealed unit of ledger history.
///
/// `hash` is always expected to equal [`Block::calculate_hash`] over the
/// current field values; a block where it does not is corrupt.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub index: u64,
    /// Creation time in milliseconds since the Unix epoch
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    pub previous_hash: Sha256Hash,
    pub nonce: u64,
    pub hash: Sha256Hash,
}

impl Block {
    pub fn new(index: u64, transactions: Vec<Transaction>, previous_hash: Sha256Hash) -> Self {
        let timestamp = chrono::Utc::now().timestamp_millis();
        Self::with_timestamp(index, timestamp, transactions, previous_hash)
    }

    pub fn with_timestamp(
        index: u64,
        timestamp: i64,
        transactions: Vec<Transaction>,
        previous_hash: Sha256Hash,
    ) -> Self {
        let mut block = Block {
            index,
            timestamp,
            transactions,
            previous_hash,
            nonce: 0,
            hash: [0u8; 32],
        };
        block.recompute_hash();
        block
    }

    /// Digest of `(index, timestamp, payload, previous_hash, nonce)`.
    pub fn calculate_hash(&self) -> Sha256Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.index.to_le_bytes());
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(Block::calculate_payload_root(&self.transactions));
        hasher.update(self.previous_hash);
        hasher.update(self.nonce.to_le_bytes());
        hasher.finalize().into()
    }

    /// Refresh `hash` after a field change and return it.
    pub fn recompute_hash(&mut self) -> Sha256Hash {
        self.hash = self.calculate_hash();
        self.hash
    }

    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    pub fn calculate_payload_root(transactions: &[Transaction]) -> Sha256Hash {
        let mut hasher = Sha256::new();
        hasher.update((transactions.len() as u64).to_le_bytes());
        for tx in transactions {
            hasher.update(tx.hash());
        }
        hasher.finalize().into()
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }
}

/// The append-only ledger. Never empty: every constructor installs genesis.
#[derive(Debug, Clone)]
pub struct Blockchain {
    blocks: Vec<Block>,
    difficulty: u32,
    index: CredentialIndex,
}

impl Blockchain {
    /// Create a ledger holding only a freshly mined genesis block.
    pub fn new(difficulty: u32) -> Self {
        Self::with_genesis(Self::create_genesis_block(difficulty), difficulty)
    }

    /// Like [`Blockchain::new`], but the genesis search honours `control`.
    pub fn new_with(difficulty: u32, control: &MiningControl) -> Result<Self, ChainError> {
        let (genesis, _stats) = mine_block_with(Self::genesis_template(), difficulty, control)?;
        Ok(Self::with_genesis(genesis, difficulty))
    }

    fn with_genesis(genesis: Block, difficulty: u32) -> Self {
        info!(
            "Genesis block created (difficulty {}, hash {})",
            difficulty,
            genesis.hash_hex()
        );
        let mut index = CredentialIndex::new();
        index.index_block(&genesis);
        Blockchain {
            blocks: vec![genesis],
            difficulty,
            index,
        }
    }

    fn genesis_template() -> Block {
        let marker = Transaction::with_timestamp(
            TransactionKind::Custom(
                CustomTx::new("GENESIS")
                    .with_field("message", GENESIS_MESSAGE)
                    .with_field("creator", "acadchain"),
            ),
            GENESIS_TIMESTAMP,
        );
        Block::with_timestamp(0, GENESIS_TIMESTAMP, vec![marker], GENESIS_PREVIOUS_HASH)
    }

    pub fn create_genesis_block(difficulty: u32) -> Block {
        mine_block(Self::genesis_template(), difficulty)
    }

    /// Rebuild a ledger from previously sealed blocks, refusing anything
    /// that fails validation, sits at the wrong position or carries less
    /// work than `difficulty`.
    pub fn from_blocks(blocks: Vec<Block>, difficulty: u32) -> Result<Self, ChainError> {
        if let ChainValidation::Invalid { index, reason } = validate_chain(&blocks) {
            return Err(ChainError::CorruptLedger {
                index,
                reason: reason.to_string(),
            });
        }
        for (position, block) in blocks.iter().enumerate() {
            let position = position as u64;
            if block.index != position {
                return Err(ChainError::CorruptLedger {
                    index: position,
                    reason: format!(
                        "block stored at position {} claims index {}",
                        position, block.index
                    ),
                });
            }
            if !meets_difficulty(&block.hash, difficulty) {
                return Err(ChainError::CorruptLedger {
                    index: position,
                    reason: format!(
                        "insufficient proof-of-work for difficulty {}",
                        difficulty
                    ),
                });
            }
        }
        let index = CredentialIndex::rebuild(&blocks);
        debug!("Loaded ledger with {} blocks", blocks.len());
        Ok(Blockchain {
            blocks,
            difficulty,
            index,
        })
    }

    pub fn latest(&self) -> &Block {
        // never empty, see constructors
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, index: u64) -> Option<&Block> {
        self.blocks.get(index as usize)
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Check that `block` would be accepted by [`Blockchain::append`]
    /// without changing the ledger.
    pub fn check_append(&self, block: &Block) -> Result<(), ChainError> {
        let tip = self.latest();

        if block.previous_hash != tip.hash {
            return Err(ChainError::ChainLinkageError {
                expected: tip.hash_hex(),
                found: hex::encode(block.previous_hash),
            });
        }

        let expected_index = tip.index + 1;
        if block.index != expected_index {
            return Err(ChainError::InvalidBlock(format!(
                "Invalid block index. Expected {}, but got {}.",
                expected_index, block.index
            )));
        }

        if !block.has_valid_hash() {
            return Err(ChainError::InvalidBlock(format!(
                "Stored hash {} does not match block contents.",
                block.hash_hex()
            )));
        }

        if !meets_difficulty(&block.hash, self.difficulty) {
            return Err(ChainError::InvalidBlock(format!(
                "Invalid Proof-of-Work: hash {} does not have {} leading zeros.",
                block.hash_hex(),
                self.difficulty
            )));
        }

        Ok(())
    }

    /// Append a sealed block on top of the current tip.
    pub fn append(&mut self, block: Block) -> Result<(), ChainError> {
        self.check_append(&block)?;
        self.index.index_block(&block);
        info!(
            "Block {} appended ({} transactions, hash {})",
            block.index,
            block.transactions.len(),
            block.hash_hex()
        );
        self.blocks.push(block);
        Ok(())
    }

    pub fn validate(&self) -> ChainValidation {
        validate_chain(&self.blocks)
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_valid()
    }

    /// Locate the sealed issuance record for `credential_id`.
    pub fn find_credential(&self, credential_id: &str) -> Option<(&Block, &Transaction)> {
        let IndexEntry {
            block_index,
            transaction_id,
        } = self.index.get(credential_id)?;
        let block = self.block(*block_index)?;
        let tx = block.transactions.iter().find(|tx| &tx.id == transaction_id)?;
        Some((block, tx))
    }

    pub fn find_transaction(&self, transaction_id: &str) -> Option<(&Block, &Transaction)> {
        self.blocks.iter().find_map(|block| {
            block
                .transactions
                .iter()
                .find(|tx| tx.id == transaction_id)
                .map(|tx| (block, tx))
        })
    }

    /// Newest first.
    pub fn recent_blocks(&self, count: usize) -> Vec<&Block> {
        self.blocks.iter().rev().take(count).collect()
    }

    pub fn total_transactions(&self) -> usize {
        self.blocks.iter().map(|b| b.transactions.len()).sum()
    }

    /// Count sealed transactions per type name.
    pub fn transaction_counts(&self) -> std::collections::BTreeMap<&'static str, usize> {
        let mut counts = std::collections::BTreeMap::new();
        for tx in self.blocks.iter().flat_map(|b| b.transactions.iter()) {
            *counts.entry(tx.type_name()).or_insert(0) += 1;
        }
        counts
    }

    pub fn sealed_credential_count(&self) -> usize {
        self.index.len()
    }
}
