//! Database persistence layer for AcadChain
//!
//! Three things are durable: the append-only log of sealed blocks, the
//! latest snapshot of the registry maps, and the transactions still waiting
//! to be sealed.

use crate::blockchain::Block;
use crate::crypto::Sha256Hash;
use crate::error::ChainError;
use crate::registry::RegistrySnapshot;
use crate::transaction::Transaction;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

const REGISTRY_SNAPSHOT_KEY: &str = "registry";
const PENDING_KEY: &str = "pending";

/// Abstraction for persistence backends.
pub trait Persistence: Send + Sync {
    /// Append one sealed block. Blocks are written in index order and never
    /// rewritten.
    fn save_block(&self, block: &Block) -> Result<(), ChainError>;
    /// Every stored block, ordered by index.
    fn load_blocks(&self) -> Result<Vec<Block>, ChainError>;
    fn save_snapshot(&self, snapshot: &RegistrySnapshot) -> Result<(), ChainError>;
    fn load_snapshot(&self) -> Result<Option<RegistrySnapshot>, ChainError>;
    /// Replace the stored set of unsealed transactions.
    fn save_pending(&self, pending: &[Transaction]) -> Result<(), ChainError>;
    fn load_pending(&self) -> Result<Vec<Transaction>, ChainError>;
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ChainError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| ChainError::DatabaseError(format!("Failed to open database: {}", e)))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, ChainError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ChainError::DatabaseError(format!("Failed to open database: {}", e)))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, ChainError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS blocks (
                block_index INTEGER PRIMARY KEY,
                hash BLOB NOT NULL,
                previous_hash BLOB NOT NULL,
                timestamp INTEGER NOT NULL,
                nonce INTEGER NOT NULL,
                transactions TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to create blocks table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS snapshots (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| {
            ChainError::DatabaseError(format!("Failed to create snapshots table: {}", e))
        })?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    pub fn save_block(&self, block: &Block) -> Result<(), ChainError> {
        let transactions_json = serde_json::to_string(&block.transactions).map_err(|e| {
            ChainError::DatabaseError(format!("Failed to serialize transactions: {}", e))
        })?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO blocks (block_index, hash, previous_hash, timestamp, nonce, transactions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                block.index as i64,
                block.hash.to_vec(),
                block.previous_hash.to_vec(),
                block.timestamp,
                block.nonce as i64,
                transactions_json,
            ],
        )
        .map_err(|e| {
            ChainError::DatabaseError(format!("Failed to save block {}: {}", block.index, e))
        })?;

        Ok(())
    }

    pub fn load_blocks(&self) -> Result<Vec<Block>, ChainError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT block_index, hash, previous_hash, timestamp, nonce, transactions
                 FROM blocks ORDER BY block_index ASC",
            )
            .map_err(|e| ChainError::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                let index: i64 = row.get(0)?;
                let hash: Vec<u8> = row.get(1)?;
                let previous_hash: Vec<u8> = row.get(2)?;
                let timestamp: i64 = row.get(3)?;
                let nonce: i64 = row.get(4)?;
                let transactions: String = row.get(5)?;
                Ok((index, hash, previous_hash, timestamp, nonce, transactions))
            })
            .map_err(|e| ChainError::DatabaseError(format!("Failed to query blocks: {}", e)))?;

        let mut blocks = Vec::new();
        for row in rows {
            let (index, hash, previous_hash, timestamp, nonce, transactions_json) =
                row.map_err(|e| ChainError::DatabaseError(format!("Failed to load block: {}", e)))?;

            let transactions: Vec<Transaction> = serde_json::from_str(&transactions_json)
                .map_err(|e| ChainError::CorruptLedger {
                    index: index as u64,
                    reason: format!("unreadable transactions: {}", e),
                })?;

            blocks.push(Block {
                index: index as u64,
                timestamp,
                transactions,
                previous_hash: to_digest(index, &previous_hash)?,
                nonce: nonce as u64,
                hash: to_digest(index, &hash)?,
            });
        }

        Ok(blocks)
    }

    pub fn save_snapshot(&self, snapshot: &RegistrySnapshot) -> Result<(), ChainError> {
        self.put_value(REGISTRY_SNAPSHOT_KEY, &serde_json::to_string(snapshot)?)
    }

    pub fn load_snapshot(&self) -> Result<Option<RegistrySnapshot>, ChainError> {
        match self.get_value(REGISTRY_SNAPSHOT_KEY)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn save_pending(&self, pending: &[Transaction]) -> Result<(), ChainError> {
        self.put_value(PENDING_KEY, &serde_json::to_string(pending)?)
    }

    pub fn load_pending(&self) -> Result<Vec<Transaction>, ChainError> {
        match self.get_value(PENDING_KEY)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    fn put_value(&self, key: &str, value: &str) -> Result<(), ChainError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO snapshots (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to save {}: {}", key, e)))?;
        Ok(())
    }

    fn get_value(&self, key: &str) -> Result<Option<String>, ChainError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM snapshots WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| ChainError::DatabaseError(format!("Failed to load {}: {}", key, e)))?;
        Ok(value)
    }
}

fn to_digest(index: i64, bytes: &[u8]) -> Result<Sha256Hash, ChainError> {
    bytes.try_into().map_err(|_| ChainError::CorruptLedger {
        index: index as u64,
        reason: format!("stored digest has {} bytes", bytes.len()),
    })
}

impl Persistence for Database {
    fn save_block(&self, block: &Block) -> Result<(), ChainError> {
        Database::save_block(self, block)
    }

    fn load_blocks(&self) -> Result<Vec<Block>, ChainError> {
        Database::load_blocks(self)
    }

    fn save_snapshot(&self, snapshot: &RegistrySnapshot) -> Result<(), ChainError> {
        Database::save_snapshot(self, snapshot)
    }

    fn load_snapshot(&self) -> Result<Option<RegistrySnapshot>, ChainError> {
        Database::load_snapshot(self)
    }

    fn save_pending(&self, pending: &[Transaction]) -> Result<(), ChainError> {
        Database::save_pending(self, pending)
    }

    fn load_pending(&self) -> Result<Vec<Transaction>, ChainError> {
        Database::load_pending(self)
    }
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    pub blocks: Arc<Mutex<Vec<Block>>>,
    pub snapshot: Arc<Mutex<Option<RegistrySnapshot>>>,
    pub pending: Arc<Mutex<Vec<Transaction>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for InMemoryPersistence {
    fn save_block(&self, block: &Block) -> Result<(), ChainError> {
        let mut blocks = self.blocks.lock();
        if blocks.iter().any(|b| b.index == block.index) {
            return Err(ChainError::DatabaseError(format!(
                "Block {} already stored",
                block.index
            )));
        }
        blocks.push(block.clone());
        Ok(())
    }

    fn load_blocks(&self) -> Result<Vec<Block>, ChainError> {
        let mut blocks = self.blocks.lock().clone();
        blocks.sort_by_key(|b| b.index);
        Ok(blocks)
    }

    fn save_snapshot(&self, snapshot: &RegistrySnapshot) -> Result<(), ChainError> {
        *self.snapshot.lock() = Some(snapshot.clone());
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<RegistrySnapshot>, ChainError> {
        Ok(self.snapshot.lock().clone())
    }

    fn save_pending(&self, pending: &[Transaction]) -> Result<(), ChainError> {
        *self.pending.lock() = pending.to_vec();
        Ok(())
    }

    fn load_pending(&self) -> Result<Vec<Transaction>, ChainError> {
        Ok(self.pending.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Blockchain;
    use crate::models::Institution;
    use crate::transaction::{CustomTx, TransactionKind};

    #[test]
    fn test_database_open() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.conn.lock().is_autocommit());
        assert!(db.load_blocks().unwrap().is_empty());
        assert!(db.load_snapshot().unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_blocks() {
        let db = Database::open_in_memory().unwrap();
        let chain = Blockchain::new(1);
        db.save_block(chain.latest()).unwrap();

        let loaded = db.load_blocks().unwrap();
        assert_eq!(loaded, chain.blocks().to_vec());
        assert!(Blockchain::from_blocks(loaded, 1).is_ok());
    }

    #[test]
    fn test_blocks_are_append_only() {
        let db = Database::open_in_memory().unwrap();
        let chain = Blockchain::new(1);
        db.save_block(chain.latest()).unwrap();
        assert!(matches!(
            db.save_block(chain.latest()),
            Err(ChainError::DatabaseError(_))
        ));

        let memory = InMemoryPersistence::new();
        memory.save_block(chain.latest()).unwrap();
        assert!(memory.save_block(chain.latest()).is_err());
    }

    #[test]
    fn test_snapshot_replaced_on_save() {
        let db = Database::open_in_memory().unwrap();
        let mut snapshot = RegistrySnapshot::default();
        db.save_snapshot(&snapshot).unwrap();

        snapshot.institutions.insert(
            "I1".to_string(),
            Institution::new("I1", "Test Institute", "Chennai", true),
        );
        db.save_snapshot(&snapshot).unwrap();

        let loaded = db.load_snapshot().unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_pending_replaced_on_save() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.load_pending().unwrap().is_empty());

        let first = Transaction::new(TransactionKind::Custom(CustomTx::new("FIRST")));
        let second = Transaction::new(TransactionKind::Custom(CustomTx::new("SECOND")));
        db.save_pending(&[first.clone(), second.clone()]).unwrap();
        assert_eq!(db.load_pending().unwrap(), vec![first, second.clone()]);

        db.save_pending(&[second.clone()]).unwrap();
        assert_eq!(db.load_pending().unwrap(), vec![second]);
        // the registry snapshot lives under its own key
        assert!(db.load_snapshot().unwrap().is_none());
    }
}
