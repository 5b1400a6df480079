//! Ledger node: owns the chain, the pending pool and the durable block log,
//! and runs mining cycles over them.
//!
//! The store never falls behind the in-memory chain: a block is written
//! before it is appended, and a block that cannot be written is not
//! appended at all. Pending transactions, including the batch a mining cycle
//! is working on, are written to the store whenever they change.

use crate::blockchain::{Block, Blockchain, ChainValidation};
use crate::config::LedgerConfig;
use crate::error::ChainError;
use crate::mempool::TransactionPool;
use crate::miner::{mine_block_with, MiningControl, MAX_DIFFICULTY};
use crate::persistence::{InMemoryPersistence, Persistence};
use crate::transaction::{MiningRewardTx, Transaction, TransactionKind};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub struct LedgerNode {
    config: LedgerConfig,
    chain: RwLock<Blockchain>,
    pool: TransactionPool,
    /// Held for the whole of a mining cycle so only one runs at a time.
    mining: Mutex<()>,
    current: Mutex<Option<MiningControl>>,
    /// Transactions drained by the cycle in progress.
    in_flight: Mutex<Vec<Transaction>>,
    /// Serializes pool changes with the pending-set writes that mirror them.
    pending_store: Mutex<()>,
    persistence: Box<dyn Persistence>,
}

fn control_for(config: &LedgerConfig) -> MiningControl {
    match config.mining_timeout {
        Some(timeout) => MiningControl::new().with_timeout(timeout),
        None => MiningControl::new(),
    }
}

impl LedgerNode {
    /// Open the ledger stored in `persistence`, creating genesis if the
    /// store is empty. Genesis mining honours the configured timeout.
    pub fn new(
        config: LedgerConfig,
        persistence: Box<dyn Persistence>,
    ) -> Result<Self, ChainError> {
        if config.difficulty > MAX_DIFFICULTY {
            return Err(ChainError::ConfigError(format!(
                "difficulty {} exceeds {}",
                config.difficulty, MAX_DIFFICULTY
            )));
        }

        let blocks = persistence.load_blocks()?;
        let chain = if blocks.is_empty() {
            let chain = Blockchain::new_with(config.difficulty, &control_for(&config))?;
            persistence.save_block(chain.latest())?;
            chain
        } else {
            let chain = Blockchain::from_blocks(blocks, config.difficulty)?;
            info!("Loaded ledger with {} blocks", chain.len());
            chain
        };

        let pool = TransactionPool::new();
        let sealed: HashSet<&str> = chain
            .blocks()
            .iter()
            .flat_map(|b| b.transactions.iter())
            .map(|tx| tx.id.as_str())
            .collect();
        let mut restored = 0;
        for tx in persistence.load_pending()? {
            if sealed.contains(tx.id.as_str()) {
                continue;
            }
            match pool.add(tx) {
                Ok(_) => restored += 1,
                Err(e) => warn!("Dropping stored pending transaction: {}", e),
            }
        }
        if restored > 0 {
            info!("Restored {} pending transactions", restored);
        }

        Ok(LedgerNode {
            config,
            chain: RwLock::new(chain),
            pool,
            mining: Mutex::new(()),
            current: Mutex::new(None),
            in_flight: Mutex::new(Vec::new()),
            pending_store: Mutex::new(()),
            persistence,
        })
    }

    /// Fresh ledger with nothing written to disk.
    pub fn in_memory(difficulty: u32) -> Result<Self, ChainError> {
        let config = LedgerConfig {
            difficulty,
            ..LedgerConfig::default()
        };
        Self::new(config, Box::new(InMemoryPersistence::new()))
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Read access to the ledger. Mining only takes the write lock for the
    /// final store-and-append, so readers are not blocked by proof-of-work.
    pub fn chain(&self) -> RwLockReadGuard<'_, Blockchain> {
        self.chain.read()
    }

    /// Read-only view of the pending pool. Submit through
    /// [`LedgerNode::submit`] so the stored pending set stays in step.
    pub fn pool(&self) -> &TransactionPool {
        &self.pool
    }

    pub fn persistence(&self) -> &dyn Persistence {
        self.persistence.as_ref()
    }

    /// Queue `tx` for the next mining cycle and record it as pending.
    pub fn submit(&self, tx: Transaction) -> Result<String, ChainError> {
        let _store = self.pending_store.lock();
        let id = self.pool.add(tx)?;
        self.write_pending();
        Ok(id)
    }

    /// Mirror in-flight plus pooled transactions to the store. Caller holds
    /// `pending_store`.
    fn write_pending(&self) {
        let mut pending = self.in_flight.lock().clone();
        pending.extend(self.pool.snapshot());
        if let Err(e) = self.persistence.save_pending(&pending) {
            warn!("Failed to persist {} pending transactions: {}", pending.len(), e);
        }
    }

    fn take_pending(&self) -> Vec<Transaction> {
        let _store = self.pending_store.lock();
        let drained = self.pool.drain();
        *self.in_flight.lock() = drained.clone();
        drained
    }

    fn restore_pending(&self, drained: Vec<Transaction>) {
        let _store = self.pending_store.lock();
        self.in_flight.lock().clear();
        self.pool.requeue_front(drained);
    }

    fn finish_pending(&self) {
        let _store = self.pending_store.lock();
        self.in_flight.lock().clear();
        self.write_pending();
    }

    pub fn validate(&self) -> ChainValidation {
        self.chain.read().validate()
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_valid()
    }

    /// Control for a cycle using the configured timeout, if any.
    pub fn default_control(&self) -> MiningControl {
        control_for(&self.config)
    }

    /// Seal every pending transaction into a new block.
    pub fn mine_pending(&self, miner_identity: &str) -> Result<Block, ChainError> {
        let control = self.default_control();
        self.mine_pending_with(miner_identity, &control)
    }

    /// Cancellable mining cycle. If the search is cancelled or times out,
    /// or the block cannot be stored or appended, the drained transactions
    /// go back to the front of the pool.
    pub fn mine_pending_with(
        &self,
        miner_identity: &str,
        control: &MiningControl,
    ) -> Result<Block, ChainError> {
        let _cycle = self.mining.lock();

        if self.pool.is_empty() {
            return Err(ChainError::NoPendingTransactions);
        }

        let reward = Transaction::new(TransactionKind::MiningReward(MiningRewardTx {
            beneficiary: miner_identity.to_string(),
            reward: self.config.mining_reward,
        }));
        reward.validate()?;

        let drained = self.take_pending();
        if drained.is_empty() {
            self.restore_pending(drained);
            return Err(ChainError::NoPendingTransactions);
        }

        let (index, previous_hash, tip_timestamp, difficulty) = {
            let chain = self.chain.read();
            let tip = chain.latest();
            (tip.index + 1, tip.hash, tip.timestamp, chain.difficulty())
        };

        let mut payload = drained.clone();
        payload.push(reward);
        let timestamp = chrono::Utc::now().timestamp_millis().max(tip_timestamp);
        let block = Block::with_timestamp(index, timestamp, payload, previous_hash);

        info!(
            "Mining block {} with {} transactions at difficulty {}",
            index,
            drained.len(),
            difficulty
        );

        *self.current.lock() = Some(control.clone());
        let mined = mine_block_with(block, difficulty, control);
        *self.current.lock() = None;

        let block = match mined {
            Ok((block, _stats)) => block,
            Err(e) => {
                warn!("Mining block {} aborted: {}", index, e);
                self.restore_pending(drained);
                return Err(e);
            }
        };

        if let Err(e) = self.store_and_append(&block) {
            self.restore_pending(drained);
            return Err(e);
        }

        self.finish_pending();
        Ok(block)
    }

    fn store_and_append(&self, block: &Block) -> Result<(), ChainError> {
        let mut chain = self.chain.write();
        if let Err(e) = chain.check_append(block) {
            error!("Mined block {} rejected by ledger: {}", block.index, e);
            return Err(e);
        }
        if let Err(e) = self.persistence.save_block(block) {
            error!("Block {} could not be persisted, not appending: {}", block.index, e);
            return Err(e);
        }
        chain.append(block.clone())
    }

    /// Run a mining cycle on the blocking thread pool. `timeout` overrides
    /// the configured mining timeout.
    pub async fn mine_pending_async(
        self: &Arc<Self>,
        miner_identity: &str,
        timeout: Option<Duration>,
    ) -> Result<Block, ChainError> {
        let node = Arc::clone(self);
        let identity = miner_identity.to_string();
        let control = match timeout {
            Some(timeout) => MiningControl::new().with_timeout(timeout),
            None => self.default_control(),
        };

        let task = tokio::task::spawn_blocking(move || node.mine_pending_with(&identity, &control));
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(ChainError::MiningCancelled),
        }
    }

    /// Cancel the mining cycle in progress. Returns false when idle.
    pub fn cancel_mining(&self) -> bool {
        match self.current.lock().as_ref() {
            Some(control) => {
                control.cancel();
                info!("Mining cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn is_mining(&self) -> bool {
        self.current.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistrySnapshot;
    use crate::transaction::CustomTx;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Store whose block writes can be switched off.
    #[derive(Clone, Default)]
    struct FlakyStore {
        inner: InMemoryPersistence,
        fail_blocks: Arc<AtomicBool>,
    }

    impl Persistence for FlakyStore {
        fn save_block(&self, block: &Block) -> Result<(), ChainError> {
            if self.fail_blocks.load(Ordering::SeqCst) {
                return Err(ChainError::DatabaseError("disk full".to_string()));
            }
            self.inner.save_block(block)
        }

        fn load_blocks(&self) -> Result<Vec<Block>, ChainError> {
            self.inner.load_blocks()
        }

        fn save_snapshot(&self, snapshot: &RegistrySnapshot) -> Result<(), ChainError> {
            self.inner.save_snapshot(snapshot)
        }

        fn load_snapshot(&self) -> Result<Option<RegistrySnapshot>, ChainError> {
            self.inner.load_snapshot()
        }

        fn save_pending(&self, pending: &[Transaction]) -> Result<(), ChainError> {
            self.inner.save_pending(pending)
        }

        fn load_pending(&self) -> Result<Vec<Transaction>, ChainError> {
            self.inner.load_pending()
        }
    }

    fn test_config() -> LedgerConfig {
        LedgerConfig {
            difficulty: 1,
            ..LedgerConfig::default()
        }
    }

    fn custom(label: &str) -> Transaction {
        Transaction::new(TransactionKind::Custom(CustomTx::new(label)))
    }

    fn labels(txs: &[Transaction]) -> Vec<String> {
        txs.iter()
            .filter_map(|tx| match &tx.kind {
                TransactionKind::Custom(c) => Some(c.label.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_mine_pending_requires_work() {
        let node = LedgerNode::in_memory(1).unwrap();
        assert!(matches!(
            node.mine_pending("SYSTEM"),
            Err(ChainError::NoPendingTransactions)
        ));
        assert_eq!(node.chain().len(), 1);
    }

    #[test]
    fn test_mine_pending_seals_and_drains() {
        let node = LedgerNode::in_memory(1).unwrap();
        node.submit(custom("a")).unwrap();
        node.submit(custom("b")).unwrap();

        let block = node.mine_pending("registrar").unwrap();
        assert_eq!(block.index, 1);
        assert_eq!(labels(&block.transactions), vec!["a", "b"]);
        match &block.transactions.last().unwrap().kind {
            TransactionKind::MiningReward(reward) => {
                assert_eq!(reward.beneficiary, "registrar");
                assert_eq!(reward.reward, 100);
            }
            other => panic!("expected reward last, got {:?}", other),
        }

        assert!(node.pool().is_empty());
        assert!(matches!(
            node.mine_pending("registrar"),
            Err(ChainError::NoPendingTransactions)
        ));
        assert_eq!(node.chain().len(), 2);
        assert!(node.is_valid());
    }

    #[test]
    fn test_linkage_after_several_cycles() {
        let node = LedgerNode::in_memory(1).unwrap();
        for i in 0..3 {
            node.submit(custom(&format!("tx-{}", i))).unwrap();
            node.mine_pending("SYSTEM").unwrap();
        }
        let chain = node.chain();
        for pair in chain.blocks().windows(2) {
            assert_eq!(pair[1].previous_hash, pair[0].hash);
            assert!(pair[1].timestamp >= pair[0].timestamp);
        }
    }

    #[test]
    fn test_cancelled_cycle_restores_pool() {
        let node = LedgerNode::in_memory(1).unwrap();
        node.submit(custom("first")).unwrap();
        node.submit(custom("second")).unwrap();
        let before = node.pool().snapshot();

        let control = MiningControl::new();
        control.cancel();
        assert!(matches!(
            node.mine_pending_with("SYSTEM", &control),
            Err(ChainError::MiningCancelled)
        ));

        assert_eq!(node.pool().snapshot(), before);
        assert_eq!(node.chain().len(), 1);
        assert!(!node.is_mining());

        // retry succeeds with the same transactions
        let block = node.mine_pending("SYSTEM").unwrap();
        assert_eq!(labels(&block.transactions), vec!["first", "second"]);
    }

    #[test]
    fn test_blank_miner_identity_leaves_pool_untouched() {
        let node = LedgerNode::in_memory(1).unwrap();
        node.submit(custom("a")).unwrap();
        assert!(matches!(
            node.mine_pending(""),
            Err(ChainError::InvalidTransaction(_))
        ));
        assert_eq!(node.pool().len(), 1);
    }

    #[test]
    fn test_cancel_mining_when_idle() {
        let node = LedgerNode::in_memory(0).unwrap();
        assert!(!node.cancel_mining());
    }

    #[test]
    fn test_blocks_persisted() {
        let store = InMemoryPersistence::new();
        let node = LedgerNode::new(
            LedgerConfig {
                difficulty: 1,
                ..LedgerConfig::default()
            },
            Box::new(store.clone()),
        )
        .unwrap();
        node.submit(custom("a")).unwrap();
        node.mine_pending("SYSTEM").unwrap();

        let stored = store.load_blocks().unwrap();
        assert_eq!(stored, node.chain().blocks().to_vec());

        let reopened = LedgerNode::new(
            LedgerConfig {
                difficulty: 1,
                ..LedgerConfig::default()
            },
            Box::new(store),
        )
        .unwrap();
        assert_eq!(reopened.chain().len(), 2);
    }

    #[test]
    fn test_failed_block_write_keeps_chain_and_store_in_step() {
        let store = FlakyStore::default();
        let node = LedgerNode::new(test_config(), Box::new(store.clone())).unwrap();
        node.submit(custom("first")).unwrap();

        store.fail_blocks.store(true, Ordering::SeqCst);
        assert!(matches!(
            node.mine_pending("SYSTEM"),
            Err(ChainError::DatabaseError(_))
        ));
        assert_eq!(node.chain().len(), 1);
        assert_eq!(labels(&node.pool().snapshot()), vec!["first"]);

        store.fail_blocks.store(false, Ordering::SeqCst);
        node.submit(custom("second")).unwrap();
        let block = node.mine_pending("SYSTEM").unwrap();
        assert_eq!(block.index, 1);
        assert_eq!(labels(&block.transactions), vec!["first", "second"]);

        let reopened = LedgerNode::new(test_config(), Box::new(store)).unwrap();
        assert_eq!(reopened.chain().blocks(), node.chain().blocks());
        assert!(reopened.is_valid());
    }

    #[test]
    fn test_genesis_respects_mining_timeout() {
        let store = InMemoryPersistence::new();
        let config = LedgerConfig {
            difficulty: MAX_DIFFICULTY,
            mining_timeout: Some(Duration::ZERO),
            ..LedgerConfig::default()
        };
        let result = LedgerNode::new(config, Box::new(store.clone()));
        assert!(matches!(result, Err(ChainError::MiningTimedOut { .. })));
        assert!(store.load_blocks().unwrap().is_empty());
    }

    #[test]
    fn test_pending_transactions_survive_reopen() {
        let store = InMemoryPersistence::new();
        let node = LedgerNode::new(test_config(), Box::new(store.clone())).unwrap();
        node.submit(custom("a")).unwrap();
        node.submit(custom("b")).unwrap();

        let control = MiningControl::new();
        control.cancel();
        assert!(node.mine_pending_with("SYSTEM", &control).is_err());
        drop(node);

        let reopened = LedgerNode::new(test_config(), Box::new(store.clone())).unwrap();
        assert_eq!(labels(&reopened.pool().snapshot()), vec!["a", "b"]);
        reopened.mine_pending("SYSTEM").unwrap();
        assert!(store.load_pending().unwrap().is_empty());
        drop(reopened);

        let again = LedgerNode::new(test_config(), Box::new(store)).unwrap();
        assert!(again.pool().is_empty());
        assert_eq!(again.chain().len(), 2);
    }

    #[test]
    fn test_already_sealed_pending_entries_are_skipped() {
        let store = InMemoryPersistence::new();
        let node = LedgerNode::new(test_config(), Box::new(store.clone())).unwrap();
        node.submit(custom("sealed")).unwrap();
        let stale = store.load_pending().unwrap();
        node.mine_pending("SYSTEM").unwrap();
        drop(node);

        // as if the process stopped between writing the block and the pending set
        store.save_pending(&stale).unwrap();
        let reopened = LedgerNode::new(test_config(), Box::new(store)).unwrap();
        assert!(reopened.pool().is_empty());
    }

    #[tokio::test]
    async fn test_async_mining() {
        let node = Arc::new(LedgerNode::in_memory(1).unwrap());
        node.submit(custom("async")).unwrap();
        let block = node.mine_pending_async("SYSTEM", None).await.unwrap();
        assert_eq!(block.index, 1);
        assert!(node.pool().is_empty());
    }

    #[tokio::test]
    async fn test_async_timeout_restores_pool() {
        let node = Arc::new(LedgerNode::in_memory(1).unwrap());
        node.submit(custom("slow")).unwrap();

        let result = node.mine_pending_async("SYSTEM", Some(Duration::ZERO)).await;
        assert!(matches!(result, Err(ChainError::MiningTimedOut { .. })));
        assert_eq!(node.pool().len(), 1);
        assert_eq!(node.chain().len(), 1);
    }
}
