//! Pending-transaction pool
//!
//! Holds validated transactions until the next mining cycle drains them
//! into a block. All operations take the pool lock, so `add` and `drain`
//! never interleave.

use crate::error::ChainError;
use crate::transaction::Transaction;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct TransactionPool {
    pending: Mutex<VecDeque<Transaction>>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and enqueue a transaction, returning its id.
    pub fn add(&self, tx: Transaction) -> Result<String, ChainError> {
        tx.validate()?;
        let id = tx.id.clone();
        let mut pending = self.pending.lock();
        pending.push_back(tx);
        debug!("Transaction {} added to pool ({} pending)", id, pending.len());
        Ok(id)
    }

    /// Remove and return every pending transaction in arrival order.
    pub fn drain(&self) -> Vec<Transaction> {
        let drained: Vec<Transaction> = self.pending.lock().drain(..).collect();
        if !drained.is_empty() {
            debug!("Drained {} transactions from pool", drained.len());
        }
        drained
    }

    /// Put transactions from an aborted mining cycle back at the head of the
    /// queue, ahead of anything added while the cycle was running.
    pub fn requeue_front(&self, transactions: Vec<Transaction>) {
        if transactions.is_empty() {
            return;
        }
        let count = transactions.len();
        let mut pending = self.pending.lock();
        for tx in transactions.into_iter().rev() {
            pending.push_front(tx);
        }
        info!("Restored {} transactions to pool ({} pending)", count, pending.len());
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Copy of the pending queue, oldest first.
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.pending.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{CustomTx, MiningRewardTx, TransactionKind};
    use std::sync::Arc;
    use std::thread;

    fn custom(label: &str) -> Transaction {
        Transaction::new(TransactionKind::Custom(CustomTx::new(label)))
    }

    #[test]
    fn test_add_returns_id_and_drain_empties() {
        let pool = TransactionPool::new();
        let tx = custom("a");
        let id = pool.add(tx.clone()).unwrap();
        assert_eq!(id, tx.id);
        assert_eq!(pool.len(), 1);

        let drained = pool.drain();
        assert_eq!(drained, vec![tx]);
        assert!(pool.is_empty());
        assert!(pool.drain().is_empty());
    }

    #[test]
    fn test_drain_preserves_order() {
        let pool = TransactionPool::new();
        let ids: Vec<String> = (0..5)
            .map(|i| pool.add(custom(&format!("tx-{}", i))).unwrap())
            .collect();
        let drained: Vec<String> = pool.drain().into_iter().map(|tx| tx.id).collect();
        assert_eq!(drained, ids);
    }

    #[test]
    fn test_add_rejects_invalid_transaction() {
        let pool = TransactionPool::new();
        let tx = Transaction::new(TransactionKind::MiningReward(MiningRewardTx {
            beneficiary: String::new(),
            reward: 1,
        }));
        assert!(matches!(pool.add(tx), Err(ChainError::InvalidTransaction(_))));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_requeue_front_restores_ahead_of_new_arrivals() {
        let pool = TransactionPool::new();
        pool.add(custom("first")).unwrap();
        pool.add(custom("second")).unwrap();
        let drained = pool.drain();

        pool.add(custom("late")).unwrap();
        pool.requeue_front(drained.clone());

        let labels: Vec<String> = pool
            .snapshot()
            .into_iter()
            .map(|tx| match tx.kind {
                TransactionKind::Custom(c) => c.label,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(labels, vec!["first", "second", "late"]);
    }

    #[test]
    fn test_concurrent_adds_are_not_lost() {
        let pool = Arc::new(TransactionPool::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for i in 0..50 {
                        pool.add(custom(&format!("{}-{}", t, i))).unwrap();
                    }
                })
            })
            .collect();

        let mut drained = 0;
        for handle in handles {
            drained += pool.drain().len();
            handle.join().unwrap();
        }
        drained += pool.drain().len();
        assert_eq!(drained, 200);
    }
}
