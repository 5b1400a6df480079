//! Proof-of-work search
//!
//! A block is sealed once its hash carries `difficulty` leading zero hex
//! digits. [`mine_block`] is the plain unbounded search; [`mine_block_with`]
//! polls a [`MiningControl`] so a caller can cancel it or bound it in time.

use crate::blockchain::Block;
use crate::crypto::meets_difficulty;
use crate::error::ChainError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Highest meaningful difficulty: a SHA-256 digest has 64 hex digits.
pub const MAX_DIFFICULTY: u32 = 64;

/// How many nonces are tried between checks of the cancellation flag and
/// deadline.
pub const CHECK_INTERVAL: u64 = 4096;

/// Cancellation handle and optional deadline for one mining run.
///
/// Clones share the cancellation flag, so a handle kept by the caller can
/// stop a search running on another thread.
#[derive(Debug, Clone, Default)]
pub struct MiningControl {
    cancelled: Arc<AtomicBool>,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl MiningControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give up once `timeout` has elapsed from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn check(&self) -> Result<(), ChainError> {
        if self.is_cancelled() {
            return Err(ChainError::MiningCancelled);
        }
        if let (Some(deadline), Some(after)) = (self.deadline, self.timeout) {
            if Instant::now() >= deadline {
                return Err(ChainError::MiningTimedOut { after });
            }
        }
        Ok(())
    }
}

/// Outcome of a successful search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiningStats {
    /// Number of hashes computed, including the initial one at nonce 0.
    pub attempts: u64,
    pub elapsed: Duration,
}

/// Search nonces until the block satisfies `difficulty`. Unbounded.
pub fn mine_block(block: Block, difficulty: u32) -> Block {
    let mut block = block;
    let start = Instant::now();
    while !meets_difficulty(&block.hash, difficulty) {
        block.nonce = block.nonce.wrapping_add(1);
        block.recompute_hash();
    }
    debug!(
        "Block {} sealed at nonce {} in {:.3}s",
        block.index,
        block.nonce,
        start.elapsed().as_secs_f64()
    );
    block
}

/// Cancellable search. On error the partially searched block is dropped;
/// the caller still owns whatever the block was built from.
pub fn mine_block_with(
    block: Block,
    difficulty: u32,
    control: &MiningControl,
) -> Result<(Block, MiningStats), ChainError> {
    if difficulty > MAX_DIFFICULTY {
        return Err(ChainError::InvalidBlock(format!(
            "Difficulty {} exceeds the maximum of {}",
            difficulty, MAX_DIFFICULTY
        )));
    }

    let mut block = block;
    let start = Instant::now();
    let mut attempts: u64 = 1;
    control.check()?;

    while !meets_difficulty(&block.hash, difficulty) {
        if attempts % CHECK_INTERVAL == 0 {
            control.check()?;
        }
        block.nonce = block.nonce.wrapping_add(1);
        block.recompute_hash();
        attempts += 1;
    }

    let stats = MiningStats {
        attempts,
        elapsed: start.elapsed(),
    };
    info!(
        "Block {} mined! nonce {} after {} attempts in {:.3}s (hash {}...)",
        block.index,
        block.nonce,
        stats.attempts,
        stats.elapsed.as_secs_f64(),
        &block.hash_hex()[..16]
    );
    Ok((block, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::GENESIS_PREVIOUS_HASH;
    use crate::transaction::{CustomTx, Transaction, TransactionKind};

    fn sample_block(tag: &str) -> Block {
        let tx = Transaction::new(TransactionKind::Custom(CustomTx::new(tag)));
        Block::new(1, vec![tx], GENESIS_PREVIOUS_HASH)
    }

    #[test]
    fn test_mined_hash_meets_difficulty() {
        for difficulty in 0..=3 {
            let block = mine_block(sample_block("difficulty"), difficulty);
            let hex = block.hash_hex();
            assert!(hex.starts_with(&"0".repeat(difficulty as usize)));
            assert!(block.has_valid_hash());
        }
    }

    #[test]
    fn test_difficulty_zero_accepts_nonce_zero() {
        let (block, stats) =
            mine_block_with(sample_block("zero"), 0, &MiningControl::new()).unwrap();
        assert_eq!(block.nonce, 0);
        assert_eq!(stats.attempts, 1);
    }

    #[test]
    fn test_higher_difficulty_needs_more_attempts() {
        let control = MiningControl::new();
        let mean_attempts = |difficulty: u32| {
            let runs = 20;
            let total: u64 = (0..runs)
                .map(|i| {
                    let (_, stats) =
                        mine_block_with(sample_block(&format!("run-{}", i)), difficulty, &control)
                            .unwrap();
                    stats.attempts
                })
                .sum();
            total as f64 / runs as f64
        };

        let easy = mean_attempts(1);
        let hard = mean_attempts(2);
        assert!(hard >= easy, "difficulty 2 averaged {} attempts vs {}", hard, easy);
    }

    #[test]
    fn test_cancelled_control_stops_search() {
        let control = MiningControl::new();
        control.cancel();
        let result = mine_block_with(sample_block("cancel"), 64, &control);
        assert!(matches!(result, Err(ChainError::MiningCancelled)));
    }

    #[test]
    fn test_timeout_stops_search() {
        let control = MiningControl::new().with_timeout(Duration::from_millis(20));
        let result = mine_block_with(sample_block("timeout"), 64, &control);
        assert!(matches!(result, Err(ChainError::MiningTimedOut { .. })));
    }

    #[test]
    fn test_clones_share_cancellation() {
        let control = MiningControl::new();
        let handle = control.clone();
        handle.cancel();
        assert!(control.is_cancelled());
    }

    #[test]
    fn test_rejects_impossible_difficulty() {
        let result =
            mine_block_with(sample_block("max"), MAX_DIFFICULTY + 1, &MiningControl::new());
        assert!(matches!(result, Err(ChainError::InvalidBlock(_))));
    }
}
