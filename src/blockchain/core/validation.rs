use std::fmt;

use super::chain::{Block, GENESIS_PREVIOUS_HASH};

/// Why a ledger failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ValidationFailure {
    /// The ledger holds no blocks at all.
    MissingGenesis,
    /// The stored hash differs from a recomputation over the block's fields.
    HashMismatch,
    /// `previous_hash` does not point at the preceding block (or the
    /// sentinel, for genesis).
    LinkageBroken,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ValidationFailure::MissingGenesis => write!(f, "missing genesis block"),
            ValidationFailure::HashMismatch => write!(f, "hash mismatch"),
            ValidationFailure::LinkageBroken => write!(f, "linkage broken"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChainValidation {
    Valid,
    Invalid { index: u64, reason: ValidationFailure },
}

impl ChainValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, ChainValidation::Valid)
    }
}

/// Walk the ledger, recomputing each hash and checking each link.
/// Returns the first offending block.
pub fn validate_chain(blocks: &[Block]) -> ChainValidation {
    let Some(genesis) = blocks.first() else {
        return ChainValidation::Invalid {
            index: 0,
            reason: ValidationFailure::MissingGenesis,
        };
    };

    if !genesis.has_valid_hash() {
        return ChainValidation::Invalid {
            index: 0,
            reason: ValidationFailure::HashMismatch,
        };
    }
    if genesis.previous_hash != GENESIS_PREVIOUS_HASH {
        return ChainValidation::Invalid {
            index: 0,
            reason: ValidationFailure::LinkageBroken,
        };
    }

    for (i, pair) in blocks.windows(2).enumerate() {
        let (previous, current) = (&pair[0], &pair[1]);
        let index = (i + 1) as u64;

        if !current.has_valid_hash() {
            tracing::warn!("Hash mismatch at block {}", index);
            return ChainValidation::Invalid {
                index,
                reason: ValidationFailure::HashMismatch,
            };
        }
        if current.previous_hash != previous.hash {
            tracing::warn!("Broken linkage at block {}", index);
            return ChainValidation::Invalid {
                index,
                reason: ValidationFailure::LinkageBroken,
            };
        }
    }

    ChainValidation::Valid
}
