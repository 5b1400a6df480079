//! Error types for AcadChain

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A single offending field reported by credential validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        FieldError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Institution already registered: {0}")]
    DuplicateInstitution(String),

    #[error("Student already registered: {0}")]
    DuplicateStudent(String),

    #[error("Credential already exists: {0}")]
    DuplicateCredential(String),

    #[error("Research paper already exists: {0}")]
    DuplicateResearchPaper(String),

    #[error("Institution not found: {0}")]
    InstitutionNotFound(String),

    #[error("Institution not verified: {0}")]
    InstitutionNotVerified(String),

    #[error("Student not found: {0}")]
    StudentNotFound(String),

    #[error("Credential not found: {0}")]
    CredentialNotFound(String),

    #[error("Credential {0} has not been sealed into the ledger")]
    NotFoundInLedger(String),

    #[error("Validation errors: {}", join_fields(.0))]
    ValidationError(Vec<FieldError>),

    #[error("No pending transactions to mine")]
    NoPendingTransactions,

    #[error("Block does not extend the ledger tip (expected {expected}, got {found})")]
    ChainLinkageError { expected: String, found: String },

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Mining was cancelled")]
    MiningCancelled,

    #[error("Mining timed out after {after:?}")]
    MiningTimedOut { after: Duration },

    #[error("Ledger is corrupt at block {index}: {reason}")]
    CorruptLedger { index: u64, reason: String },

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ChainError {
    /// Field errors carried by a `ValidationError`, empty for every other variant.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            ChainError::ValidationError(errors) => errors,
            _ => &[],
        }
    }
}

impl From<Box<bincode::ErrorKind>> for ChainError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        ChainError::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::SerializationError(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::ConfigError(err.to_string())
    }
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::DatabaseError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
