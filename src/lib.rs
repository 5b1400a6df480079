//! AcadChain - a hash-linked ledger for academic credentials
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`blockchain`] - Blocks, the append-only chain and chain validation
//! - [`transaction`] - Transaction types and validation
//! - [`mempool`] - Pending-transaction pool
//!
//! ## Consensus
//! - [`miner`] - Cancellable proof-of-work search
//! - [`node`] - Mining-cycle orchestration over chain, pool and storage
//!
//! ## Academic Records
//! - [`models`] - Institutions, students, credentials, research papers
//! - [`registry`] - Credential registry: issuance rules, verification, search
//! - [`directory`] - Built-in institution catalog
//!
//! ## Cryptography
//! - [`crypto`] - SHA-256 helpers and difficulty predicate
//!
//! ## State Management
//! - [`persistence`] - Block log and registry snapshots (SQLite)
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod mempool;
pub mod transaction;

// ============================================================================
// Consensus & Mining
// ============================================================================
pub mod miner;
pub mod node;

// ============================================================================
// Academic Records
// ============================================================================
pub mod directory;
pub mod models;
pub mod registry;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// State Management
// ============================================================================
pub mod persistence;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
