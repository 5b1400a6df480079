// Thin re-export module: the ledger lives in `blockchain/core.rs`, split
// into block/chain management, the credential index and chain validation.

pub mod core;
pub use core::*;
