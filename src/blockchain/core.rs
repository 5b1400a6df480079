// Blocks and the ledger itself, the credential lookup index, and the
// integrity walk over a sequence of blocks.
pub mod chain;
pub mod state;
pub mod validation;

pub use chain::*;
pub use state::*;
pub use validation::*;
