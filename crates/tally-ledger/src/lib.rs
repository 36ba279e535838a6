//! Ledger engine: account lifecycle, double-entry posting, transfers,
//! balance reads, reconciliation, and the invariant validator family.

pub mod engine;
pub mod validate;

pub use engine::{
    CreateAccountRequest, LedgerEngine, PostingReceipt, PostingRequest, Reconciliation,
    TransferRequest,
};
pub use validate::{ValidationKind, ValidationResult};
