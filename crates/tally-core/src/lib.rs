//! Core value types for the Tally bookkeeping engine.
//!
//! This crate defines the shared vocabulary of the workspace:
//! - [`Amount`] — fixed-scale (8 fractional digits) decimal money
//! - Identifier newtypes ([`AccountId`], [`EntryId`], [`TransactionId`],
//!   [`DisputeId`], [`HoldId`]) drawn from disjoint namespaces
//! - Ledger entities ([`Account`], [`JournalEntry`], [`Balance`],
//!   [`BalanceSnapshot`]) and dispute entities ([`Dispute`], [`Hold`],
//!   [`FraudReserve`], [`StateTransition`])
//! - The workspace-wide [`Error`] enum and its [`ErrorKind`] taxonomy
//!
//! Entities never hold references to one another; every relationship is
//! expressed by identifier and resolved through the store.

pub mod account;
pub mod amount;
pub mod config;
pub mod constants;
pub mod dispute;
pub mod error;
pub mod mask;
pub mod types;

pub use account::{
    signed_delta, Account, AccountFilter, AccountType, Balance, BalanceSnapshot,
    ConsistencyReport, EntryType, JournalEntry,
};
pub use amount::Amount;
pub use config::LedgerConfig;
pub use dispute::{
    Dispute, DisputeFilter, DisputeStatus, FraudReserve, Hold, HoldStatus, StateTransition,
};
pub use error::{Error, ErrorKind};
pub use types::{AccountId, CallContext, DisputeId, EntryId, HoldId, Metadata, Reply, TransactionId};
