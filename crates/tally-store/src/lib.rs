//! Serialisable transactional persistence for the Tally ledger.
//!
//! [`LedgerDb`] owns the sled trees holding accounts, journal entries,
//! balances, snapshots, disputes, holds, reserves, and transition chains.
//! [`Tx`] layers optimistic serialisable transactions on top: reads take
//! byte-level snapshots, writes are staged in memory, and commit validates
//! the whole read set under a store-wide lock before anything is applied.
//!
//! Mutating call sites go through [`with_retry`], which absorbs
//! serialisation conflicts with bounded backoff and surfaces every other
//! error unchanged.

pub mod db;
pub mod retry;
pub mod tx;

pub use db::LedgerDb;
pub use retry::{with_retry, RETRY_BACKOFF_STEP, SERIALIZATION_RETRY_LIMIT};
pub use tx::{Tx, FULL_SCAN_DEADLINE, MULTI_ROW_VALIDATION_DEADLINE, SINGLE_ROW_WRITE_DEADLINE};
