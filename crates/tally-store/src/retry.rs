//! Serialisation-conflict retry loop.
//!
//! Every mutating call site in the workspace funnels through [`with_retry`]
//! rather than hand-rolling its own loop. Only serialisation conflicts are
//! retried; deadline, precondition, and storage errors propagate unchanged.

use std::time::Duration;

use tally_core::Error;
use tracing::warn;

use crate::db::LedgerDb;
use crate::tx::Tx;

/// Retries after the initial attempt. Four attempts total; the fourth
/// conflict surfaces as `SerializationRetryExhausted`.
pub const SERIALIZATION_RETRY_LIMIT: u32 = 3;

/// Backoff is `RETRY_BACKOFF_STEP × attempt`.
pub const RETRY_BACKOFF_STEP: Duration = Duration::from_millis(10);

/// Run `op` inside a fresh serialisable transaction, committing on success.
///
/// `op` must be idempotent across attempts: each retry sees a brand-new
/// transaction and re-reads everything through it.
pub fn with_retry<T, F>(db: &LedgerDb, deadline: Duration, mut op: F) -> Result<T, Error>
where
    F: FnMut(&mut Tx<'_>) -> Result<T, Error>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let mut tx = db.begin_serializable(deadline);
        let outcome = match op(&mut tx) {
            Ok(value) => tx.commit().map(|()| value),
            Err(e) => Err(e),
        };
        match outcome {
            Err(Error::SerializationConflict) if attempt <= SERIALIZATION_RETRY_LIMIT => {
                warn!(attempt, "serialization conflict, retrying");
                std::thread::sleep(RETRY_BACKOFF_STEP * attempt);
            }
            Err(Error::SerializationConflict) => {
                return Err(Error::SerializationRetryExhausted { attempts: attempt });
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::SINGLE_ROW_WRITE_DEADLINE;
    use chrono::Utc;
    use tally_core::{Account, AccountId, AccountType, Amount, Balance, Metadata};

    fn temp_db() -> (tempfile::TempDir, LedgerDb) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db = LedgerDb::open(dir.path().join("store")).expect("open temp db");
        (dir, db)
    }

    fn seed_account(db: &LedgerDb, id: &str, number: &str) -> AccountId {
        let account = Account {
            id: AccountId::new(id),
            account_number: number.to_string(),
            account_type: AccountType::Asset,
            name: number.to_string(),
            currency: "USD".to_string(),
            is_active: true,
            created_at: Utc::now(),
            created_by: "test".to_string(),
            metadata: Metadata::new(),
        };
        with_retry(db, SINGLE_ROW_WRITE_DEADLINE, |tx| {
            tx.insert_account(&account)?;
            tx.update_balance(&Balance {
                account_id: account.id.clone(),
                balance: Amount::ZERO,
                updated_at: Utc::now(),
            })
        })
        .unwrap();
        account.id.clone()
    }

    #[test]
    fn success_on_first_attempt() {
        let (_dir, db) = temp_db();
        let id = seed_account(&db, "acct_a", "ASSET001");
        assert!(db.get_account(&id).unwrap().is_some());
    }

    #[test]
    fn conflict_is_retried_until_success() {
        let (_dir, db) = temp_db();
        let id = seed_account(&db, "acct_a", "ASSET001");

        // First two attempts collide with an interleaved writer; the third
        // sees a quiet store and commits.
        let mut attempts = 0;
        let result = with_retry(&db, SINGLE_ROW_WRITE_DEADLINE, |tx| {
            attempts += 1;
            let mut balance = tx.read_balance(&id)?;
            if attempts <= 2 {
                // Interleaved writer commits between this read and our commit.
                let mut other = db.begin_serializable(SINGLE_ROW_WRITE_DEADLINE);
                let mut b = other.read_balance(&id)?;
                b.balance = b.balance.checked_add(Amount::EPSILON)?;
                b.updated_at = Utc::now();
                other.update_balance(&b)?;
                other.commit()?;
            }
            balance.balance = balance.balance.checked_add("1".parse()?)?;
            balance.updated_at = Utc::now();
            tx.update_balance(&balance)
        });

        assert!(result.is_ok());
        assert_eq!(attempts, 3);
    }

    #[test]
    fn retry_budget_exhausts_after_four_attempts() {
        let (_dir, db) = temp_db();
        let id = seed_account(&db, "acct_a", "ASSET001");

        let mut attempts = 0;
        let err = with_retry(&db, SINGLE_ROW_WRITE_DEADLINE, |tx| {
            attempts += 1;
            let mut balance = tx.read_balance(&id)?;
            // A writer collides on every attempt.
            let mut other = db.begin_serializable(SINGLE_ROW_WRITE_DEADLINE);
            let mut b = other.read_balance(&id)?;
            b.balance = b.balance.checked_add(Amount::EPSILON)?;
            b.updated_at = Utc::now();
            other.update_balance(&b)?;
            other.commit()?;

            balance.balance = balance.balance.checked_add("1".parse()?)?;
            balance.updated_at = Utc::now();
            tx.update_balance(&balance)
        })
        .unwrap_err();

        assert!(matches!(
            err,
            tally_core::Error::SerializationRetryExhausted { attempts: 4 }
        ));
        assert_eq!(attempts, 4);
    }

    #[test]
    fn non_conflict_errors_propagate_immediately() {
        let (_dir, db) = temp_db();
        let mut attempts = 0;
        let err = with_retry(&db, SINGLE_ROW_WRITE_DEADLINE, |tx| {
            attempts += 1;
            tx.read_balance(&AccountId::new("acct_missing")).map(|_| ())
        })
        .unwrap_err();
        assert_eq!(err.kind(), tally_core::ErrorKind::NotFound);
        assert_eq!(attempts, 1);
    }
}
