use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::account::AccountType;
use crate::amount::Amount;
use crate::types::AccountId;

/// Persisted engine configuration.
///
/// Loaded from the store's meta tree at engine construction; in production
/// the values come from an operator-managed deployment, in tests from
/// [`LedgerConfig::default`] plus builder-style tweaks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Account types whose balance must not go below −ε. Policy, not code:
    /// only `asset` is gated out of the box.
    pub overdraft_gated_types: BTreeSet<AccountType>,

    /// reference_type → counterparty account for single-sided credit/debit
    /// postings. A posting whose reference_type has no mapping is rejected.
    pub counterparties: BTreeMap<String, AccountId>,

    /// Reserve percentage applied when a merchant has no configured
    /// fraud-reserve row yet. In [0, 1].
    #[serde(with = "rust_decimal::serde::str")]
    pub default_reserve_percentage: Decimal,

    /// Floor for a merchant's effective reserve.
    pub default_minimum_reserve: Amount,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let mut gated = BTreeSet::new();
        gated.insert(AccountType::Asset);
        Self {
            overdraft_gated_types: gated,
            counterparties: BTreeMap::new(),
            default_reserve_percentage: dec!(0.05),
            default_minimum_reserve: Amount::ZERO,
        }
    }
}

impl LedgerConfig {
    pub fn overdraft_gated(&self, account_type: AccountType) -> bool {
        self.overdraft_gated_types.contains(&account_type)
    }

    pub fn counterparty_for(&self, reference_type: &str) -> Option<&AccountId> {
        self.counterparties.get(reference_type)
    }

    /// Register a counterparty mapping (builder style, used by tests and
    /// deployment bootstrap).
    pub fn with_counterparty(
        mut self,
        reference_type: impl Into<String>,
        account: AccountId,
    ) -> Self {
        self.counterparties.insert(reference_type.into(), account);
        self
    }

    pub fn with_overdraft_gate(mut self, account_type: AccountType, gated: bool) -> Self {
        if gated {
            self.overdraft_gated_types.insert(account_type);
        } else {
            self.overdraft_gated_types.remove(&account_type);
        }
        self
    }
}
