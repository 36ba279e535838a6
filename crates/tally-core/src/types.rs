use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// String→string metadata map attached to requests and persisted rows.
///
/// Richer structures belong to callers, who serialise them before handing
/// them to the core. BTreeMap keeps iteration (and therefore audit payloads)
/// deterministic.
pub type Metadata = BTreeMap<String, String>;

// ── Identifier newtypes ───────────────────────────────────────────────────────
//
// Identifiers are opaque strings in disjoint namespaces. Generated values are
// time-ordered uuid7 strings behind a namespace prefix; externally supplied
// values pass through untouched.

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Mint a fresh namespace-prefixed identifier.
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "_{}"), uuid7::uuid7()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn as_bytes(&self) -> &[u8] {
                self.0.as_bytes()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_type!(
    /// Ledger account identifier.
    AccountId,
    "acct"
);
id_type!(
    /// Journal entry identifier.
    EntryId,
    "je"
);
id_type!(
    /// Groups the legs of one double-entry posting.
    TransactionId,
    "txn"
);
id_type!(
    /// External dispute (chargeback case) identifier.
    DisputeId,
    "dsp"
);
id_type!(
    /// Funds-hold identifier.
    HoldId,
    "hold"
);

// ── Call context ──────────────────────────────────────────────────────────────

/// Per-request context threaded through every public operation.
///
/// The correlation id is propagated unchanged onto every [`Reply`] and into
/// audit payloads so a caller can stitch the records of one logical request
/// back together.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallContext {
    pub correlation_id: String,
}

impl CallContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
        }
    }

    /// Context with a freshly minted correlation id, for callers that have none.
    pub fn anonymous() -> Self {
        Self {
            correlation_id: format!("corr_{}", uuid7::uuid7()),
        }
    }
}

/// Response wrapper carrying the caller's correlation id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Reply<T> {
    pub correlation_id: String,
    pub value: T,
}

impl<T> Reply<T> {
    pub fn new(ctx: &CallContext, value: T) -> Self {
        Self {
            correlation_id: ctx.correlation_id.clone(),
            value,
        }
    }
}
