//! Append-only, tamper-evident audit chain.
//!
//! The chain maps a sequence of opaque payloads to hash-linked
//! [`AuditEntry`] records. Each link's digest covers its own fields and the
//! previous link's hash, so silent mutation of any historical record is
//! detectable by recomputation.
//!
//! The chain is an in-memory primitive: `append` serialises on an internal
//! mutex and never touches I/O. Durability is the caller's concern — the
//! store persists whatever audit records it wants to keep.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Mutex;

/// Hex form of the all-zero 32-byte digest; `previous_hash` of a genesis link.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One link in the audit chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the chain, starting at 0.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    /// Opaque payload; PII must be masked before it gets here.
    pub payload: String,
    pub previous_hash: String,
    pub hash: String,
}

/// Canonical chain digest:
/// `SHA-256(sequence | timestamp_rfc3339_nano | payload | previous_hash)`
/// with literal `|` separators, hex-encoded.
///
/// The timestamp is rendered at fixed nanosecond precision so the
/// serialisation is injective. Reused by the dispute state machine for
/// transition hashes.
pub fn chain_digest(
    sequence: u64,
    timestamp: &DateTime<Utc>,
    payload: &str,
    previous_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sequence.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes());
    hasher.update(b"|");
    hasher.update(payload.as_bytes());
    hasher.update(b"|");
    hasher.update(previous_hash.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify an arbitrary slice of links: every hash must match the canonical
/// digest of its own fields, and every `previous_hash` must match the prior
/// link's hash (the genesis digest for the first link). Returns false at the
/// first broken link; an empty chain is trivially valid.
pub fn verify(chain: &[AuditEntry]) -> bool {
    let mut previous = GENESIS_HASH;
    for entry in chain {
        if entry.previous_hash != previous {
            return false;
        }
        let expected = chain_digest(
            entry.sequence,
            &entry.timestamp,
            &entry.payload,
            &entry.previous_hash,
        );
        if entry.hash != expected {
            return false;
        }
        previous = &entry.hash;
    }
    true
}

// ── AuditChain ────────────────────────────────────────────────────────────────

struct ChainState {
    next_sequence: u64,
    last_hash: String,
    entries: Vec<AuditEntry>,
}

/// One logical chain. The sequence counter and last hash live behind a single
/// mutex so concurrent appends serialise into a total order.
pub struct AuditChain {
    state: Mutex<ChainState>,
}

impl AuditChain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState {
                next_sequence: 0,
                last_hash: GENESIS_HASH.to_string(),
                entries: Vec::new(),
            }),
        }
    }

    /// Append a payload and return the new link. Never fails in steady state;
    /// a poisoned mutex means a prior append panicked mid-update, and the
    /// chain keeps appending from the last consistent link.
    pub fn append(&self, payload: impl Into<String>) -> AuditEntry {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let timestamp = Utc::now();
        let sequence = state.next_sequence;
        let previous_hash = state.last_hash.clone();
        let payload = payload.into();
        let hash = chain_digest(sequence, &timestamp, &payload, &previous_hash);
        let entry = AuditEntry {
            sequence,
            timestamp,
            payload,
            previous_hash,
            hash: hash.clone(),
        };
        state.next_sequence += 1;
        state.last_hash = hash;
        state.entries.push(entry.clone());
        entry
    }

    /// Snapshot of all links appended so far, in order.
    pub fn entries(&self) -> Vec<AuditEntry> {
        let state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.entries.clone()
    }

    pub fn len(&self) -> usize {
        let state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Verify the chain held in memory.
    pub fn verify(&self) -> bool {
        verify(&self.entries())
    }
}

impl Default for AuditChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn empty_chain_verifies() {
        let chain = AuditChain::new();
        assert!(chain.verify());
        assert!(chain.is_empty());
    }

    #[test]
    fn append_links_in_order() {
        let chain = AuditChain::new();
        let first = chain.append("p1");
        let second = chain.append("p2");
        assert_eq!(first.sequence, 0);
        assert_eq!(first.previous_hash, GENESIS_HASH);
        assert_eq!(second.sequence, 1);
        assert_eq!(second.previous_hash, first.hash);
        assert!(chain.verify());
    }

    #[test]
    fn append_after_append_still_verifies() {
        let chain = AuditChain::new();
        chain.append("p1");
        chain.append("p2");
        assert!(verify(&chain.entries()));
        chain.append("p3");
        assert!(verify(&chain.entries()));
    }

    #[test]
    fn tampered_payload_breaks_verification() {
        let chain = AuditChain::new();
        chain.append("p1");
        chain.append("p2");
        chain.append("p3");

        let mut entries = chain.entries();
        let original = entries[1].payload.clone();
        entries[1].payload = "p2-tampered".to_string();
        assert!(!verify(&entries));

        entries[1].payload = original;
        assert!(verify(&entries));
    }

    #[test]
    fn tampered_linkage_breaks_verification() {
        let chain = AuditChain::new();
        chain.append("p1");
        chain.append("p2");

        let mut entries = chain.entries();
        entries[1].previous_hash = GENESIS_HASH.to_string();
        assert!(!verify(&entries));
    }

    #[test]
    fn digest_is_separator_sensitive() {
        let now = Utc::now();
        let a = chain_digest(1, &now, "ab", GENESIS_HASH);
        let b = chain_digest(1, &now, "a|b", GENESIS_HASH);
        assert_ne!(a, b);
    }

    #[test]
    fn concurrent_appends_serialise_into_one_order() {
        let chain = Arc::new(AuditChain::new());
        let mut handles = Vec::new();
        for worker in 0..8 {
            let chain = Arc::clone(&chain);
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    chain.append(format!("w{worker}-{i}"));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let entries = chain.entries();
        assert_eq!(entries.len(), 400);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.sequence, i as u64);
        }
        assert!(verify(&entries));
    }
}
