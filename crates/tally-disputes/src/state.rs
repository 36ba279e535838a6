//! The dispute state machine.
//!
//! States move PENDING → AUTHORIZED → SETTLED → DISPUTED → REVERSED, with
//! REVERSED terminal and reachable from every non-terminal state. Each
//! transition is a link in a per-dispute hash chain built on
//! [`tally_audit::chain_digest`]; the store refuses links that do not chain
//! onto the current head, and concurrent transitions serialise on the
//! dispute row.

use chrono::{DateTime, SecondsFormat, Utc};

use tally_audit::{chain_digest, GENESIS_HASH};
use tally_core::{Dispute, DisputeId, DisputeStatus, Error, Metadata, StateTransition};
use tally_store::Tx;

/// Allowed successor set, fixed by the lifecycle.
pub fn allowed_successors(from: DisputeStatus) -> &'static [DisputeStatus] {
    match from {
        DisputeStatus::Pending => &[DisputeStatus::Authorized, DisputeStatus::Reversed],
        DisputeStatus::Authorized => &[DisputeStatus::Settled, DisputeStatus::Reversed],
        DisputeStatus::Settled => &[DisputeStatus::Disputed, DisputeStatus::Reversed],
        DisputeStatus::Disputed => &[DisputeStatus::Reversed],
        DisputeStatus::Reversed => &[],
    }
}

pub fn is_transition_allowed(from: DisputeStatus, to: DisputeStatus) -> bool {
    allowed_successors(from).contains(&to)
}

/// Canonical digest payload for a transition:
/// `dispute_id|from|to|reason|actor|timestamp_rfc3339_nano`.
fn transition_payload(
    dispute_id: &DisputeId,
    from: DisputeStatus,
    to: DisputeStatus,
    reason: &str,
    actor: &str,
    timestamp: &DateTime<Utc>,
) -> String {
    format!(
        "{dispute_id}|{from}|{to}|{reason}|{actor}|{}",
        timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
    )
}

fn build_transition(
    dispute_id: &DisputeId,
    sequence: u64,
    from: DisputeStatus,
    to: DisputeStatus,
    reason: &str,
    actor: &str,
    prev_hash: &str,
    metadata: Metadata,
    now: DateTime<Utc>,
) -> StateTransition {
    let payload = transition_payload(dispute_id, from, to, reason, actor, &now);
    let transition_hash = chain_digest(sequence, &now, &payload, prev_hash);
    StateTransition {
        id: format!("st_{}", uuid7::uuid7()),
        dispute_id: dispute_id.clone(),
        from_state: from,
        to_state: to,
        reason: reason.to_string(),
        created_at: now,
        created_by: actor.to_string(),
        transition_hash,
        prev_hash: prev_hash.to_string(),
        metadata,
    }
}

/// Record the genesis PENDING link for a freshly inserted dispute. Its
/// history must be empty.
pub fn record_initial_transition(
    tx: &mut Tx<'_>,
    dispute: &Dispute,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<StateTransition, Error> {
    let history = tx.read_state_transition_history(&dispute.dispute_id)?;
    if !history.is_empty() {
        return Err(Error::Conflict(format!(
            "dispute {} already has a transition history",
            dispute.dispute_id
        )));
    }
    let transition = build_transition(
        &dispute.dispute_id,
        0,
        DisputeStatus::Pending,
        DisputeStatus::Pending,
        "dispute created",
        actor,
        GENESIS_HASH,
        Metadata::new(),
        now,
    );
    tx.insert_state_transition(&transition)?;
    Ok(transition)
}

/// Validate and append one transition, updating the dispute row's status
/// mirror. The dispute row read serialises concurrent proposers.
pub fn propose_transition(
    tx: &mut Tx<'_>,
    dispute_id: &DisputeId,
    to: DisputeStatus,
    reason: &str,
    actor: &str,
    metadata: Metadata,
    now: DateTime<Utc>,
) -> Result<StateTransition, Error> {
    // The row read both checks existence and pins the dispute for commit-time
    // validation, serialising concurrent proposers.
    if tx.read_dispute(dispute_id)?.is_none() {
        return Err(Error::not_found("dispute", dispute_id.as_str()));
    }

    let history = tx.read_state_transition_history(dispute_id)?;
    // An empty history is the legal initial condition: the dispute is PENDING.
    let from = history
        .last()
        .map(|t| t.to_state)
        .unwrap_or(DisputeStatus::Pending);

    if !is_transition_allowed(from, to) {
        return Err(Error::InvalidStateTransition {
            dispute_id: dispute_id.to_string(),
            from,
            to,
        });
    }

    let prev_hash = history
        .last()
        .map(|t| t.transition_hash.clone())
        .unwrap_or_else(|| GENESIS_HASH.to_string());

    let transition = build_transition(
        dispute_id,
        history.len() as u64,
        from,
        to,
        reason,
        actor,
        &prev_hash,
        metadata,
        now,
    );
    tx.insert_state_transition(&transition)?;
    tx.update_dispute_status(dispute_id, to)?;
    Ok(transition)
}

/// The latest transition's `to_state`, or PENDING when no transitions exist.
pub fn current_state(tx: &mut Tx<'_>, dispute_id: &DisputeId) -> Result<DisputeStatus, Error> {
    if tx.read_dispute(dispute_id)?.is_none() {
        return Err(Error::not_found("dispute", dispute_id.as_str()));
    }
    Ok(tx
        .read_latest_state_transition(dispute_id)?
        .map(|t| t.to_state)
        .unwrap_or(DisputeStatus::Pending))
}

/// Recompute every link's digest and check prev-hash linkage. The sequence
/// input to the digest is the link's position in the history.
pub fn verify_chain(history: &[StateTransition]) -> bool {
    let mut previous = GENESIS_HASH;
    for (sequence, transition) in history.iter().enumerate() {
        if transition.prev_hash != previous {
            return false;
        }
        let payload = transition_payload(
            &transition.dispute_id,
            transition.from_state,
            transition.to_state,
            &transition.reason,
            &transition.created_by,
            &transition.created_at,
        );
        let expected = chain_digest(
            sequence as u64,
            &transition.created_at,
            &payload,
            &transition.prev_hash,
        );
        if transition.transition_hash != expected {
            return false;
        }
        previous = &transition.transition_hash;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successor_table_is_exact() {
        use DisputeStatus::*;
        assert_eq!(allowed_successors(Pending), &[Authorized, Reversed]);
        assert_eq!(allowed_successors(Authorized), &[Settled, Reversed]);
        assert_eq!(allowed_successors(Settled), &[Disputed, Reversed]);
        assert_eq!(allowed_successors(Disputed), &[Reversed]);
        assert!(allowed_successors(Reversed).is_empty());
    }

    #[test]
    fn reversed_is_reachable_from_every_non_terminal_state() {
        use DisputeStatus::*;
        for from in [Pending, Authorized, Settled, Disputed] {
            assert!(is_transition_allowed(from, Reversed), "{from} -> REVERSED");
        }
        assert!(!is_transition_allowed(Reversed, Pending));
        assert!(!is_transition_allowed(Reversed, Reversed));
    }

    #[test]
    fn skipping_states_is_disallowed() {
        use DisputeStatus::*;
        assert!(!is_transition_allowed(Pending, Settled));
        assert!(!is_transition_allowed(Pending, Disputed));
        assert!(!is_transition_allowed(Authorized, Disputed));
        assert!(!is_transition_allowed(Settled, Authorized));
    }

    #[test]
    fn chain_verifies_and_detects_tampering() {
        let dispute_id = DisputeId::new("dsp_test");
        let mut history = Vec::new();
        let mut prev = GENESIS_HASH.to_string();
        let states = [
            (DisputeStatus::Pending, DisputeStatus::Pending),
            (DisputeStatus::Pending, DisputeStatus::Authorized),
            (DisputeStatus::Authorized, DisputeStatus::Settled),
        ];
        for (i, (from, to)) in states.into_iter().enumerate() {
            let t = build_transition(
                &dispute_id,
                i as u64,
                from,
                to,
                "step",
                "tester",
                &prev,
                Metadata::new(),
                Utc::now(),
            );
            prev = t.transition_hash.clone();
            history.push(t);
        }
        assert!(verify_chain(&history));

        let original = history[1].reason.clone();
        history[1].reason = "forged".to_string();
        assert!(!verify_chain(&history));
        history[1].reason = original;
        assert!(verify_chain(&history));
    }

    #[test]
    fn empty_history_verifies() {
        assert!(verify_chain(&[]));
    }
}
