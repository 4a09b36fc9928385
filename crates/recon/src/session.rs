//! Interactive reconciliation session.
//!
//! Holds the sources still waiting for a match, the references still on
//! offer, and the matches the user has confirmed so far. A reference taken
//! by one confirmation disappears from the choices of every other pending
//! source; undoing the confirmation puts it back.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::error::{SelectionFault, SessionError};
use crate::matcher::NamePolicy;
use crate::model::{Match, MatchCandidate, PendingPayload, Record};

#[derive(Debug, Clone, PartialEq, Eq)]
struct SourceEntry {
    ordinal: usize,
    key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ReferenceEntry {
    ordinal: usize,
    key: String,
    name: String,
}

/// A candidate as offered for one pending source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfferedCandidate {
    #[serde(flatten)]
    pub candidate: MatchCandidate,
    /// Candidate's key equals the source's key under the session policy.
    pub suggested: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationSession {
    // Fixed at creation.
    sources: BTreeMap<String, SourceEntry>,
    references: BTreeMap<String, ReferenceEntry>,
    // Mutable state.
    unmatched: BTreeSet<String>,
    pool: BTreeSet<String>,
    confirmed: BTreeMap<String, String>,
}

impl ReconciliationSession {
    /// Build a session from the matcher's residual. Source names are expected
    /// to be unique; reference records without an id are not offered.
    pub fn new(unmatched: &[Record], candidate_pool: &[Record], policy: &dyn NamePolicy) -> Self {
        let sources: BTreeMap<String, SourceEntry> = unmatched
            .iter()
            .map(|r| {
                (
                    r.name.clone(),
                    SourceEntry {
                        ordinal: r.ordinal,
                        key: policy.key(&r.name),
                    },
                )
            })
            .collect();
        let references: BTreeMap<String, ReferenceEntry> = candidate_pool
            .iter()
            .filter_map(|r| {
                let id = r.id.clone()?;
                Some((
                    id,
                    ReferenceEntry {
                        ordinal: r.ordinal,
                        key: policy.key(&r.name),
                        name: r.name.clone(),
                    },
                ))
            })
            .collect();

        tracing::debug!(
            pending = sources.len(),
            candidates = references.len(),
            "reconciliation session opened"
        );

        Self {
            unmatched: sources.keys().cloned().collect(),
            pool: references.keys().cloned().collect(),
            confirmed: BTreeMap::new(),
            sources,
            references,
        }
    }

    pub fn confirm(&mut self, source_name: &str, reference_id: &str) -> Result<Match, SessionError> {
        let invalid = |reason| SessionError::InvalidSelection {
            source_name: source_name.into(),
            reference_id: reference_id.into(),
            reason,
        };
        if !self.unmatched.contains(source_name) {
            return Err(invalid(SelectionFault::SourceNotPending));
        }
        if !self.pool.contains(reference_id) {
            return Err(invalid(SelectionFault::ReferenceUnavailable));
        }

        self.unmatched.remove(source_name);
        self.pool.remove(reference_id);
        self.confirmed.insert(source_name.to_string(), reference_id.to_string());
        tracing::debug!(source = source_name, reference = reference_id, "match confirmed");
        Ok(Match::new(source_name, reference_id))
    }

    pub fn unconfirm(&mut self, source_name: &str) -> Result<Match, SessionError> {
        let reference_id = self
            .confirmed
            .remove(source_name)
            .ok_or_else(|| SessionError::NotConfirmed {
                source_name: source_name.into(),
            })?;
        self.unmatched.insert(source_name.to_string());
        self.pool.insert(reference_id.clone());
        tracing::debug!(source = source_name, reference = %reference_id, "match withdrawn");
        Ok(Match::new(source_name, reference_id))
    }

    /// Confirm a batch of selections, all or nothing. On error the session is
    /// unchanged and the error names the first offending pair.
    pub fn apply_selections<I>(&mut self, selections: I) -> Result<usize, SessionError>
    where
        I: IntoIterator<Item = Match>,
    {
        let mut staged = self.clone();
        let mut applied = 0;
        for m in selections {
            staged.confirm(&m.source_name, &m.reference_id)?;
            applied += 1;
        }
        *self = staged;
        Ok(applied)
    }

    /// Pending names containing `query` (case-insensitive), presentation order.
    pub fn filter(&self, query: &str) -> Vec<&str> {
        let needle = query.to_lowercase();
        self.unmatched()
            .into_iter()
            .filter(|name| name.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.unmatched.is_empty()
    }

    /// Pending names sorted by name, ties by ingestion order.
    pub fn unmatched(&self) -> Vec<&str> {
        let mut names: Vec<(&str, usize)> = self
            .unmatched
            .iter()
            .map(|n| (n.as_str(), self.sources.get(n).map_or(usize::MAX, |s| s.ordinal)))
            .collect();
        names.sort();
        names.into_iter().map(|(n, _)| n).collect()
    }

    /// References still on offer, sorted by name, ties by ingestion order.
    pub fn candidate_pool(&self) -> Vec<MatchCandidate> {
        let mut entries: Vec<(&str, usize, &str)> = self
            .pool
            .iter()
            .filter_map(|id| {
                let r = self.references.get(id)?;
                Some((r.name.as_str(), r.ordinal, id.as_str()))
            })
            .collect();
        entries.sort();
        entries
            .into_iter()
            .map(|(name, _, id)| MatchCandidate {
                id: id.into(),
                name: name.into(),
            })
            .collect()
    }

    pub fn is_available(&self, reference_id: &str) -> bool {
        self.pool.contains(reference_id)
    }

    /// Confirmed matches, by source name.
    pub fn confirmed(&self) -> Vec<Match> {
        self.confirmed
            .iter()
            .map(|(s, r)| Match::new(s.clone(), r.clone()))
            .collect()
    }

    pub fn confirmed_for(&self, source_name: &str) -> Option<&str> {
        self.confirmed.get(source_name).map(String::as_str)
    }

    /// Choices for one pending source: candidates sharing its key first,
    /// then the rest, each group in presentation order. `None` when the
    /// source is not pending.
    pub fn candidates_for(&self, source_name: &str) -> Option<Vec<OfferedCandidate>> {
        if !self.unmatched.contains(source_name) {
            return None;
        }
        let source_key = &self.sources.get(source_name)?.key;
        let (mut suggested, rest): (Vec<_>, Vec<_>) = self
            .candidate_pool()
            .into_iter()
            .map(|candidate| {
                let suggested = self
                    .references
                    .get(&candidate.id)
                    .is_some_and(|r| &r.key == source_key);
                OfferedCandidate { candidate, suggested }
            })
            .partition(|c| c.suggested);
        suggested.extend(rest);
        Some(suggested)
    }

    /// Transport payload for the presentation layer.
    pub fn pending_payload(&self, automatic: usize) -> PendingPayload {
        PendingPayload {
            status: "needs_resolution".into(),
            automatic,
            unmatched: self.unmatched().into_iter().map(String::from).collect(),
            candidates: self.candidate_pool(),
        }
    }

    /// Mutual-exclusion invariants: no name is both pending and confirmed,
    /// no id is both pooled and confirmed, no id is confirmed twice.
    pub fn is_consistent(&self) -> bool {
        let confirmed_ids: BTreeSet<&String> = self.confirmed.values().collect();
        confirmed_ids.len() == self.confirmed.len()
            && self.confirmed.keys().all(|s| !self.unmatched.contains(s))
            && confirmed_ids.iter().all(|id| !self.pool.contains(*id))
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Session behind a single reader/writer lock. Mutations are serialized;
/// readers see either the state before or after each mutation.
#[derive(Debug, Clone)]
pub struct SharedSession {
    inner: Arc<RwLock<ReconciliationSession>>,
}

impl SharedSession {
    pub fn new(session: ReconciliationSession) -> Self {
        Self {
            inner: Arc::new(RwLock::new(session)),
        }
    }

    // Session operations never leave partial state behind, so a poisoned
    // lock still guards a consistent session.
    fn read(&self) -> RwLockReadGuard<'_, ReconciliationSession> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ReconciliationSession> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn confirm(&self, source_name: &str, reference_id: &str) -> Result<Match, SessionError> {
        self.write().confirm(source_name, reference_id)
    }

    pub fn unconfirm(&self, source_name: &str) -> Result<Match, SessionError> {
        self.write().unconfirm(source_name)
    }

    pub fn apply_selections<I>(&self, selections: I) -> Result<usize, SessionError>
    where
        I: IntoIterator<Item = Match>,
    {
        self.write().apply_selections(selections)
    }

    pub fn filter(&self, query: &str) -> Vec<String> {
        self.read().filter(query).into_iter().map(String::from).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.read().is_complete()
    }

    /// Consistent copy of the current state.
    pub fn snapshot(&self) -> ReconciliationSession {
        self.read().clone()
    }

    pub fn into_inner(self) -> ReconciliationSession {
        match Arc::try_unwrap(self.inner) {
            Ok(lock) => lock.into_inner().unwrap_or_else(PoisonError::into_inner),
            Err(shared) => shared.read().unwrap_or_else(PoisonError::into_inner).clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::ExactName;
    use std::collections::BTreeMap;

    fn record(id: Option<&str>, name: &str, ordinal: usize) -> Record {
        Record {
            id: id.map(Into::into),
            name: name.into(),
            attributes: BTreeMap::new(),
            ordinal,
        }
    }

    /// Alice is ambiguous between ids 1 and 3; Bob was matched to 2 automatically.
    fn alice_session() -> ReconciliationSession {
        ReconciliationSession::new(
            &[record(None, "Alice Smith", 0)],
            &[record(Some("1"), "Alice Smith", 0), record(Some("3"), "Alice Smith", 2)],
            &ExactName,
        )
    }

    fn three_pending() -> ReconciliationSession {
        ReconciliationSession::new(
            &[
                record(None, "cara", 0),
                record(None, "Alice", 1),
                record(None, "Bob", 2),
            ],
            &[
                record(Some("r1"), "Alice", 0),
                record(Some("r2"), "Alicia", 1),
                record(Some("r3"), "Bobby", 2),
            ],
            &ExactName,
        )
    }

    #[test]
    fn new_session_state() {
        let s = alice_session();
        assert_eq!(s.unmatched(), vec!["Alice Smith"]);
        let pool: Vec<_> = s.candidate_pool().into_iter().map(|c| c.id).collect();
        assert_eq!(pool, vec!["1", "3"]);
        assert!(!s.is_complete());
        assert!(s.confirmed().is_empty());
    }

    #[test]
    fn confirm_moves_source_and_reference() {
        let mut s = alice_session();
        let m = s.confirm("Alice Smith", "1").unwrap();
        assert_eq!(m, Match::new("Alice Smith", "1"));
        assert!(s.is_complete());
        assert!(!s.is_available("1"));
        assert!(s.is_available("3"));
        assert_eq!(s.confirmed_for("Alice Smith"), Some("1"));
        assert!(s.is_consistent());
    }

    #[test]
    fn taken_reference_is_unavailable_to_others() {
        let mut s = three_pending();
        s.confirm("Alice", "r1").unwrap();
        let err = s.confirm("Bob", "r1").unwrap_err();
        assert_eq!(
            err,
            SessionError::InvalidSelection {
                source_name: "Bob".into(),
                reference_id: "r1".into(),
                reason: SelectionFault::ReferenceUnavailable,
            }
        );
        let offered: Vec<_> = s
            .candidates_for("Bob")
            .unwrap()
            .into_iter()
            .map(|c| c.candidate.id)
            .collect();
        assert!(!offered.contains(&"r1".to_string()));
    }

    #[test]
    fn confirm_rejects_unknown_or_settled_source() {
        let mut s = three_pending();
        let before = s.clone();
        let err = s.confirm("Zed", "r1").unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidSelection { reason: SelectionFault::SourceNotPending, .. }
        ));
        assert_eq!(s, before, "failed confirm leaves state unchanged");

        s.confirm("Alice", "r1").unwrap();
        let err = s.confirm("Alice", "r2").unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidSelection { reason: SelectionFault::SourceNotPending, .. }
        ));
    }

    #[test]
    fn unconfirm_restores_reference() {
        let mut s = three_pending();
        s.confirm("Bob", "r3").unwrap();
        let m = s.unconfirm("Bob").unwrap();
        assert_eq!(m, Match::new("Bob", "r3"));
        assert!(s.is_available("r3"));
        assert!(s.unmatched().contains(&"Bob"));
        assert_eq!(
            s.unconfirm("Bob").unwrap_err(),
            SessionError::NotConfirmed { source_name: "Bob".into() }
        );
    }

    #[test]
    fn unconfirm_then_confirm_is_identity() {
        let mut s = three_pending();
        s.confirm("Bob", "r3").unwrap();
        let before = s.clone();
        s.unconfirm("Bob").unwrap();
        s.confirm("Bob", "r3").unwrap();
        assert_eq!(s, before);
    }

    #[test]
    fn presentation_order_is_by_name() {
        let s = three_pending();
        assert_eq!(s.unmatched(), vec!["Alice", "Bob", "cara"]);
    }

    #[test]
    fn filter_is_case_insensitive_and_read_only() {
        let s = three_pending();
        let before = s.clone();
        assert_eq!(s.filter("AL"), vec!["Alice"]);
        assert_eq!(s.filter("b"), vec!["Bob"]);
        assert_eq!(s.filter(""), vec!["Alice", "Bob", "cara"]);
        assert!(s.filter("zzz").is_empty());
        assert_eq!(s, before);
    }

    #[test]
    fn filter_excludes_confirmed() {
        let mut s = three_pending();
        s.confirm("Alice", "r2").unwrap();
        assert!(s.filter("alice").is_empty());
    }

    #[test]
    fn candidates_for_puts_suggestions_first() {
        let s = three_pending();
        let offered = s.candidates_for("Bob").unwrap();
        assert_eq!(offered.len(), 3);
        assert!(offered.iter().all(|c| !c.suggested));

        let offered = s.candidates_for("Alice").unwrap();
        assert_eq!(offered[0].candidate.id, "r1");
        assert!(offered[0].suggested);
        assert!(s.candidates_for("Nobody").is_none());
    }

    #[test]
    fn apply_selections_is_atomic() {
        let mut s = three_pending();
        let before = s.clone();
        let err = s
            .apply_selections(vec![Match::new("Alice", "r1"), Match::new("Bob", "r1")])
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidSelection { ref source_name, .. } if source_name == "Bob"));
        assert_eq!(s, before);

        let n = s
            .apply_selections(vec![
                Match::new("Alice", "r1"),
                Match::new("Bob", "r3"),
                Match::new("cara", "r2"),
            ])
            .unwrap();
        assert_eq!(n, 3);
        assert!(s.is_complete());
        assert!(s.candidate_pool().is_empty());
    }

    #[test]
    fn pending_payload_shape() {
        let s = alice_session();
        let payload = s.pending_payload(1);
        assert_eq!(payload.status, "needs_resolution");
        assert_eq!(payload.automatic, 1);
        assert_eq!(payload.unmatched, vec!["Alice Smith"]);
        assert_eq!(payload.candidates.len(), 2);
    }

    #[test]
    fn shared_session_serializes_writers() {
        let shared = SharedSession::new(three_pending());
        let wins = std::thread::scope(|scope| {
            let handles: Vec<_> = ["Alice", "Bob", "cara"]
                .into_iter()
                .map(|name| {
                    let shared = shared.clone();
                    scope.spawn(move || shared.confirm(name, "r2").is_ok())
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });
        assert_eq!(wins, 1);
        let snap = shared.snapshot();
        assert_eq!(snap.confirmed().len(), 1, "exactly one writer gets r2");
        assert!(snap.is_consistent());
    }

    #[test]
    fn shared_session_readers_see_consistent_state() {
        let shared = SharedSession::new(three_pending());
        std::thread::scope(|scope| {
            let writer = shared.clone();
            scope.spawn(move || {
                for _ in 0..50 {
                    writer.confirm("Bob", "r3").unwrap();
                    writer.unconfirm("Bob").unwrap();
                }
            });
            for _ in 0..4 {
                let reader = shared.clone();
                scope.spawn(move || {
                    for _ in 0..50 {
                        assert!(reader.snapshot().is_consistent());
                        let _ = reader.filter("b");
                    }
                });
            }
        });
        assert!(!shared.is_complete());
        assert_eq!(shared.into_inner().unmatched().len(), 3);
    }
}
