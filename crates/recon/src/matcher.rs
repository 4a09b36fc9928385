use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::PolicyKind;
use crate::model::{Match, MatchOutput, Record};

/// Matching-key policy. Two names match when their keys are equal.
pub trait NamePolicy: Send + Sync {
    fn key(&self, name: &str) -> String;

    fn label(&self) -> &'static str;
}

/// Trim and collapse internal whitespace runs to one space.
pub fn collapse_whitespace(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Case-sensitive equality after whitespace normalization.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactName;

impl NamePolicy for ExactName {
    fn key(&self, name: &str) -> String {
        collapse_whitespace(name)
    }

    fn label(&self) -> &'static str {
        "exact"
    }
}

/// Like [`ExactName`], ignoring case.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaseInsensitiveName;

impl NamePolicy for CaseInsensitiveName {
    fn key(&self, name: &str) -> String {
        collapse_whitespace(name).to_lowercase()
    }

    fn label(&self) -> &'static str {
        "case_insensitive"
    }
}

pub fn policy_for(kind: PolicyKind) -> Box<dyn NamePolicy> {
    match kind {
        PolicyKind::Exact => Box::new(ExactName),
        PolicyKind::CaseInsensitive => Box::new(CaseInsensitiveName),
    }
}

/// Match source records to reference records by policy key.
///
/// A source is matched automatically only when exactly one reference shares
/// its key and no other source does; everything else is left for manual
/// resolution. References consumed here are removed from the candidate pool.
pub fn match_by_name(
    sources: &[Record],
    references: &[Record],
    policy: &dyn NamePolicy,
) -> MatchOutput {
    let mut ref_index: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, r) in references.iter().enumerate() {
        if r.id.is_some() {
            ref_index.entry(policy.key(&r.name)).or_default().push(i);
        }
    }

    let source_keys: Vec<String> = sources.iter().map(|s| policy.key(&s.name)).collect();
    let mut source_key_counts: HashMap<&str, usize> = HashMap::new();
    for key in &source_keys {
        *source_key_counts.entry(key.as_str()).or_insert(0) += 1;
    }

    let mut automatic = Vec::new();
    let mut unmatched = Vec::new();
    let mut consumed: HashSet<usize> = HashSet::new();

    for (source, key) in sources.iter().zip(&source_keys) {
        let refs = ref_index.get(key).map(Vec::as_slice).unwrap_or(&[]);
        let shared_key = source_key_counts.get(key.as_str()).copied().unwrap_or(0) > 1;

        match (refs, shared_key) {
            ([only], false) => {
                let reference = &references[*only];
                let Some(ref id) = reference.id else { continue };
                tracing::debug!(source = %source.name, reference = %id, policy = policy.label(), "automatic match");
                automatic.push(Match::new(source.name.clone(), id.clone()));
                consumed.insert(*only);
            }
            _ => {
                tracing::debug!(
                    source = %source.name,
                    candidates = refs.len(),
                    shared_key,
                    "left for manual resolution"
                );
                unmatched.push(source.clone());
            }
        }
    }

    let candidate_pool = references
        .iter()
        .enumerate()
        .filter(|(i, r)| r.id.is_some() && !consumed.contains(i))
        .map(|(_, r)| r.clone())
        .collect();

    MatchOutput {
        automatic,
        unmatched,
        candidate_pool,
    }
}
