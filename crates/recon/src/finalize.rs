use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::FinalizeError;
use crate::model::{Dataset, Match, MatchOrigin, MergedEntity, MergedSet, Record};
use crate::session::ReconciliationSession;

/// How merged rows are laid out for export.
#[derive(Debug, Clone, Default)]
pub struct ColumnLayout {
    /// Source column holding the display name; leads the default layout.
    pub name_column: Option<String>,
    /// Reference column holding the name; dropped from the default layout.
    pub reference_name_column: Option<String>,
    /// Explicit layout. Wins over the default when non-empty.
    pub columns: Vec<String>,
}

pub struct Finalizer<'a> {
    sources: &'a Dataset,
    references: &'a Dataset,
    auxiliary: Option<&'a Dataset>,
    layout: ColumnLayout,
}

impl<'a> Finalizer<'a> {
    pub fn new(sources: &'a Dataset, references: &'a Dataset) -> Self {
        Self {
            sources,
            references,
            auxiliary: None,
            layout: ColumnLayout::default(),
        }
    }

    pub fn with_auxiliary(mut self, auxiliary: Option<&'a Dataset>) -> Self {
        self.auxiliary = auxiliary;
        self
    }

    pub fn with_layout(mut self, layout: ColumnLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Name column, then reference, auxiliary and source columns in their
    /// original order, each header once.
    pub fn columns(&self) -> Vec<String> {
        if !self.layout.columns.is_empty() {
            return self.layout.columns.clone();
        }

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut push = |h: &String| {
            if seen.insert(h.clone()) {
                out.push(h.clone());
            }
        };

        if let Some(ref name) = self.layout.name_column {
            push(name);
        }
        let reference_name = self.layout.reference_name_column.as_deref();
        for h in &self.references.headers {
            if Some(h.as_str()) != reference_name {
                push(h);
            }
        }
        if let Some(aux) = self.auxiliary {
            for h in &aux.headers {
                push(h);
            }
        }
        for h in &self.sources.headers {
            push(h);
        }
        out
    }

    /// Merge every source with its reference. Fails when a source has no
    /// match, or when the matches break one-reference-per-source.
    pub fn finalize(&self, automatic: &[Match], confirmed: &[Match]) -> Result<MergedSet, FinalizeError> {
        let source_index: HashMap<&str, &Record> =
            self.sources.records.iter().map(|r| (r.name.as_str(), r)).collect();
        let reference_index: HashMap<&str, &Record> = self
            .references
            .records
            .iter()
            .filter_map(|r| Some((r.id.as_deref()?, r)))
            .collect();
        let auxiliary_index: HashMap<&str, &Record> = self
            .auxiliary
            .map(|aux| {
                aux.records
                    .iter()
                    .filter_map(|r| Some((r.id.as_deref()?, r)))
                    .collect()
            })
            .unwrap_or_default();

        let tagged = automatic
            .iter()
            .map(|m| (m, MatchOrigin::Automatic))
            .chain(confirmed.iter().map(|m| (m, MatchOrigin::Confirmed)));

        let mut by_source: BTreeMap<&str, (&Match, MatchOrigin)> = BTreeMap::new();
        let mut claimed: HashMap<&str, &str> = HashMap::new();

        for (m, origin) in tagged {
            if !source_index.contains_key(m.source_name.as_str()) {
                return Err(FinalizeError::UnknownRecord {
                    kind: "source",
                    key: m.source_name.clone(),
                });
            }
            if !reference_index.contains_key(m.reference_id.as_str()) {
                return Err(FinalizeError::UnknownRecord {
                    kind: "reference",
                    key: m.reference_id.clone(),
                });
            }
            if by_source.insert(&m.source_name, (m, origin)).is_some() {
                tracing::error!(source = %m.source_name, "source matched twice");
                return Err(FinalizeError::DuplicateSource {
                    source_name: m.source_name.clone(),
                });
            }
            if let Some(first) = claimed.insert(&m.reference_id, &m.source_name) {
                tracing::error!(
                    reference = %m.reference_id,
                    first,
                    second = %m.source_name,
                    "reference claimed twice"
                );
                return Err(FinalizeError::DuplicateReference {
                    reference_id: m.reference_id.clone(),
                    first: first.to_string(),
                    second: m.source_name.clone(),
                });
            }
        }

        let mut pending: Vec<String> = self
            .sources
            .records
            .iter()
            .filter(|r| !by_source.contains_key(r.name.as_str()))
            .map(|r| r.name.clone())
            .collect();
        if !pending.is_empty() {
            pending.sort();
            return Err(FinalizeError::IncompleteSession { pending });
        }

        let entities: Vec<MergedEntity> = by_source
            .values()
            .map(|(m, origin)| {
                let source = source_index[m.source_name.as_str()];
                let reference = reference_index[m.reference_id.as_str()];
                let auxiliary = auxiliary_index
                    .get(m.reference_id.as_str())
                    .map(|r| r.attributes.clone())
                    .unwrap_or_default();
                MergedEntity {
                    name: m.source_name.clone(),
                    reference_id: m.reference_id.clone(),
                    origin: *origin,
                    source: source.attributes.clone(),
                    reference: reference.attributes.clone(),
                    auxiliary,
                }
            })
            .collect();

        tracing::info!(
            merged = entities.len(),
            automatic = automatic.len(),
            confirmed = confirmed.len(),
            "reconciliation finalized"
        );

        Ok(MergedSet {
            columns: self.columns(),
            entities,
        })
    }

    /// Finalize from a session. Refuses while the session has pending names.
    pub fn finalize_session(
        &self,
        automatic: &[Match],
        session: &ReconciliationSession,
    ) -> Result<MergedSet, FinalizeError> {
        if !session.is_complete() {
            return Err(FinalizeError::IncompleteSession {
                pending: session.unmatched().into_iter().map(String::from).collect(),
            });
        }
        self.finalize(automatic, &session.confirmed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    fn record(id: Option<&str>, name: &str, attrs: &[(&str, &str)], ordinal: usize) -> Record {
        Record {
            id: id.map(Into::into),
            name: name.into(),
            attributes: attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            ordinal,
        }
    }

    fn sources() -> Dataset {
        Dataset {
            role: Role::Source,
            headers: vec!["Name".into(), "Total".into()],
            records: vec![
                record(None, "Bob Lee", &[("Name", "Bob Lee"), ("Total", "€10.00")], 0),
                record(None, "Alice Smith", &[("Name", "Alice Smith"), ("Total", "€20.00")], 1),
            ],
        }
    }

    fn references() -> Dataset {
        Dataset {
            role: Role::Reference,
            headers: vec!["CHICK".into(), "Child".into(), "Claim Until".into()],
            records: vec![
                record(Some("1"), "Alice Smith", &[("CHICK", "1"), ("Child", "Alice Smith"), ("Claim Until", "01/09/2025")], 0),
                record(Some("2"), "Bob Lee", &[("CHICK", "2"), ("Child", "Bob Lee"), ("Claim Until", "02/09/2025")], 1),
                record(Some("3"), "Alice Smith", &[("CHICK", "3"), ("Child", "Alice Smith"), ("Claim Until", "03/09/2025")], 2),
            ],
        }
    }

    fn layout() -> ColumnLayout {
        ColumnLayout {
            name_column: Some("Name".into()),
            reference_name_column: Some("Child".into()),
            columns: Vec::new(),
        }
    }

    #[test]
    fn merges_sorted_by_name() {
        let (s, r) = (sources(), references());
        let fin = Finalizer::new(&s, &r).with_layout(layout());
        let out = fin
            .finalize(&[Match::new("Bob Lee", "2")], &[Match::new("Alice Smith", "3")])
            .unwrap();
        assert_eq!(out.columns, vec!["Name", "CHICK", "Claim Until", "Total"]);
        assert_eq!(out.entities.len(), 2);
        assert_eq!(out.entities[0].name, "Alice Smith");
        assert_eq!(out.entities[0].origin, MatchOrigin::Confirmed);
        assert_eq!(out.entities[1].origin, MatchOrigin::Automatic);
        assert_eq!(
            out.rows(),
            vec![
                vec!["Alice Smith", "3", "03/09/2025", "€20.00"],
                vec!["Bob Lee", "2", "02/09/2025", "€10.00"],
            ]
        );
    }

    #[test]
    fn missing_source_is_incomplete() {
        let (s, r) = (sources(), references());
        let err = Finalizer::new(&s, &r)
            .finalize(&[Match::new("Bob Lee", "2")], &[])
            .unwrap_err();
        assert_eq!(
            err,
            FinalizeError::IncompleteSession {
                pending: vec!["Alice Smith".into()]
            }
        );
    }

    #[test]
    fn shared_reference_is_rejected() {
        let (s, r) = (sources(), references());
        let err = Finalizer::new(&s, &r)
            .finalize(&[Match::new("Bob Lee", "2")], &[Match::new("Alice Smith", "2")])
            .unwrap_err();
        assert_eq!(
            err,
            FinalizeError::DuplicateReference {
                reference_id: "2".into(),
                first: "Bob Lee".into(),
                second: "Alice Smith".into(),
            }
        );
    }

    #[test]
    fn source_matched_twice_is_rejected() {
        let (s, r) = (sources(), references());
        let err = Finalizer::new(&s, &r)
            .finalize(
                &[Match::new("Bob Lee", "2")],
                &[Match::new("Bob Lee", "1"), Match::new("Alice Smith", "3")],
            )
            .unwrap_err();
        assert!(matches!(err, FinalizeError::DuplicateSource { .. }));
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let (s, r) = (sources(), references());
        let err = Finalizer::new(&s, &r)
            .finalize(&[Match::new("Bob Lee", "99")], &[])
            .unwrap_err();
        assert_eq!(
            err,
            FinalizeError::UnknownRecord {
                kind: "reference",
                key: "99".into()
            }
        );
    }

    #[test]
    fn auxiliary_attributes_join_by_reference_id() {
        let (s, r) = (sources(), references());
        let aux = Dataset {
            role: Role::Auxiliary,
            headers: vec!["CHICK".into(), "Phone".into()],
            records: vec![record(Some("2"), "2", &[("CHICK", "2"), ("Phone", "555")], 0)],
        };
        let out = Finalizer::new(&s, &r)
            .with_auxiliary(Some(&aux))
            .with_layout(layout())
            .finalize(&[Match::new("Bob Lee", "2"), Match::new("Alice Smith", "1")], &[])
            .unwrap();
        assert_eq!(out.columns, vec!["Name", "CHICK", "Claim Until", "Phone", "Total"]);
        let bob = &out.entities[1];
        assert_eq!(bob.value("Phone"), Some("555"));
        assert_eq!(out.entities[0].value("Phone"), None);
    }

    #[test]
    fn explicit_columns_win() {
        let (s, r) = (sources(), references());
        let mut l = layout();
        l.columns = vec!["CHICK".into(), "Name".into()];
        let out = Finalizer::new(&s, &r)
            .with_layout(l)
            .finalize(&[Match::new("Bob Lee", "2"), Match::new("Alice Smith", "1")], &[])
            .unwrap();
        assert_eq!(out.rows()[0], vec!["1", "Alice Smith"]);
    }

    #[test]
    fn deterministic_output() {
        let (s, r) = (sources(), references());
        let fin = Finalizer::new(&s, &r).with_layout(layout());
        let auto = [Match::new("Bob Lee", "2")];
        let conf = [Match::new("Alice Smith", "1")];
        assert_eq!(fin.finalize(&auto, &conf).unwrap(), fin.finalize(&auto, &conf).unwrap());
    }
}
