use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Header row plus string cells, as handed over by the ingestion collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Which side of the reconciliation a dataset plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Source,
    Reference,
    Auxiliary,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Reference => write!(f, "reference"),
            Self::Auxiliary => write!(f, "auxiliary"),
        }
    }
}

/// A normalized row. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Stable id; `None` for source records.
    pub id: Option<String>,
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    /// Ingestion position, used to break presentation ties.
    pub ordinal: usize,
}

impl Record {
    pub fn candidate(&self) -> Option<MatchCandidate> {
        self.id.as_ref().map(|id| MatchCandidate {
            id: id.clone(),
            name: self.name.clone(),
        })
    }

    pub fn attribute(&self, column: &str) -> Option<&str> {
        self.attributes.get(column).map(String::as_str)
    }
}

/// Canonical record set for one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub role: Role,
    /// Attribute columns in their original order.
    pub headers: Vec<String>,
    pub records: Vec<Record>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn by_name(&self, name: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.name == name)
    }

    pub fn by_id(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.id.as_deref() == Some(id))
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// A reference entry offered to the user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub id: String,
    pub name: String,
}

/// Association of a source name with a reference id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Match {
    pub source_name: String,
    pub reference_id: String,
}

impl Match {
    pub fn new(source_name: impl Into<String>, reference_id: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            reference_id: reference_id.into(),
        }
    }
}

/// Wire shape of one user selection: `{"name": ..., "id": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub name: String,
    pub id: String,
}

impl From<Selection> for Match {
    fn from(s: Selection) -> Self {
        Match::new(s.name, s.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutput {
    pub automatic: Vec<Match>,
    /// Source records with zero or several equal-key references.
    pub unmatched: Vec<Record>,
    /// References not consumed by `automatic`, ingestion order.
    pub candidate_pool: Vec<Record>,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOrigin {
    Automatic,
    Confirmed,
}

impl std::fmt::Display for MatchOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Automatic => write!(f, "automatic"),
            Self::Confirmed => write!(f, "confirmed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedEntity {
    pub name: String,
    pub reference_id: String,
    pub origin: MatchOrigin,
    pub source: BTreeMap<String, String>,
    pub reference: BTreeMap<String, String>,
    pub auxiliary: BTreeMap<String, String>,
}

impl MergedEntity {
    /// Look up an output column. Source attributes win over reference ones,
    /// which win over auxiliary ones.
    pub fn value(&self, column: &str) -> Option<&str> {
        self.source
            .get(column)
            .or_else(|| self.reference.get(column))
            .or_else(|| self.auxiliary.get(column))
            .map(String::as_str)
    }
}

/// Finalized entities plus the column layout they export with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedSet {
    pub columns: Vec<String>,
    pub entities: Vec<MergedEntity>,
}

impl MergedSet {
    /// Row-major cells in `columns` order; missing values are empty.
    pub fn rows(&self) -> Vec<Vec<String>> {
        self.entities
            .iter()
            .map(|e| {
                self.columns
                    .iter()
                    .map(|c| e.value(c).unwrap_or_default().to_string())
                    .collect()
            })
            .collect()
    }
}

/// Payload returned to a presentation layer when manual resolution is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPayload {
    pub status: String,
    pub automatic: usize,
    pub unmatched: Vec<String>,
    pub candidates: Vec<MatchCandidate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_wire_shape() {
        let selections: Vec<Selection> =
            serde_json::from_str(r#"[{"name": "Alice Smith", "id": "3"}]"#).unwrap();
        let matches: Vec<Match> = selections.into_iter().map(Match::from).collect();
        assert_eq!(matches, vec![Match::new("Alice Smith", "3")]);
    }

    #[test]
    fn pending_payload_wire_shape() {
        let payload = PendingPayload {
            status: "needs_resolution".into(),
            automatic: 1,
            unmatched: vec!["Alice Smith".into()],
            candidates: vec![MatchCandidate { id: "1".into(), name: "Alice Smith".into() }],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": "needs_resolution",
                "automatic": 1,
                "unmatched": ["Alice Smith"],
                "candidates": [{"id": "1", "name": "Alice Smith"}]
            })
        );
    }

    #[test]
    fn merged_value_prefers_source() {
        let entity = MergedEntity {
            name: "Alice".into(),
            reference_id: "1".into(),
            origin: MatchOrigin::Automatic,
            source: BTreeMap::from([("Note".to_string(), "from source".to_string())]),
            reference: BTreeMap::from([
                ("Note".to_string(), "from reference".to_string()),
                ("CHICK".to_string(), "1".to_string()),
            ]),
            auxiliary: BTreeMap::from([("Phone".to_string(), "555".to_string())]),
        };
        assert_eq!(entity.value("Note"), Some("from source"));
        assert_eq!(entity.value("CHICK"), Some("1"));
        assert_eq!(entity.value("Phone"), Some("555"));
        assert_eq!(entity.value("Missing"), None);

        let set = MergedSet {
            columns: vec!["CHICK".into(), "Missing".into()],
            entities: vec![entity],
        };
        assert_eq!(set.rows(), vec![vec!["1".to_string(), String::new()]]);
    }
}
