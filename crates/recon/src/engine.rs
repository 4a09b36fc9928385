use crate::config::{DatasetConfig, OutputConfig, RollbookConfig};
use crate::error::{ExportError, IngestionError, ReconError};
use crate::finalize::{ColumnLayout, Finalizer};
use crate::funding::{read_allocations, summarize};
use crate::matcher::{match_by_name, policy_for};
use crate::model::{Dataset, Match, MatchOutput, MergedSet, PendingPayload, RawTable, Role};
use crate::normalize::normalize;
use crate::session::ReconciliationSession;

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Turns a configured dataset location into a raw table.
pub trait Ingest {
    fn load(&self, role: Role, dataset: &DatasetConfig) -> Result<RawTable, IngestionError>;
}

/// Renders a merged set into file bytes.
pub trait Export {
    fn export(&self, merged: &MergedSet, output: &OutputConfig) -> Result<Vec<u8>, ExportError>;
}

/// Raw tables for one pass, one per configured dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inputs {
    pub source: RawTable,
    pub reference: RawTable,
    pub auxiliary: Option<RawTable>,
}

impl Inputs {
    pub fn load(config: &RollbookConfig, ingest: &dyn Ingest) -> Result<Self, IngestionError> {
        let source = ingest.load(Role::Source, &config.source)?;
        let reference = ingest.load(Role::Reference, &config.reference)?;
        let auxiliary = config
            .auxiliary
            .as_ref()
            .map(|aux| ingest.load(Role::Auxiliary, aux))
            .transpose()?;
        Ok(Self {
            source,
            reference,
            auxiliary,
        })
    }
}

// ---------------------------------------------------------------------------
// Pass
// ---------------------------------------------------------------------------

/// Normalized datasets plus the matcher's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    pub sources: Dataset,
    pub references: Dataset,
    pub auxiliary: Option<Dataset>,
    pub matches: MatchOutput,
}

impl Prepared {
    /// Fresh session over the unmatched residual.
    pub fn session(&self, config: &RollbookConfig) -> ReconciliationSession {
        let policy = policy_for(config.matching.policy);
        ReconciliationSession::new(&self.matches.unmatched, &self.matches.candidate_pool, policy.as_ref())
    }

    pub fn finalizer<'a>(&'a self, config: &RollbookConfig) -> Finalizer<'a> {
        Finalizer::new(&self.sources, &self.references)
            .with_auxiliary(self.auxiliary.as_ref())
            .with_layout(layout(config))
    }
}

/// Session state handed back when manual resolution is required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingResolution {
    pub payload: PendingPayload,
    pub session: ReconciliationSession,
    pub automatic: Vec<Match>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Complete(MergedSet),
    NeedsResolution(PendingResolution),
}

fn layout(config: &RollbookConfig) -> ColumnLayout {
    let name_column = match config.source.funding {
        Some(ref funding) => Some(funding.name_header.clone()),
        None => config.source.name_column.clone(),
    };
    ColumnLayout {
        name_column,
        reference_name_column: config.reference.name_column.clone(),
        columns: config.output.columns.clone(),
    }
}

fn source_dataset(config: &RollbookConfig, table: &RawTable) -> Result<Dataset, IngestionError> {
    match config.source.funding {
        Some(ref funding) => {
            let allocations = read_allocations(table, &config.source, funding)?;
            Ok(summarize(&allocations, funding))
        }
        None => normalize(Role::Source, table, &config.source),
    }
}

/// Normalize every dataset and run the matcher.
pub fn prepare(config: &RollbookConfig, inputs: &Inputs) -> Result<Prepared, ReconError> {
    let sources = source_dataset(config, &inputs.source)?;
    let references = normalize(Role::Reference, &inputs.reference, &config.reference)?;
    let auxiliary = match (&config.auxiliary, &inputs.auxiliary) {
        (Some(cfg), Some(table)) => Some(normalize(Role::Auxiliary, table, cfg)?),
        (Some(_), None) => {
            return Err(IngestionError::Empty {
                role: Role::Auxiliary.to_string(),
            }
            .into())
        }
        (None, _) => None,
    };

    tracing::info!(
        config = %config.name,
        sources = sources.len(),
        references = references.len(),
        auxiliary = auxiliary.as_ref().map_or(0, Dataset::len),
        "datasets loaded"
    );

    let policy = policy_for(config.matching.policy);
    let matches = match_by_name(&sources.records, &references.records, policy.as_ref());

    tracing::info!(
        automatic = matches.automatic.len(),
        unmatched = matches.unmatched.len(),
        candidates = matches.candidate_pool.len(),
        policy = policy.label(),
        "matching done"
    );

    Ok(Prepared {
        sources,
        references,
        auxiliary,
        matches,
    })
}

/// First phase: export straight away when every source matched, otherwise
/// hand back what the user must resolve.
pub fn upload(config: &RollbookConfig, inputs: &Inputs) -> Result<UploadOutcome, ReconError> {
    let prepared = prepare(config, inputs)?;

    if prepared.matches.unmatched.is_empty() {
        let merged = prepared.finalizer(config).finalize(&prepared.matches.automatic, &[])?;
        return Ok(UploadOutcome::Complete(merged));
    }

    let session = prepared.session(config);
    let automatic = prepared.matches.automatic.clone();
    let payload = session.pending_payload(automatic.len());
    tracing::info!(pending = payload.unmatched.len(), "manual resolution required");

    Ok(UploadOutcome::NeedsResolution(PendingResolution {
        payload,
        session,
        automatic,
    }))
}

/// Second phase: replay the user's selections onto a re-derived session and
/// merge. The same inputs always derive the same session.
pub fn finalize<I>(config: &RollbookConfig, inputs: &Inputs, selections: I) -> Result<MergedSet, ReconError>
where
    I: IntoIterator<Item = Match>,
{
    let prepared = prepare(config, inputs)?;
    let mut session = prepared.session(config);
    let applied = session.apply_selections(selections)?;
    tracing::info!(applied, pending = session.unmatched().len(), "selections applied");

    let merged = prepared
        .finalizer(config)
        .finalize_session(&prepared.matches.automatic, &session)?;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FinalizeError, SessionError};
    use crate::model::MatchOrigin;

    const CONFIG: &str = r#"
name = "term"

[source]
file = "source.csv"
name_column = "Name"

[reference]
file = "reference.csv"
name_column = "Child"
id_column = "CHICK"
"#;

    fn table(headers: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable::new(
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    fn inputs() -> Inputs {
        Inputs {
            source: table(&["Name", "Hours"], &[&["Alice Smith", "15"], &["Bob Lee", "30"]]),
            reference: table(
                &["CHICK", "Child"],
                &[&["1", "Alice Smith"], &["2", "Bob Lee"], &["3", "Alice Smith"]],
            ),
            auxiliary: None,
        }
    }

    fn config() -> RollbookConfig {
        RollbookConfig::from_toml(CONFIG).unwrap()
    }

    struct Fixed(Inputs);

    impl Ingest for Fixed {
        fn load(&self, role: Role, _dataset: &DatasetConfig) -> Result<RawTable, IngestionError> {
            match role {
                Role::Source => Ok(self.0.source.clone()),
                Role::Reference => Ok(self.0.reference.clone()),
                Role::Auxiliary => self.0.auxiliary.clone().ok_or(IngestionError::Empty {
                    role: role.to_string(),
                }),
            }
        }
    }

    #[test]
    fn inputs_load_through_collaborator() {
        let loaded = Inputs::load(&config(), &Fixed(inputs())).unwrap();
        assert_eq!(loaded, inputs());
    }

    #[test]
    fn upload_needs_resolution_for_ambiguous_name() {
        let outcome = upload(&config(), &inputs()).unwrap();
        let UploadOutcome::NeedsResolution(pending) = outcome else {
            panic!("expected pending resolution");
        };
        assert_eq!(pending.payload.status, "needs_resolution");
        assert_eq!(pending.payload.automatic, 1);
        assert_eq!(pending.payload.unmatched, vec!["Alice Smith"]);
        let ids: Vec<_> = pending.payload.candidates.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert_eq!(pending.automatic, vec![Match::new("Bob Lee", "2")]);
    }

    #[test]
    fn upload_completes_when_all_names_are_unique() {
        let mut input = inputs();
        input.reference = table(&["CHICK", "Child"], &[&["1", "Alice Smith"], &["2", "Bob Lee"]]);
        let UploadOutcome::Complete(merged) = upload(&config(), &input).unwrap() else {
            panic!("expected complete");
        };
        assert_eq!(merged.columns, vec!["Name", "CHICK", "Hours"]);
        assert!(merged.entities.iter().all(|e| e.origin == MatchOrigin::Automatic));
        assert_eq!(merged.rows()[0], vec!["Alice Smith", "1", "15"]);
    }

    #[test]
    fn finalize_applies_selections() {
        let merged = finalize(&config(), &inputs(), [Match::new("Alice Smith", "3")]).unwrap();
        assert_eq!(merged.entities.len(), 2);
        assert_eq!(merged.entities[0].reference_id, "3");
        assert_eq!(merged.entities[0].origin, MatchOrigin::Confirmed);
    }

    #[test]
    fn finalize_without_selections_is_incomplete() {
        let err = finalize(&config(), &inputs(), Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            ReconError::Finalize(FinalizeError::IncompleteSession { ref pending }) if pending == &["Alice Smith"]
        ));
    }

    #[test]
    fn finalize_rejects_automatically_consumed_reference() {
        let err = finalize(&config(), &inputs(), [Match::new("Alice Smith", "2")]).unwrap_err();
        assert!(matches!(err, ReconError::Session(SessionError::InvalidSelection { .. })));
    }

    #[test]
    fn missing_auxiliary_table_is_an_ingestion_error() {
        let toml = format!("{CONFIG}\n[auxiliary]\nfile = \"aux.csv\"\nid_column = \"CHICK\"\n");
        let cfg = RollbookConfig::from_toml(&toml).unwrap();
        let err = prepare(&cfg, &inputs()).unwrap_err();
        assert!(matches!(err, ReconError::Ingestion(IngestionError::Empty { .. })));
    }
}
