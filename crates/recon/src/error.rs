use thiserror::Error;

/// Malformed or missing input. Fatal to the pass: nothing is matched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IngestionError {
    /// The collaborator could not read the payload (missing file, corrupt workbook).
    #[error("dataset '{role}': cannot read {location}: {message}")]
    Read {
        role: String,
        location: String,
        message: String,
    },
    #[error("dataset '{role}': unsupported format '{extension}'")]
    UnsupportedFormat { role: String, extension: String },
    #[error("dataset '{role}': sheet '{sheet}' not found")]
    SheetNotFound { role: String, sheet: String },
    #[error("dataset '{role}' has no rows")]
    Empty { role: String },
    #[error("dataset '{role}': missing column '{column}'")]
    MissingColumn { role: String, column: String },
    #[error("dataset '{role}', row {row}: empty {what}")]
    MissingValue { role: String, row: usize, what: String },
    #[error("dataset '{role}': id '{id}' appears more than once")]
    DuplicateId { role: String, id: String },
    /// Source datasets are keyed by name, so names must be unique.
    #[error("dataset '{role}': name '{name}' appears more than once")]
    DuplicateName { role: String, name: String },
    #[error("dataset '{role}', row {row}: cannot parse date '{value}'")]
    BadDate { role: String, row: usize, value: String },
    #[error("dataset '{role}', row {row}: cannot parse allocation description '{value}'")]
    BadDescription { role: String, row: usize, value: String },
    #[error("dataset '{role}', row {row}: cannot parse amount '{value}'")]
    BadAmount { role: String, row: usize, value: String },
}

/// Rejected session action. The session is left exactly as it was.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("cannot match '{source_name}' to '{reference_id}': {reason}")]
    InvalidSelection {
        source_name: String,
        reference_id: String,
        reason: SelectionFault,
    },
    #[error("'{source_name}' has no confirmed match")]
    NotConfirmed { source_name: String },
}

/// Why a selection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionFault {
    /// Source name is not pending (unknown, or already confirmed).
    SourceNotPending,
    /// Reference id is not in the candidate pool (unknown, or already taken).
    ReferenceUnavailable,
}

impl std::fmt::Display for SelectionFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SourceNotPending => write!(f, "source is not awaiting a match"),
            Self::ReferenceUnavailable => write!(f, "reference is not available"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FinalizeError {
    /// Expected intermediate state, not a fault: resolution must continue.
    #[error("{} record(s) still unmatched", pending.len())]
    IncompleteSession { pending: Vec<String> },
    /// Internal consistency bug. Unreachable through correct session use.
    #[error("reference '{reference_id}' is claimed by both '{first}' and '{second}'")]
    DuplicateReference {
        reference_id: String,
        first: String,
        second: String,
    },
    #[error("source '{source_name}' is matched more than once")]
    DuplicateSource { source_name: String },
    #[error("match names unknown {kind} '{key}'")]
    UnknownRecord { kind: &'static str, key: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExportError {
    #[error("cannot write spreadsheet: {0}")]
    Write(String),
    #[error("export column '{0}' has no value source")]
    UnknownColumn(String),
}

/// Umbrella error for a reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (missing column mapping, bad period, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    #[error(transparent)]
    Ingestion(#[from] IngestionError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Finalize(#[from] FinalizeError),
    #[error(transparent)]
    Export(#[from] ExportError),
}
