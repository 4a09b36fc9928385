//! Dataset normalizer: raw tables in, canonical records out.

use std::collections::{BTreeMap, HashSet};

use crate::config::{DatasetConfig, RowFilter};
use crate::error::IngestionError;
use crate::model::{Dataset, RawTable, Record, Role};

/// Spreadsheet line of data row `idx` (header is line 1).
pub(crate) fn line_of(idx: usize) -> usize {
    idx + 2
}

pub(crate) fn column_index(
    table: &RawTable,
    role: Role,
    column: &str,
) -> Result<usize, IngestionError> {
    table.column(column).ok_or_else(|| IngestionError::MissingColumn {
        role: role.to_string(),
        column: column.into(),
    })
}

pub(crate) fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(|s| s.trim()).unwrap_or("")
}

pub(crate) fn is_blank(row: &[String]) -> bool {
    row.iter().all(|c| c.trim().is_empty())
}

/// Resolved filter: column index plus accepted values.
pub(crate) struct CompiledFilter<'a> {
    idx: usize,
    filter: &'a RowFilter,
}

impl<'a> CompiledFilter<'a> {
    pub(crate) fn compile(
        table: &RawTable,
        role: Role,
        filter: Option<&'a RowFilter>,
    ) -> Result<Option<Self>, IngestionError> {
        filter
            .map(|f| {
                column_index(table, role, &f.column).map(|idx| CompiledFilter { idx, filter: f })
            })
            .transpose()
    }

    pub(crate) fn keeps(&self, row: &[String]) -> bool {
        let val = cell(row, self.idx);
        self.filter.values.iter().any(|v| v.trim() == val)
    }
}

/// Normalize one dataset. Source names and reference/auxiliary ids must be unique.
pub fn normalize(
    role: Role,
    table: &RawTable,
    config: &DatasetConfig,
) -> Result<Dataset, IngestionError> {
    if table.headers.is_empty() || table.is_empty() {
        return Err(IngestionError::Empty { role: role.to_string() });
    }

    let name_idx = match (&config.name_column, role) {
        (Some(col), _) => Some(column_index(table, role, col)?),
        (None, Role::Auxiliary) => None,
        (None, _) => {
            return Err(IngestionError::MissingColumn {
                role: role.to_string(),
                column: "<name_column>".into(),
            })
        }
    };
    let id_idx = match (&config.id_column, role) {
        (Some(col), Role::Reference | Role::Auxiliary) => Some(column_index(table, role, col)?),
        (None, Role::Reference | Role::Auxiliary) => {
            return Err(IngestionError::MissingColumn {
                role: role.to_string(),
                column: "<id_column>".into(),
            })
        }
        (_, Role::Source) => None,
    };
    let filter = CompiledFilter::compile(table, role, config.filter.as_ref())?;

    let headers: Vec<String> = table.headers.iter().map(|h| h.trim().to_string()).collect();
    let mut records = Vec::new();
    let mut seen_ids = HashSet::new();
    let mut seen_names = HashSet::new();
    let mut filtered_out = 0usize;

    for (idx, row) in table.rows.iter().enumerate() {
        if is_blank(row) {
            continue;
        }
        if let Some(ref f) = filter {
            if !f.keeps(row) {
                filtered_out += 1;
                continue;
            }
        }

        let id = match id_idx {
            Some(i) => {
                let id = cell(row, i);
                if id.is_empty() {
                    return Err(IngestionError::MissingValue {
                        role: role.to_string(),
                        row: line_of(idx),
                        what: "id".into(),
                    });
                }
                if !seen_ids.insert(id.to_string()) {
                    return Err(IngestionError::DuplicateId {
                        role: role.to_string(),
                        id: id.into(),
                    });
                }
                Some(id.to_string())
            }
            None => None,
        };

        let name = match name_idx {
            Some(i) => cell(row, i).to_string(),
            None => id.clone().unwrap_or_default(),
        };
        if name.is_empty() {
            return Err(IngestionError::MissingValue {
                role: role.to_string(),
                row: line_of(idx),
                what: "name".into(),
            });
        }
        if role == Role::Source && !seen_names.insert(name.clone()) {
            return Err(IngestionError::DuplicateName {
                role: role.to_string(),
                name,
            });
        }

        let attributes: BTreeMap<String, String> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !h.is_empty())
            .map(|(i, h)| (h.clone(), cell(row, i).to_string()))
            .collect();

        records.push(Record {
            id,
            name,
            attributes,
            ordinal: records.len(),
        });
    }

    tracing::debug!(
        role = %role,
        records = records.len(),
        filtered_out,
        "normalized dataset"
    );

    Ok(Dataset {
        role,
        headers: headers.into_iter().filter(|h| !h.is_empty()).collect(),
        records,
    })
}
