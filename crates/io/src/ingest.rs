// Dataset loading by file extension

use std::path::{Path, PathBuf};

use rollbook_recon::config::DatasetConfig;
use rollbook_recon::engine::Ingest;
use rollbook_recon::error::IngestionError;
use rollbook_recon::model::{RawTable, Role};

use crate::xlsx::ImportError;

const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "xlsb", "ods"];

/// Ingestion collaborator reading datasets from disk. Relative paths resolve
/// against `base_dir` (the config file's directory).
#[derive(Debug, Clone, Default)]
pub struct FileIngest {
    base_dir: PathBuf,
}

impl FileIngest {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn resolve(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

impl Ingest for FileIngest {
    fn load(&self, role: Role, dataset: &DatasetConfig) -> Result<RawTable, IngestionError> {
        let path = self.resolve(&dataset.file);
        let location = path.display().to_string();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if !path.is_file() {
            return Err(IngestionError::Read {
                role: role.to_string(),
                location,
                message: "file not found".into(),
            });
        }

        let table = match extension.as_str() {
            "csv" | "tsv" | "txt" => crate::csv::import(&path).map_err(|message| IngestionError::Read {
                role: role.to_string(),
                location: location.clone(),
                message,
            })?,
            ext if SPREADSHEET_EXTENSIONS.contains(&ext) => {
                crate::xlsx::import(&path, dataset.sheet.as_deref()).map_err(|e| match e {
                    ImportError::SheetNotFound(sheet) => IngestionError::SheetNotFound {
                        role: role.to_string(),
                        sheet,
                    },
                    other => IngestionError::Read {
                        role: role.to_string(),
                        location: location.clone(),
                        message: other.to_string(),
                    },
                })?
            }
            _ => {
                return Err(IngestionError::UnsupportedFormat {
                    role: role.to_string(),
                    extension,
                })
            }
        };

        tracing::info!(
            role = %role,
            file = %location,
            columns = table.headers.len(),
            rows = table.rows.len(),
            "dataset read"
        );
        Ok(table)
    }
}
