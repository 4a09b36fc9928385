// File I/O operations

pub mod csv;
pub mod ingest;
pub mod xlsx;

use rollbook_recon::config::OutputFormat;
use rollbook_recon::engine::Export;

pub use crate::csv::CsvExport;
pub use crate::ingest::FileIngest;
pub use crate::xlsx::XlsxExport;

/// Export collaborator for a configured output format.
pub fn exporter_for(format: OutputFormat) -> Box<dyn Export> {
    match format {
        OutputFormat::Xlsx => Box::new(XlsxExport::new()),
        OutputFormat::Csv => Box::new(CsvExport),
    }
}
