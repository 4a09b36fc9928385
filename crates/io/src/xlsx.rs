// Excel import (xlsx, xls, xlsb, ods) and XLSX export

use std::fmt;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use chrono::{Duration, NaiveDate, NaiveTime};
use rust_xlsxwriter::{Color, Format, FormatPattern, Workbook};

use rollbook_recon::config::{HighlightConfig, OutputConfig};
use rollbook_recon::engine::Export;
use rollbook_recon::error::ExportError;
use rollbook_recon::funding::parse_date;
use rollbook_recon::model::{MergedSet, RawTable};

/// Widest column in characters; longer values are left to wrap in Excel.
const MAX_COLUMN_WIDTH: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportError {
    Open(String),
    NoSheets,
    SheetNotFound(String),
    Read(String),
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(e) => write!(f, "failed to open workbook: {e}"),
            Self::NoSheets => write!(f, "workbook contains no sheets"),
            Self::SheetNotFound(s) => write!(f, "sheet '{s}' not found"),
            Self::Read(e) => write!(f, "failed to read sheet: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

/// Read one sheet (the named one, or the first) as a raw table. The first
/// used row is the header row.
pub fn import(path: &Path, sheet: Option<&str>) -> Result<RawTable, ImportError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| ImportError::Open(e.to_string()))?;

    let names: Vec<String> = workbook.sheet_names().to_vec();
    let name = match sheet {
        Some(wanted) => names
            .iter()
            .find(|n| n.as_str() == wanted)
            .cloned()
            .ok_or_else(|| ImportError::SheetNotFound(wanted.into()))?,
        None => names.first().cloned().ok_or(ImportError::NoSheets)?,
    };

    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| ImportError::Read(e.to_string()))?;

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect::<Vec<String>>());
    let headers: Vec<String> = match rows.next() {
        Some(header) => header.into_iter().map(|h| h.trim().to_string()).collect(),
        None => return Ok(RawTable::default()),
    };
    let rows: Vec<Vec<String>> = rows.collect();

    tracing::debug!(path = %path.display(), sheet = %name, rows = rows.len(), "sheet imported");
    Ok(RawTable::new(headers, rows))
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(n) => {
            // Integers without decimals
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{}", n)
            }
        }
        Data::Int(n) => n.to_string(),
        Data::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Data::Error(e) => format!("#{:?}", e),
        Data::DateTime(dt) => serial_to_iso(dt.as_f64()),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}

/// Excel 1900-system serial to `YYYY-MM-DD`, with ` HH:MM:SS` when the
/// serial carries a time part.
pub(crate) fn serial_to_iso(serial: f64) -> String {
    let Some(epoch) = NaiveDate::from_ymd_opt(1899, 12, 30) else {
        return serial.to_string();
    };
    let days = serial.floor();
    let Some(date) = epoch.checked_add_signed(Duration::days(days as i64)) else {
        return serial.to_string();
    };

    let seconds = ((serial - days) * 86_400.0).round() as u32;
    if seconds == 0 || seconds >= 86_400 {
        return date.format("%Y-%m-%d").to_string();
    }
    match NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0) {
        Some(time) => date.and_time(time).format("%Y-%m-%d %H:%M:%S").to_string(),
        None => date.format("%Y-%m-%d").to_string(),
    }
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Fill color (RGB) for a highlight-column value, if it falls in a band.
pub(crate) fn highlight_color(config: &HighlightConfig, value: &str, today: NaiveDate) -> Option<u32> {
    let date = parse_date(value, &config.date_formats)?;
    let reference = config.reference_date.unwrap_or(today);
    let days_left = (date - reference).num_days();
    let hex = config.color_for(days_left)?;
    u32::from_str_radix(hex, 16).ok()
}

/// One worksheet: bold frozen header, sized columns, optional date highlight.
pub fn export_to_bytes(merged: &MergedSet, output: &OutputConfig, today: NaiveDate) -> Result<Vec<u8>, ExportError> {
    let write_err = |e: rust_xlsxwriter::XlsxError| ExportError::Write(e.to_string());

    let highlight = match output.highlight {
        Some(ref hl) => {
            let col = merged
                .columns
                .iter()
                .position(|c| c == &hl.column)
                .ok_or_else(|| ExportError::UnknownColumn(hl.column.clone()))?;
            Some((col, hl))
        }
        None => None,
    };

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(&output.sheet_name).map_err(write_err)?;

    let header_format = Format::new().set_bold();
    let mut widths: Vec<usize> = merged.columns.iter().map(|c| c.chars().count()).collect();

    for (col, name) in merged.columns.iter().enumerate() {
        worksheet
            .write_string_with_format(0, col as u16, name, &header_format)
            .map_err(write_err)?;
    }

    let mut highlighted = 0usize;
    for (row_idx, row) in merged.rows().iter().enumerate() {
        let row_num = (row_idx + 1) as u32;
        for (col, value) in row.iter().enumerate() {
            widths[col] = widths[col].max(value.chars().count());

            let fill = highlight
                .filter(|(hl_col, _)| *hl_col == col)
                .and_then(|(_, hl)| highlight_color(hl, value, today));
            match fill {
                Some(rgb) => {
                    let format = Format::new()
                        .set_background_color(Color::RGB(rgb))
                        .set_pattern(FormatPattern::Solid);
                    worksheet
                        .write_string_with_format(row_num, col as u16, value, &format)
                        .map_err(write_err)?;
                    highlighted += 1;
                }
                None => {
                    worksheet.write_string(row_num, col as u16, value).map_err(write_err)?;
                }
            }
        }
    }

    for (col, width) in widths.iter().enumerate() {
        let width = (*width + 2).min(MAX_COLUMN_WIDTH);
        worksheet
            .set_column_width(col as u16, width as f64)
            .map_err(write_err)?;
    }
    worksheet.set_freeze_panes(1, 0).map_err(write_err)?;
    if !merged.entities.is_empty() && !merged.columns.is_empty() {
        worksheet
            .autofilter(0, 0, merged.entities.len() as u32, (merged.columns.len() - 1) as u16)
            .map_err(write_err)?;
    }

    tracing::debug!(rows = merged.entities.len(), highlighted, "xlsx rendered");
    workbook.save_to_buffer().map_err(write_err)
}

/// XLSX export collaborator. Highlights count days from `today` unless the
/// config pins a reference date.
#[derive(Debug, Clone, Copy)]
pub struct XlsxExport {
    today: NaiveDate,
}

impl XlsxExport {
    pub fn new() -> Self {
        Self::as_of(chrono::Local::now().date_naive())
    }

    pub fn as_of(today: NaiveDate) -> Self {
        Self { today }
    }
}

impl Default for XlsxExport {
    fn default() -> Self {
        Self::new()
    }
}

impl Export for XlsxExport {
    fn export(&self, merged: &MergedSet, output: &OutputConfig) -> Result<Vec<u8>, ExportError> {
        export_to_bytes(merged, output, self.today)
    }
}
