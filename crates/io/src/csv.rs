// CSV/TSV import/export

use std::io::Read;
use std::path::Path;

use rollbook_recon::config::OutputConfig;
use rollbook_recon::engine::Export;
use rollbook_recon::error::ExportError;
use rollbook_recon::model::{MergedSet, RawTable};

pub fn import(path: &Path) -> Result<RawTable, String> {
    let content = read_file_as_utf8(path)?;
    let delimiter = sniff_delimiter(&content);
    import_from_string(&content, delimiter)
}

/// Detect the most likely field delimiter by checking consistency across the first few lines.
///
/// For each candidate (tab, semicolon, comma, pipe), count fields per line. The delimiter
/// that produces the most consistent field count (>1 field) wins.
pub(crate) fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b'\t', b';', b',', b'|'];
    let sample_lines: Vec<&str> = content.lines().take(10).collect();

    if sample_lines.is_empty() {
        return b',';
    }

    let mut best = b',';
    let mut best_score = 0u64;

    for &delim in candidates {
        let counts: Vec<usize> = sample_lines
            .iter()
            .map(|line| {
                csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        if counts.first().copied().unwrap_or(0) <= 1 {
            continue;
        }

        // Lines agreeing with line 1, weighted by its field count
        let target = counts[0];
        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * target as u64;

        if score > best_score {
            best_score = score;
            best = delim;
        }
    }

    best
}

/// Read file and convert to UTF-8 if needed (handles Windows-1252, Latin-1, etc.)
pub fn read_file_as_utf8(path: &Path) -> Result<String, String> {
    let mut file = std::fs::File::open(path).map_err(|e| e.to_string())?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(|e| e.to_string())?;

    let text = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => {
            let bytes = e.into_bytes();
            // Excel-exported CSVs are usually Windows-1252
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            tracing::debug!(path = %path.display(), "decoded as windows-1252");
            decoded.into_owned()
        }
    };

    Ok(match text.strip_prefix('\u{feff}') {
        Some(rest) => rest.to_string(),
        None => text,
    })
}

/// First record is the header row. Short rows are padded to header width.
pub(crate) fn import_from_string(content: &str, delimiter: u8) -> Result<RawTable, String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut records = reader.records();
    let headers: Vec<String> = match records.next() {
        Some(first) => first
            .map_err(|e| e.to_string())?
            .iter()
            .map(|h| h.trim().to_string())
            .collect(),
        None => return Ok(RawTable::default()),
    };

    let mut rows = Vec::new();
    for result in records {
        let record = result.map_err(|e| e.to_string())?;
        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        if row.len() < headers.len() {
            row.resize(headers.len(), String::new());
        }
        rows.push(row);
    }

    Ok(RawTable::new(headers, rows))
}

/// Header row plus one line per merged entity.
pub fn export_to_bytes(merged: &MergedSet) -> Result<Vec<u8>, String> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());

    writer.write_record(&merged.columns).map_err(|e| e.to_string())?;
    for row in merged.rows() {
        writer.write_record(&row).map_err(|e| e.to_string())?;
    }

    writer.into_inner().map_err(|e| e.to_string())
}

/// CSV export collaborator.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvExport;

impl Export for CsvExport {
    fn export(&self, merged: &MergedSet, _output: &OutputConfig) -> Result<Vec<u8>, ExportError> {
        export_to_bytes(merged).map_err(ExportError::Write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_sniff_semicolon_delimiter() {
        let content = "Name;Age;City\nAlice;30;Paris\nBob;25;London\n";
        assert_eq!(sniff_delimiter(content), b';');
    }

    #[test]
    fn test_sniff_comma_delimiter() {
        let content = "Name,Age,City\nAlice,30,Paris\nBob,25,London\n";
        assert_eq!(sniff_delimiter(content), b',');
    }

    #[test]
    fn test_sniff_tab_delimiter() {
        let content = "Name\tAge\tCity\nAlice\t30\tParis\nBob\t25\tLondon\n";
        assert_eq!(sniff_delimiter(content), b'\t');
    }

    #[test]
    fn test_sniff_semicolon_with_commas_in_values() {
        let content = "Name;Address;City\n\"Doe, Jane\";\"123 Main St, Apt 4\";Paris\nBob;\"456 Elm\";London\n";
        assert_eq!(sniff_delimiter(content), b';');
    }

    #[test]
    fn test_semicolon_csv_import() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("roster.csv");
        fs::write(&path, "CHICK;Child\n1;Alice Smith\n2;Bob Lee\n").unwrap();

        let table = import(&path).unwrap();
        assert_eq!(table.headers, vec!["CHICK", "Child"]);
        assert_eq!(table.rows, vec![vec!["1", "Alice Smith"], vec!["2", "Bob Lee"]]);
    }

    #[test]
    fn test_windows_1252_fallback() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("funding.csv");
        // 0x80 is the euro sign in Windows-1252
        fs::write(&path, b"Child,Allocation Value\nAlice Smith,\x8075.00\n").unwrap();

        let table = import(&path).unwrap();
        assert_eq!(table.rows[0][1], "€75.00");
    }

    #[test]
    fn test_bom_and_short_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bom.csv");
        fs::write(&path, "\u{feff}Name,Phone,Notes\nAlice,555\n").unwrap();

        let table = import(&path).unwrap();
        assert_eq!(table.headers[0], "Name");
        assert_eq!(table.rows[0], vec!["Alice", "555", ""]);
    }

    #[test]
    fn test_empty_file() {
        let table = import_from_string("", b',').unwrap();
        assert!(table.headers.is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn test_export_quotes_and_layout() {
        use rollbook_recon::model::{MatchOrigin, MergedEntity};

        let merged = MergedSet {
            columns: vec!["Name".into(), "CHICK".into(), "Note".into()],
            entities: vec![MergedEntity {
                name: "Lee, Bob".into(),
                reference_id: "2".into(),
                origin: MatchOrigin::Automatic,
                source: [("Name".to_string(), "Lee, Bob".to_string())].into(),
                reference: [("CHICK".to_string(), "2".to_string())].into(),
                auxiliary: Default::default(),
            }],
        };
        let bytes = CsvExport.export(&merged, &OutputConfig::default()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "Name,CHICK,Note\n\"Lee, Bob\",2,\n");
    }
}
