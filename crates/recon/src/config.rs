use std::collections::HashSet;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RollbookConfig {
    pub name: String,
    pub source: DatasetConfig,
    pub reference: DatasetConfig,
    #[serde(default)]
    pub auxiliary: Option<DatasetConfig>,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

// ---------------------------------------------------------------------------
// Datasets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfig {
    /// Path, relative to the config file.
    pub file: String,
    /// Worksheet for workbook inputs. First sheet when absent.
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    pub name_column: Option<String>,
    #[serde(default)]
    pub id_column: Option<String>,
    #[serde(default)]
    pub filter: Option<RowFilter>,
    #[serde(default)]
    pub funding: Option<FundingConfig>,
}

/// Keep only rows whose `column` holds one of `values` (trimmed, exact).
#[derive(Debug, Clone, Deserialize)]
pub struct RowFilter {
    pub column: String,
    pub values: Vec<String>,
}

/// Collapses allocation rows into one summary row per person.
#[derive(Debug, Clone, Deserialize)]
pub struct FundingConfig {
    pub date_column: String,
    pub description_column: String,
    pub value_column: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    #[serde(default = "default_date_formats")]
    pub date_formats: Vec<String>,
    #[serde(default = "default_currency_symbol")]
    pub currency_symbol: String,
    /// Header of the name column in the summary output.
    #[serde(default = "default_name_header")]
    pub name_header: String,
    /// Hour differences that mark a term/non-term pair.
    #[serde(default = "default_pair_gaps")]
    pub pair_gaps: Vec<i64>,
}

pub(crate) fn default_date_formats() -> Vec<String> {
    vec!["%d/%m/%Y".into(), "%Y-%m-%d".into()]
}

fn default_currency_symbol() -> String {
    "€".into()
}

fn default_name_header() -> String {
    "Name".into()
}

fn default_pair_gaps() -> Vec<i64> {
    vec![9, 12, 15]
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchingConfig {
    #[serde(default)]
    pub policy: PolicyKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    Exact,
    CaseInsensitive,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path, relative to the config file.
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,
    /// Explicit column layout. Derived from the datasets when empty.
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub highlight: Option<HighlightConfig>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            file: None,
            format: OutputFormat::default(),
            sheet_name: default_sheet_name(),
            columns: Vec::new(),
            highlight: None,
        }
    }
}

fn default_sheet_name() -> String {
    "Summary".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Xlsx,
    Csv,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Xlsx => "xlsx",
            Self::Csv => "csv",
        }
    }
}

/// Colors a date column by the number of days left before it.
#[derive(Debug, Clone, Deserialize)]
pub struct HighlightConfig {
    pub column: String,
    /// "Today" for the countdown. Wall-clock date when absent.
    #[serde(default)]
    pub reference_date: Option<NaiveDate>,
    #[serde(default = "default_date_formats")]
    pub date_formats: Vec<String>,
    #[serde(default = "default_bands")]
    pub bands: Vec<HighlightBand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HighlightBand {
    pub within_days: i64,
    /// RGB hex, e.g. "FF0000".
    pub color: String,
}

fn default_bands() -> Vec<HighlightBand> {
    vec![
        HighlightBand { within_days: 7, color: "FF0000".into() },
        HighlightBand { within_days: 14, color: "FFBF00".into() },
        HighlightBand { within_days: 30, color: "FFFF00".into() },
    ]
}

impl HighlightConfig {
    /// Bands ordered tightest first.
    pub fn sorted_bands(&self) -> Vec<&HighlightBand> {
        let mut bands: Vec<&HighlightBand> = self.bands.iter().collect();
        bands.sort_by_key(|b| b.within_days);
        bands
    }

    /// Color for a date `days_left` days after the reference date.
    pub fn color_for(&self, days_left: i64) -> Option<&str> {
        self.sorted_bands()
            .into_iter()
            .find(|b| days_left <= b.within_days)
            .map(|b| b.color.as_str())
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl RollbookConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: RollbookConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        let invalid = |msg: String| Err(ReconError::ConfigValidation(msg));

        if self.source.name_column.is_none() {
            return invalid("source: name_column is required".into());
        }
        if self.source.id_column.is_some() {
            return invalid("source: datasets matched by name carry no id_column".into());
        }
        if self.reference.name_column.is_none() {
            return invalid("reference: name_column is required".into());
        }
        if self.reference.id_column.is_none() {
            return invalid("reference: id_column is required".into());
        }
        if self.reference.funding.is_some() {
            return invalid("reference: funding summary applies to the source dataset only".into());
        }

        if let Some(ref aux) = self.auxiliary {
            if aux.id_column.is_none() {
                return invalid("auxiliary: id_column is required".into());
            }
            if aux.funding.is_some() {
                return invalid("auxiliary: funding summary applies to the source dataset only".into());
            }
        }

        if let Some(ref funding) = self.source.funding {
            if funding.period_start > funding.period_end {
                return invalid(format!(
                    "source.funding: period_start {} is after period_end {}",
                    funding.period_start, funding.period_end
                ));
            }
            if funding.date_formats.is_empty() {
                return invalid("source.funding: date_formats must not be empty".into());
            }
            if funding.pair_gaps.iter().any(|g| *g <= 0) {
                return invalid("source.funding: pair_gaps must be positive".into());
            }
        }

        let mut seen = HashSet::new();
        for column in &self.output.columns {
            if !seen.insert(column.as_str()) {
                return invalid(format!("output: column '{column}' listed twice"));
            }
        }

        if let Some(ref hl) = self.output.highlight {
            if hl.date_formats.is_empty() {
                return invalid("output.highlight: date_formats must not be empty".into());
            }
            for band in &hl.bands {
                let hex_ok = band.color.len() == 6 && band.color.chars().all(|c| c.is_ascii_hexdigit());
                if !hex_ok {
                    return invalid(format!(
                        "output.highlight: color '{}' is not a 6-digit RGB hex value",
                        band.color
                    ));
                }
            }
        }

        Ok(())
    }

    /// Datasets in load order, auxiliary last.
    pub fn datasets(&self) -> Vec<(crate::model::Role, &DatasetConfig)> {
        use crate::model::Role;

        let mut out = vec![(Role::Source, &self.source), (Role::Reference, &self.reference)];
        if let Some(ref aux) = self.auxiliary {
            out.push((Role::Auxiliary, aux));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
