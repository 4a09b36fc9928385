//! Funding summary: allocation rows collapsed to one record per person.
//!
//! Each input row is one allocation (`"30 hours x €5.50"`, dated, valued).
//! Rows outside the funding period are dropped, the rest are grouped by
//! person into a total, a per-month pivot and a term/non-term hours label.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{Datelike, NaiveDate};

use crate::config::{DatasetConfig, FundingConfig};
use crate::error::IngestionError;
use crate::model::{Dataset, RawTable, Record, Role};
use crate::normalize::{cell, column_index, is_blank, line_of, CompiledFilter};

pub const TERM_LABEL_COLUMN: &str = "Term/Non-Term/Changes";
pub const TOTAL_COLUMN: &str = "Allocation Value";

/// One parsed allocation row.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub name: String,
    pub date: NaiveDate,
    pub hours: i64,
    pub rate: f64,
    pub value_cents: i64,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a financial number: strips currency symbols, thousands separators
/// and whitespace; `(12.50)` is negative. Returns cents.
pub fn parse_amount_cents(s: &str, currency_symbol: &str) -> Option<i64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (is_negative, inner) = if trimmed.starts_with('(') && trimmed.ends_with(')') {
        (true, &trimmed[1..trimmed.len() - 1])
    } else {
        (false, trimmed)
    };

    let without_symbol = inner.replace(currency_symbol, "");
    let cleaned: String = without_symbol
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | ',') && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    for (i, c) in cleaned.chars().enumerate() {
        match c {
            '0'..='9' | '.' => {}
            '-' | '+' if i == 0 && !is_negative => {}
            _ => return None,
        }
    }

    let value: f64 = cleaned.parse().ok()?;
    let cents = (value * 100.0).round() as i64;
    Some(if is_negative { -cents } else { cents })
}

/// Split `"<hours> hours x <symbol><rate>"` into whole hours and rate.
/// Fractional hours are truncated.
pub fn parse_description(description: &str, currency_symbol: &str) -> Option<(i64, f64)> {
    let parts: Vec<&str> = description.split(" x ").collect();
    if parts.len() != 2 {
        return None;
    }
    let hours: f64 = parts[0].split_whitespace().next()?.parse().ok()?;
    if !hours.is_finite() {
        return None;
    }
    let rate: f64 = parts[1].replace(currency_symbol, "").trim().parse().ok()?;
    Some((hours.trunc() as i64, rate))
}

pub fn parse_date(value: &str, formats: &[String]) -> Option<NaiveDate> {
    let value = value.trim();
    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

// ---------------------------------------------------------------------------
// Hours label
// ---------------------------------------------------------------------------

/// Describe a person's distinct weekly hours.
///
/// A single value prints as-is. Otherwise values whose difference is one of
/// `pair_gaps` are paired greedily in ascending order (`"15/30"`); without
/// any pair the values are listed as a change sequence (`"10-20"`).
pub fn term_label(hours: &[i64], pair_gaps: &[i64]) -> String {
    let distinct: Vec<i64> = hours.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
    if distinct.len() == 1 {
        return distinct[0].to_string();
    }

    let mut pairs = Vec::new();
    let mut used = BTreeSet::new();
    for i in 0..distinct.len() {
        for j in (i + 1)..distinct.len() {
            let (a, b) = (distinct[i], distinct[j]);
            if pair_gaps.contains(&(b - a).abs()) && !used.contains(&a) && !used.contains(&b) {
                pairs.push(format!("{a}/{b}"));
                used.insert(a);
                used.insert(b);
            }
        }
    }

    if !pairs.is_empty() {
        return pairs.join(", ");
    }

    distinct
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join("-")
}

// ---------------------------------------------------------------------------
// Money + months
// ---------------------------------------------------------------------------

pub fn format_money(cents: i64, symbol: &str) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{symbol}{}.{:02}", abs / 100, abs % 100)
}

/// Month columns covering the period, in order. Labels carry the year only
/// when the period spans more than twelve months.
pub fn month_columns(start: NaiveDate, end: NaiveDate) -> Vec<(i32, u32, String)> {
    let mut months = Vec::new();
    let (mut y, mut m) = (start.year(), start.month());
    while (y, m) <= (end.year(), end.month()) {
        months.push((y, m));
        if m == 12 {
            y += 1;
            m = 1;
        } else {
            m += 1;
        }
    }

    let with_year = months.len() > 12;
    months
        .into_iter()
        .filter_map(|(y, m)| {
            let first = NaiveDate::from_ymd_opt(y, m, 1)?;
            let label = if with_year {
                first.format("%b %Y").to_string()
            } else {
                first.format("%b").to_string()
            };
            Some((y, m, label))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Parse allocation rows, dropping blank, filtered and out-of-period rows.
pub fn read_allocations(
    table: &RawTable,
    config: &DatasetConfig,
    funding: &FundingConfig,
) -> Result<Vec<Allocation>, IngestionError> {
    let role = Role::Source;
    if table.headers.is_empty() || table.is_empty() {
        return Err(IngestionError::Empty { role: role.to_string() });
    }

    let name_col = config.name_column.as_deref().unwrap_or("Child");
    let name_idx = column_index(table, role, name_col)?;
    let date_idx = column_index(table, role, &funding.date_column)?;
    let desc_idx = column_index(table, role, &funding.description_column)?;
    let value_idx = column_index(table, role, &funding.value_column)?;
    let filter = CompiledFilter::compile(table, role, config.filter.as_ref())?;

    let mut out = Vec::new();
    let mut out_of_period = 0usize;

    for (idx, row) in table.rows.iter().enumerate() {
        if is_blank(row) {
            continue;
        }
        if let Some(ref f) = filter {
            if !f.keeps(row) {
                continue;
            }
        }

        let name = cell(row, name_idx);
        if name.is_empty() {
            return Err(IngestionError::MissingValue {
                role: role.to_string(),
                row: line_of(idx),
                what: "name".into(),
            });
        }

        let raw_date = cell(row, date_idx);
        let date = parse_date(raw_date, &funding.date_formats).ok_or_else(|| {
            IngestionError::BadDate {
                role: role.to_string(),
                row: line_of(idx),
                value: raw_date.into(),
            }
        })?;
        if date < funding.period_start || date > funding.period_end {
            out_of_period += 1;
            continue;
        }

        let raw_desc = cell(row, desc_idx);
        let (hours, rate) = parse_description(raw_desc, &funding.currency_symbol).ok_or_else(|| {
            IngestionError::BadDescription {
                role: role.to_string(),
                row: line_of(idx),
                value: raw_desc.into(),
            }
        })?;

        let raw_value = cell(row, value_idx);
        let value_cents = parse_amount_cents(raw_value, &funding.currency_symbol).ok_or_else(|| {
            IngestionError::BadAmount {
                role: role.to_string(),
                row: line_of(idx),
                value: raw_value.into(),
            }
        })?;

        out.push(Allocation {
            name: name.to_string(),
            date,
            hours,
            rate,
            value_cents,
        });
    }

    if out_of_period > 0 {
        tracing::info!(
            dropped = out_of_period,
            start = %funding.period_start,
            end = %funding.period_end,
            "allocations outside funding period dropped"
        );
    }

    Ok(out)
}

/// Group allocations per person into summary records, first-seen order.
pub fn summarize(allocations: &[Allocation], funding: &FundingConfig) -> Dataset {
    let months = month_columns(funding.period_start, funding.period_end);
    let symbol = funding.currency_symbol.as_str();

    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&Allocation>> = HashMap::new();
    for a in allocations {
        let entry = groups.entry(a.name.as_str()).or_default();
        if entry.is_empty() {
            order.push(a.name.as_str());
        }
        entry.push(a);
    }

    let mut headers = vec![
        funding.name_header.clone(),
        TERM_LABEL_COLUMN.to_string(),
        TOTAL_COLUMN.to_string(),
    ];
    headers.extend(months.iter().map(|(_, _, label)| label.clone()));

    let records = order
        .iter()
        .enumerate()
        .map(|(ordinal, name)| {
            let rows = &groups[name];
            let hours: Vec<i64> = rows.iter().map(|a| a.hours).collect();
            let total: i64 = rows.iter().map(|a| a.value_cents).sum();

            let mut per_month: BTreeMap<(i32, u32), i64> = BTreeMap::new();
            for a in rows {
                *per_month.entry((a.date.year(), a.date.month())).or_insert(0) += a.value_cents;
            }

            let mut attributes = BTreeMap::new();
            attributes.insert(funding.name_header.clone(), name.to_string());
            attributes.insert(TERM_LABEL_COLUMN.to_string(), term_label(&hours, &funding.pair_gaps));
            attributes.insert(TOTAL_COLUMN.to_string(), format_money(total, symbol));
            for (y, m, label) in &months {
                let value = per_month
                    .get(&(*y, *m))
                    .map(|c| format_money(*c, symbol))
                    .unwrap_or_default();
                attributes.insert(label.clone(), value);
            }

            Record {
                id: None,
                name: name.to_string(),
                attributes,
                ordinal,
            }
        })
        .collect::<Vec<_>>();

    tracing::debug!(
        allocations = allocations.len(),
        people = records.len(),
        "funding summary built"
    );

    Dataset {
        role: Role::Source,
        headers,
        records,
    }
}
