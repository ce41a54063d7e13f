// src/process/normalize.rs

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

use super::period::year_from_period;
use super::resolve::{Metric, Resolver};
use crate::error::ParseError;
use crate::fetch::RawRecord;

/// One annual record of a tracked source.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    /// Raw source code, trimmed.
    pub entity_id: String,
    pub year: i32,
    /// `None` marks a value the source left empty; distinct from `Some(0.0)`.
    pub metrics: BTreeMap<Metric, Option<f64>>,
}

impl NormalizedRow {
    pub fn metric(&self, metric: Metric) -> Option<f64> {
        self.metrics.get(&metric).copied().flatten()
    }
}

/// Counts from one normalisation pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct NormalizeStats {
    pub accepted: usize,
    /// Rows of sources we don't track.
    pub unrelated: usize,
    /// (record index, reason) for tracked rows that were excluded.
    pub rejected: Vec<(usize, ParseError)>,
}

/// Trim whitespace and strip one pair of outer quotes.
fn clean_str(raw: &str) -> &str {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].trim()
    } else {
        trimmed
    }
}

fn text_field<'a>(record: &'a RawRecord, field: &str) -> Result<&'a str, ParseError> {
    match record.get(field) {
        None => Err(ParseError::MissingField {
            field: field.to_string(),
        }),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(ParseError::NotText {
            field: field.to_string(),
            value: other.to_string(),
        }),
    }
}

/// `null`, `""` and `"."` are absent; numbers and numeric strings are values.
/// `NaN` and infinities are not.
fn numeric_field(record: &RawRecord, field: &str) -> Result<Option<f64>, ParseError> {
    let invalid = |v: &Value| ParseError::Number {
        field: field.to_string(),
        value: v.to_string(),
    };
    match record.get(field) {
        None => Err(ParseError::MissingField {
            field: field.to_string(),
        }),
        Some(Value::Null) => Ok(None),
        Some(v @ Value::Number(n)) => n.as_f64().map(Some).ok_or_else(|| invalid(v)),
        Some(v @ Value::String(s)) => match clean_str(s) {
            "" | "." => Ok(None),
            s => match s.parse::<f64>() {
                Ok(n) if n.is_finite() => Ok(Some(n)),
                _ => Err(invalid(v)),
            },
        },
        Some(v) => Err(invalid(v)),
    }
}

/// Turn one raw record into a typed row.
///
/// `Ok(None)` for sources the resolver doesn't track; those are expected
/// and dropped without noise. `Err` means a tracked row is unusable.
pub fn normalize(record: &RawRecord, resolver: &Resolver) -> Result<Option<NormalizedRow>, ParseError> {
    let cols = resolver.columns();

    let code = clean_str(text_field(record, cols.source)?);
    if resolver.entity(code).is_none() {
        return Ok(None);
    }

    let year = year_from_period(text_field(record, cols.period)?)?;

    let mut metrics = BTreeMap::new();
    for metric in Metric::ALL {
        metrics.insert(metric, numeric_field(record, cols.metric(metric))?);
    }

    Ok(Some(NormalizedRow {
        entity_id: code.to_string(),
        year,
        metrics,
    }))
}

/// Normalise a whole payload, excluding (and logging) rows that fail.
#[instrument(level = "info", skip_all, fields(records = records.len()))]
pub fn normalize_all(records: &[RawRecord], resolver: &Resolver) -> (Vec<NormalizedRow>, NormalizeStats) {
    let mut rows = Vec::new();
    let mut stats = NormalizeStats::default();

    for (idx, record) in records.iter().enumerate() {
        match normalize(record, resolver) {
            Ok(Some(row)) => {
                stats.accepted += 1;
                rows.push(row);
            }
            Ok(None) => stats.unrelated += 1,
            Err(e) => {
                warn!(record = idx, error = %e, "Excluding row");
                stats.rejected.push((idx, e));
            }
        }
    }

    info!(
        accepted = stats.accepted,
        unrelated = stats.unrelated,
        rejected = stats.rejected.len(),
        "Normalised records"
    );
    (rows, stats)
}
