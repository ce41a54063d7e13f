// src/verify/mod.rs

//! Comparison of built tables against externally published figures.
//!
//! A mismatch is data, not an error: it lands in the report and the caller
//! decides what it means. Fetched values are never adjusted to fit.

pub mod reference;
pub mod report;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::process::{Entity, Metric, Tables};

pub use reference::REFERENCE_SET;
pub use report::render;

/// One published figure, in the dataset's own units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub entity: Entity,
    pub year: i32,
    pub metric: Metric,
    pub expected_value: f64,
}

/// Absolute tolerance, optionally per metric. All-zero means exact match.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Tolerance {
    pub default: f64,
    pub capacity: Option<f64>,
    pub production: Option<f64>,
}

impl Tolerance {
    pub fn exact() -> Self {
        Self::default()
    }

    pub fn for_metric(&self, metric: Metric) -> f64 {
        let specific = match metric {
            Metric::InstalledCapacity => self.capacity,
            Metric::NetProduction => self.production,
        };
        specific.unwrap_or(self.default).abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Mismatch,
    /// The table has no value for the cell.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub entity: Entity,
    pub year: i32,
    pub metric: Metric,
    /// `None` when the cell is missing; never a stand-in zero.
    pub fetched_value: Option<f64>,
    pub expected_value: f64,
    /// `fetched - expected`, when there is something fetched.
    pub diff: Option<f64>,
    pub passed: bool,
}

impl VerificationResult {
    pub fn outcome(&self) -> Outcome {
        match (self.passed, self.fetched_value) {
            (true, _) => Outcome::Pass,
            (false, Some(_)) => Outcome::Mismatch,
            (false, None) => Outcome::Missing,
        }
    }
}

/// Check every reference entry against the matching table cell.
pub fn verify(tables: &Tables, references: &[ReferenceEntry], tolerance: &Tolerance) -> Vec<VerificationResult> {
    references
        .iter()
        .map(|r| {
            let fetched = tables.get(&r.entity).and_then(|t| t.value(r.year, r.metric));
            let diff = fetched.map(|f| f - r.expected_value);
            let passed = diff.is_some_and(|d| d.abs() <= tolerance.for_metric(r.metric));
            VerificationResult {
                entity: r.entity,
                year: r.year,
                metric: r.metric,
                fetched_value: fetched,
                expected_value: r.expected_value,
                diff,
                passed,
            }
        })
        .collect()
}

/// Results plus the tally that always accompanies them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub results: Vec<VerificationResult>,
    pub passed: usize,
    pub mismatched: usize,
    pub missing: usize,
}

impl VerificationReport {
    pub fn new(results: Vec<VerificationResult>) -> Self {
        let count = |o: Outcome| results.iter().filter(|r| r.outcome() == o).count();
        let (passed, mismatched, missing) =
            (count(Outcome::Pass), count(Outcome::Mismatch), count(Outcome::Missing));
        Self {
            results,
            passed,
            mismatched,
            missing,
        }
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// True only when something was checked and all of it passed.
    pub fn all_passed(&self) -> bool {
        !self.results.is_empty() && self.passed == self.total()
    }

    pub fn failures(&self) -> impl Iterator<Item = &VerificationResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    pub fn summary(&self) -> String {
        format!(
            "{}/{} passed, {} mismatched, {} missing",
            self.passed,
            self.total(),
            self.mismatched,
            self.missing
        )
    }
}

/// `verify` and tally in one step, logging the outcome.
#[instrument(level = "info", skip_all, fields(references = references.len()))]
pub fn verify_report(tables: &Tables, references: &[ReferenceEntry], tolerance: &Tolerance) -> VerificationReport {
    let report = VerificationReport::new(verify(tables, references, tolerance));
    if report.total() == 0 {
        warn!("No reference figures to verify against");
    } else if report.all_passed() {
        info!(summary = %report.summary(), "Verification passed");
    } else {
        for r in report.failures() {
            warn!(
                entity = %r.entity,
                year = r.year,
                metric = %r.metric,
                fetched = ?r.fetched_value,
                expected = r.expected_value,
                "Verification failure"
            );
        }
        warn!(summary = %report.summary(), "Verification failed");
    }
    report
}
