// src/verify/report.rs

use std::fmt::Write;

use super::{Outcome, VerificationReport};

fn fmt_value(v: Option<f64>) -> String {
    match v {
        Some(v) if v.fract() == 0.0 => format!("{:.0}", v),
        Some(v) => format!("{:.3}", v),
        None => "N/A".to_string(),
    }
}

/// Fixed-width pass/fail table. The summary line is always present.
pub fn render(report: &VerificationReport) -> String {
    let mut out = String::new();
    let header = format!(
        "{: <15} {:>4}  {: <26} {:>10} {:>10} {:>8}  {}",
        "Source", "Year", "Metric", "Fetched", "Reference", "Diff", "Status"
    );
    let rule = "-".repeat(header.len() + 2);

    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "{}", header);
    let _ = writeln!(out, "{}", rule);
    for r in &report.results {
        let status = match r.outcome() {
            Outcome::Pass => "PASS",
            Outcome::Mismatch => "FAIL",
            Outcome::Missing => "MISSING",
        };
        let _ = writeln!(
            out,
            "{: <15} {:>4}  {: <26} {:>10} {:>10} {:>8}  {}",
            r.entity.name(),
            r.year,
            r.metric.name(),
            fmt_value(r.fetched_value),
            fmt_value(Some(r.expected_value)),
            fmt_value(r.diff),
            status
        );
    }
    let _ = writeln!(out, "{}", rule);
    let verdict = if report.total() == 0 {
        "NOTHING CHECKED"
    } else if report.all_passed() {
        "ALL PASS"
    } else {
        "FAILURES PRESENT"
    };
    let _ = writeln!(out, "Verification: {} ({})", report.summary(), verdict);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{Entity, Metric};
    use crate::verify::VerificationResult;

    fn result(fetched: Option<f64>, expected: f64, passed: bool) -> VerificationResult {
        VerificationResult {
            entity: Entity::OffshoreWind,
            year: 2023,
            metric: Metric::NetProduction,
            fetched_value: fetched,
            expected_value: expected,
            diff: fetched.map(|f| f - expected),
            passed,
        }
    }

    #[test]
    fn renders_rows_and_summary() {
        let report = VerificationReport::new(vec![
            result(Some(11553.0), 11553.0, true),
            result(Some(11550.5), 11553.0, false),
            result(None, 11553.0, false),
        ]);
        let text = render(&report);

        assert!(text.contains("Offshore Wind"));
        assert!(text.contains("PASS"));
        assert!(text.contains("-2.500"));
        assert!(text.contains("MISSING"));
        assert!(text.contains("N/A"));
        assert!(text
            .trim_end()
            .ends_with("Verification: 1/3 passed, 1 mismatched, 1 missing (FAILURES PRESENT)"));
    }

    #[test]
    fn empty_report_does_not_read_as_pass() {
        let text = render(&VerificationReport::new(Vec::new()));
        assert!(text.contains("Verification: 0/0 passed, 0 mismatched, 0 missing (NOTHING CHECKED)"));
        assert!(!text.contains("ALL PASS"));
    }
}
