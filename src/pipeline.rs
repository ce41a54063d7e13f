// src/pipeline.rs

//! fetch → resolve → build → verify, in one call.

use tracing::{info, instrument};

use crate::config::Config;
use crate::error::PipelineError;
use crate::export::ExportSink;
use crate::fetch::{Fetcher, Transport};
use crate::process::{self, audit_source_keys, KeyAudit, NormalizeStats, Resolver, Tables};
use crate::verify::{verify_report, ReferenceEntry, VerificationReport};

/// Everything a completed run produced.
#[derive(Debug)]
pub struct PipelineOutput {
    pub tables: Tables,
    pub report: VerificationReport,
    pub stats: NormalizeStats,
    /// Key audit for the configured year; empty when disabled or when no
    /// reference figures exist for that year.
    pub audits: Vec<KeyAudit>,
}

/// Run every stage up to and including verification.
///
/// A failed stage aborts the run. Verification mismatches do not; they are
/// in the returned report.
#[instrument(level = "info", skip_all, fields(dataset = %fetcher.source().dataset_id))]
pub fn run<T: Transport>(
    fetcher: &Fetcher<T>,
    config: &Config,
    references: &[ReferenceEntry],
) -> Result<PipelineOutput, PipelineError> {
    let resolver = Resolver::default();

    let records = fetcher.fetch_all(config.source.select_fields.as_deref())?;
    resolver.check_payload(&records)?;

    let (rows, stats) = process::normalize_all(&records, &resolver);

    let audits = match config.verify.audit_year {
        Some(year) => audit_source_keys(&resolver, &records, references, year),
        None => Vec::new(),
    };

    let tables = process::build(&rows, &resolver, &config.tables.options());
    let report = verify_report(&tables, references, &config.verify.tolerance());

    info!(
        records = records.len(),
        rows = rows.len(),
        summary = %report.summary(),
        "Pipeline complete"
    );
    Ok(PipelineOutput {
        tables,
        report,
        stats,
        audits,
    })
}

/// Hand a completed run to a sink.
pub fn export<S: ExportSink + ?Sized>(sink: &S, output: &PipelineOutput) -> Result<(), PipelineError> {
    sink.export(&output.tables, &output.report)
        .map_err(PipelineError::Export)
}
