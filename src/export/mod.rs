// src/export/mod.rs

//! Output sinks for the built tables and the verification report.

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Array, Int32Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use rayon::prelude::*;
use serde::Serialize;
use std::{
    collections::HashMap,
    fs::{self, File},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, instrument, warn};

use crate::process::{EntityTable, Metric, Tables};
use crate::verify::VerificationReport;

pub const REPORT_FILE: &str = "verification.json";

/// Consumes the final tables and report of a run.
pub trait ExportSink {
    fn export(&self, tables: &Tables, report: &VerificationReport) -> Result<()>;
}

/// One Parquet file per entity plus `verification.json`.
///
/// Files are staged in a hidden directory and renamed into place only after
/// every one has been written. A failed export leaves none of its files.
pub struct ParquetSink {
    out_dir: PathBuf,
}

impl ParquetSink {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn table_path(&self, table: &EntityTable) -> PathBuf {
        self.out_dir.join(file_name(table))
    }

    pub fn report_path(&self) -> PathBuf {
        self.out_dir.join(REPORT_FILE)
    }

    fn write_all(
        &self,
        staging: &Path,
        tables: &Tables,
        report: &VerificationReport,
    ) -> Result<Vec<PathBuf>> {
        let tables: Vec<&EntityTable> = tables.values().collect();
        let mut staged = tables
            .par_iter()
            .map(|t| -> Result<PathBuf> {
                let path = staging.join(file_name(t));
                write_table(t, &path)?;
                Ok(path)
            })
            .collect::<Result<Vec<_>>>()?;

        let report_path = staging.join(REPORT_FILE);
        write_report(report, &report_path)?;
        staged.push(report_path);
        Ok(staged)
    }
}

fn file_name(table: &EntityTable) -> String {
    format!("{}.parquet", table.entity.slug())
}

impl ExportSink for ParquetSink {
    #[instrument(level = "info", skip_all, fields(dir = %self.out_dir.display()))]
    fn export(&self, tables: &Tables, report: &VerificationReport) -> Result<()> {
        fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("creating output directory {:?}", self.out_dir))?;
        let staging = self
            .out_dir
            .join(format!(".staging-{}", Utc::now().timestamp_micros()));
        fs::create_dir_all(&staging).with_context(|| format!("creating {:?}", staging))?;

        let staged = match self.write_all(&staging, tables, report) {
            Ok(staged) => staged,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        };

        let published = match self.publish(&staged) {
            Ok(published) => published,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        };
        fs::remove_dir_all(&staging).with_context(|| format!("removing {:?}", staging))?;
        for dest in &published {
            info!(path = %dest.display(), "wrote");
        }
        Ok(())
    }
}

impl ParquetSink {
    /// Move staged files into the output directory. On failure the files
    /// already moved are removed again, so nothing of this run is left.
    fn publish(&self, staged: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut published = Vec::with_capacity(staged.len());
        for path in staged {
            let moved = path
                .file_name()
                .context("staged file has no name")
                .map(|name| self.out_dir.join(name))
                .and_then(|dest| {
                    fs::rename(path, &dest)
                        .with_context(|| format!("renaming {:?} -> {:?}", path, dest))?;
                    Ok(dest)
                });
            match moved {
                Ok(dest) => published.push(dest),
                Err(e) => {
                    for dest in &published {
                        if let Err(rm) = fs::remove_file(dest) {
                            warn!(path = %dest.display(), error = %rm, "could not roll back");
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(published)
    }
}

fn table_schema(table: &EntityTable) -> Schema {
    let fields = vec![
        Field::new("year", DataType::Int32, false),
        Field::new(Metric::InstalledCapacity.column_name(), DataType::Float64, true),
        Field::new(Metric::NetProduction.column_name(), DataType::Float64, true),
    ];
    let metadata = HashMap::from([("entity".to_string(), table.entity_name().to_string())]);
    Schema::new(fields).with_metadata(metadata)
}

/// Write one entity table as a single Snappy-compressed row group.
pub fn write_table(table: &EntityTable, path: &Path) -> Result<()> {
    let schema = Arc::new(table_schema(table));

    let years: Vec<i32> = table.years().collect();
    let capacity: Vec<Option<f64>> = table.rows().map(|(_, r)| r.installed_capacity).collect();
    let production: Vec<Option<f64>> = table.rows().map(|(_, r)| r.net_production).collect();

    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int32Array::from(years)),
        Arc::new(Float64Array::from(capacity)),
        Arc::new(Float64Array::from(production)),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns)
        .with_context(|| format!("building record batch for {}", table.entity))?;

    let file = File::create(path).with_context(|| format!("creating {:?}", path))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer =
        ArrowWriter::try_new(file, schema, Some(props)).context("creating Arrow writer")?;
    writer.write(&batch).context("writing batch")?;
    writer.close().context("closing writer")?;
    Ok(())
}

#[derive(Serialize)]
struct ReportFile<'a> {
    generated_at: DateTime<Utc>,
    all_passed: bool,
    #[serde(flatten)]
    report: &'a VerificationReport,
}

fn write_report(report: &VerificationReport, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {:?}", path))?;
    let body = ReportFile {
        generated_at: Utc::now(),
        all_passed: report.all_passed(),
        report,
    };
    serde_json::to_writer_pretty(file, &body).context("serializing verification report")?;
    Ok(())
}
