// src/process/resolve.rs

//! Static mapping from the dataset's opaque codes and column names to the
//! entities and metrics we publish.
//!
//! The dataset exposes several near-synonymous columns per metric
//! (weather-normalised vs. raw production, capacity at several snapshots).
//! Picking the wrong one yields plausible but wrong figures, so the choice is
//! pinned here and checked against the 2023 reference figures in the tests
//! below. Nothing is guessed at runtime.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};
use tracing::{info, warn};

use crate::error::SchemaError;
use crate::fetch::RawRecord;
use crate::process::period::year_from_period;
use crate::verify::ReferenceEntry;

/// A tracked energy source; one output table each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Entity {
    Solar,
    OnshoreWind,
    OffshoreWind,
}

impl Entity {
    /// Output order of the tables.
    pub const ALL: [Entity; 3] = [Entity::Solar, Entity::OnshoreWind, Entity::OffshoreWind];

    pub fn name(&self) -> &'static str {
        match self {
            Entity::Solar => "Solar",
            Entity::OnshoreWind => "Onshore Wind",
            Entity::OffshoreWind => "Offshore Wind",
        }
    }

    /// File-name friendly form.
    pub fn slug(&self) -> &'static str {
        match self {
            Entity::Solar => "solar",
            Entity::OnshoreWind => "onshore_wind",
            Entity::OffshoreWind => "offshore_wind",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Metric {
    /// Electrical capacity at the end of the year, MW.
    InstalledCapacity,
    /// Net electricity production, not weather-normalised, mln kWh.
    NetProduction,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::InstalledCapacity, Metric::NetProduction];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::InstalledCapacity => "Installed Capacity (MW)",
            Metric::NetProduction => "Net Production (mln kWh)",
        }
    }

    pub fn column_name(&self) -> &'static str {
        match self {
            Metric::InstalledCapacity => "installed_capacity_mw",
            Metric::NetProduction => "net_production_mln_kwh",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Dataset column names the pipeline reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    pub source: &'static str,
    pub period: &'static str,
    pub capacity: &'static str,
    pub production: &'static str,
}

impl ColumnMap {
    pub fn metric(&self, metric: Metric) -> &'static str {
        match metric {
            Metric::InstalledCapacity => self.capacity,
            Metric::NetProduction => self.production,
        }
    }

    /// Every column a record must carry.
    pub fn required(&self) -> [&'static str; 4] {
        [self.source, self.period, self.production, self.capacity]
    }
}

/// Column set of dataset 82610ENG, validated against the published figures.
pub const COLUMN_MAP: ColumnMap = ColumnMap {
    source: "EnergySourcesTechniques",
    period: "Periods",
    capacity: "ElectricalCapacityEndOfYear_8",
    production: "NetProductionOfElectricity_3",
};

/// Source codes (after trimming) and their published labels.
pub const SOURCE_KEYS: [(&str, Entity); 6] = [
    ("E006590", Entity::Solar),
    ("E006637", Entity::OnshoreWind),
    ("E006638", Entity::OffshoreWind),
    ("Solar photovoltaic", Entity::Solar),
    ("Wind energy: onshore", Entity::OnshoreWind),
    ("Wind energy: offshore", Entity::OffshoreWind),
];

#[derive(Debug, Clone)]
pub struct Resolver {
    columns: ColumnMap,
    keys: &'static [(&'static str, Entity)],
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(COLUMN_MAP, &SOURCE_KEYS)
    }
}

impl Resolver {
    pub fn new(columns: ColumnMap, keys: &'static [(&'static str, Entity)]) -> Self {
        Self { columns, keys }
    }

    pub fn columns(&self) -> &ColumnMap {
        &self.columns
    }

    /// Entity for a raw source code; `None` for sources we don't track.
    pub fn entity(&self, code: &str) -> Option<Entity> {
        let code = code.trim();
        self.keys
            .iter()
            .find(|(k, _)| *k == code)
            .map(|(_, e)| *e)
    }

    /// The primary (code) key pinned for `entity`.
    pub fn code_for(&self, entity: Entity) -> Option<&'static str> {
        self.keys.iter().find(|(_, e)| *e == entity).map(|(k, _)| *k)
    }

    /// Fail fast if any record lacks a required column. A null value is
    /// fine; a missing key means the payload does not have the column.
    pub fn check_payload(&self, records: &[RawRecord]) -> Result<(), SchemaError> {
        if records.is_empty() {
            return Err(SchemaError::EmptyPayload);
        }
        for (index, record) in records.iter().enumerate() {
            if let Some(column) = self
                .columns
                .required()
                .into_iter()
                .find(|c| !record.contains_key(*c))
            {
                return Err(SchemaError::MissingColumn {
                    column: column.to_string(),
                    index,
                });
            }
        }
        Ok(())
    }
}

/// Which raw source codes carry an entity's reference figures for a year.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyAudit {
    pub entity: Entity,
    pub pinned: Option<&'static str>,
    pub matched: Vec<String>,
}

impl KeyAudit {
    pub fn agrees(&self) -> bool {
        matches!((self.pinned, self.matched.as_slice()), (Some(p), [m]) if p == m)
    }
}

/// Re-derive the source code of every entity by matching `year`'s reference
/// figures against all raw records, and compare with the pinned keys.
///
/// Diagnostic only: disagreement is logged, the pinned table still wins.
pub fn audit_source_keys(
    resolver: &Resolver,
    records: &[RawRecord],
    references: &[ReferenceEntry],
    year: i32,
) -> Vec<KeyAudit> {
    let cols = resolver.columns();
    let mut audits = Vec::new();

    for entity in Entity::ALL {
        let wanted: BTreeMap<Metric, f64> = references
            .iter()
            .filter(|r| r.entity == entity && r.year == year)
            .map(|r| (r.metric, r.expected_value))
            .collect();
        if wanted.is_empty() {
            continue;
        }

        let mut matched: Vec<String> = records
            .iter()
            .filter(|rec| {
                rec.get(cols.period)
                    .and_then(|v| v.as_str())
                    .and_then(|p| year_from_period(p).ok())
                    == Some(year)
            })
            .filter(|rec| {
                wanted.iter().all(|(metric, expected)| {
                    rec.get(cols.metric(*metric)).and_then(|v| v.as_f64()) == Some(*expected)
                })
            })
            .filter_map(|rec| rec.get(cols.source).and_then(|v| v.as_str()))
            .map(|code| code.trim().to_string())
            .collect();
        matched.sort();
        matched.dedup();

        let audit = KeyAudit {
            entity,
            pinned: resolver.code_for(entity),
            matched,
        };
        if audit.agrees() {
            info!(%entity, code = ?audit.pinned, year, "Source key confirmed by reference figures");
        } else {
            warn!(%entity, pinned = ?audit.pinned, matched = ?audit.matched, year, "Source key disagrees with reference figures");
        }
        audits.push(audit);
    }

    audits
}
