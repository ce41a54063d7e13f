// src/process/table.rs

use serde::{Deserialize, Serialize};
use std::collections::{btree_map::Entry, BTreeMap};
use tracing::{debug, instrument, warn};

use super::normalize::NormalizedRow;
use super::resolve::{Entity, Metric, Resolver};

/// What to do with a year that carries only one of the two metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialRowPolicy {
    /// Keep the year; the missing metric stays absent.
    Keep,
    /// Exclude any year that lacks either metric.
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableOptions {
    pub partial_rows: PartialRowPolicy,
    /// Years before this are discarded.
    pub min_year: Option<i32>,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            partial_rows: PartialRowPolicy::Keep,
            min_year: None,
        }
    }
}

/// Both metrics for one year. `None` is an explicit absence, never zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct YearRow {
    pub installed_capacity: Option<f64>,
    pub net_production: Option<f64>,
}

impl YearRow {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::InstalledCapacity => self.installed_capacity,
            Metric::NetProduction => self.net_production,
        }
    }

    pub fn is_complete(&self) -> bool {
        Metric::ALL.iter().all(|m| self.get(*m).is_some())
    }

    fn from_row(row: &NormalizedRow) -> Self {
        Self {
            installed_capacity: row.metric(Metric::InstalledCapacity),
            net_production: row.metric(Metric::NetProduction),
        }
    }
}

/// Year-indexed series for one entity. Years are unique and iterate in
/// ascending order.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityTable {
    pub entity: Entity,
    rows: BTreeMap<i32, YearRow>,
}

impl EntityTable {
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            rows: BTreeMap::new(),
        }
    }

    pub fn entity_name(&self) -> &'static str {
        self.entity.name()
    }

    pub fn rows(&self) -> impl Iterator<Item = (i32, &YearRow)> + '_ {
        self.rows.iter().map(|(y, r)| (*y, r))
    }

    pub fn years(&self) -> impl Iterator<Item = i32> + '_ {
        self.rows.keys().copied()
    }

    pub fn row(&self, year: i32) -> Option<&YearRow> {
        self.rows.get(&year)
    }

    /// The cell at (year, metric); `None` if the year is missing or the
    /// value is absent.
    pub fn value(&self, year: i32, metric: Metric) -> Option<f64> {
        self.rows.get(&year).and_then(|r| r.get(metric))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn year_range(&self) -> Option<(i32, i32)> {
        Some((*self.rows.keys().next()?, *self.rows.keys().next_back()?))
    }

    /// Insert or overwrite a year; returns the previous row, if any.
    pub fn insert(&mut self, year: i32, row: YearRow) -> Option<YearRow> {
        self.rows.insert(year, row)
    }
}

pub type Tables = BTreeMap<Entity, EntityTable>;

/// Group rows by entity and pivot each group into a year-indexed table.
///
/// Every tracked entity gets a table, possibly empty. No year is fabricated.
/// Duplicate (entity, year) rows resolve last-write-wins with a warning; the
/// partial-row policy applies to the surviving row.
#[instrument(level = "info", skip_all, fields(rows = rows.len()))]
pub fn build(rows: &[NormalizedRow], resolver: &Resolver, opts: &TableOptions) -> Tables {
    let mut tables: Tables = Entity::ALL
        .iter()
        .map(|e| (*e, EntityTable::new(*e)))
        .collect();

    for row in rows {
        let Some(entity) = resolver.entity(&row.entity_id) else {
            debug!(entity_id = %row.entity_id, "Skipping row of untracked source");
            continue;
        };
        if opts.min_year.is_some_and(|min| row.year < min) {
            continue;
        }

        let year_row = YearRow::from_row(row);
        let table = tables.entry(entity).or_insert_with(|| EntityTable::new(entity));
        match table.rows.entry(row.year) {
            Entry::Vacant(v) => {
                v.insert(year_row);
            }
            Entry::Occupied(mut o) => {
                warn!(
                    %entity,
                    year = row.year,
                    previous = ?o.get(),
                    replacement = ?year_row,
                    "Duplicate row; keeping the later one"
                );
                o.insert(year_row);
            }
        }
    }

    // only after duplicates are settled, so a later partial row still wins
    if opts.partial_rows == PartialRowPolicy::Drop {
        for table in tables.values_mut() {
            let entity = table.entity;
            table.rows.retain(|year, r| {
                let keep = r.is_complete();
                if !keep {
                    debug!(%entity, year = *year, "Dropping partial row");
                }
                keep
            });
        }
    }

    for table in tables.values() {
        match table.year_range() {
            Some((first, last)) => {
                debug!(entity = %table.entity, years = table.len(), first, last, "Built table")
            }
            None => warn!(entity = %table.entity, "No data for entity"),
        }
    }

    tables
}
