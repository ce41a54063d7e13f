// src/process/mod.rs

//! Record normalisation, key/column resolution and table building.

pub mod normalize;
pub mod period;
pub mod resolve;
pub mod table;

pub use normalize::{normalize, normalize_all, NormalizeStats, NormalizedRow};
pub use period::year_from_period;
pub use resolve::{audit_source_keys, Entity, KeyAudit, Metric, Resolver, COLUMN_MAP};
pub use table::{build, EntityTable, PartialRowPolicy, TableOptions, Tables, YearRow};
