// src/verify/reference.rs

//! Published figures for 2022–2024, in dataset units: production in
//! mln kWh, capacity in MW at year end.

use super::ReferenceEntry;
use crate::process::{Entity, Metric};

use crate::process::Entity::{OffshoreWind, OnshoreWind, Solar};
use crate::process::Metric::{InstalledCapacity as Cap, NetProduction as Prod};

const fn entry(entity: Entity, year: i32, metric: Metric, expected_value: f64) -> ReferenceEntry {
    ReferenceEntry {
        entity,
        year,
        metric,
        expected_value,
    }
}

pub static REFERENCE_SET: [ReferenceEntry; 18] = [
    entry(OnshoreWind, 2022, Prod, 13134.0),
    entry(OnshoreWind, 2022, Cap, 6131.0),
    entry(OnshoreWind, 2023, Prod, 17482.0),
    entry(OnshoreWind, 2023, Cap, 6692.0),
    entry(OnshoreWind, 2024, Prod, 17657.0),
    entry(OnshoreWind, 2024, Cap, 6955.0),
    entry(OffshoreWind, 2022, Prod, 7936.0),
    entry(OffshoreWind, 2022, Cap, 2570.0),
    entry(OffshoreWind, 2023, Prod, 11553.0),
    entry(OffshoreWind, 2023, Cap, 4110.0),
    entry(OffshoreWind, 2024, Prod, 15182.0),
    entry(OffshoreWind, 2024, Cap, 4748.0),
    entry(Solar, 2022, Prod, 16657.0),
    entry(Solar, 2022, Cap, 17356.0),
    entry(Solar, 2023, Prod, 19607.0),
    entry(Solar, 2023, Cap, 21957.0),
    entry(Solar, 2024, Prod, 21822.0),
    entry(Solar, 2024, Cap, 24772.0),
];

/// Entries for one year.
pub fn for_year(year: i32) -> impl Iterator<Item = &'static ReferenceEntry> {
    REFERENCE_SET.iter().filter(move |r| r.year == year)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn one_entry_per_cell() {
        let cells: HashSet<_> = REFERENCE_SET
            .iter()
            .map(|r| (r.entity, r.year, r.metric))
            .collect();
        assert_eq!(cells.len(), Entity::ALL.len() * 3 * Metric::ALL.len());
    }

    #[test]
    fn figures_for_2023() {
        let got: Vec<_> = for_year(2023)
            .map(|r| (r.entity, r.metric, r.expected_value))
            .collect();
        assert_eq!(got.len(), 6);
        assert!(got.contains(&(OnshoreWind, Prod, 17482.0)));
        assert!(got.contains(&(OnshoreWind, Cap, 6692.0)));
        assert!(got.contains(&(OffshoreWind, Prod, 11553.0)));
        assert!(got.contains(&(OffshoreWind, Cap, 4110.0)));
        assert!(got.contains(&(Solar, Prod, 19607.0)));
        assert!(got.contains(&(Solar, Cap, 21957.0)));
    }
}
