//! Green-view index layers: per-point samples and the per-road DGVI table.

use std::fmt;
use std::str::FromStr;

use geo::Point;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, RoadId};

/// Calendar month a greenness layer belongs to, rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Month {
    pub year: u16,
    pub month: u8,
}

impl Month {
    pub fn new(year: u16, month: u8) -> Result<Self, Error> {
        if !(1..=12).contains(&month) {
            return Err(Error::InvalidInput(format!(
                "month out of range: {year:04}-{month:02}"
            )));
        }
        Ok(Self { year, month })
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Month {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || Error::InvalidInput(format!("malformed month {s:?}, expected YYYY-MM"));
        let (year, month) = s.split_once('-').ok_or_else(malformed)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(malformed());
        }
        let year: u16 = year.parse().map_err(|_| malformed())?;
        let month: u8 = month.parse().map_err(|_| malformed())?;
        Month::new(year, month)
    }
}

impl Serialize for Month {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Month {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One street-level greenness sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GviPoint {
    pub id: i64,
    pub geometry: Point<f64>,
    pub month: Month,
    /// Fraction of the visual field occupied by vegetation, roughly [0, 1].
    pub value: f64,
}

/// Accumulated greenness of one road edge for one month.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RoadDgvi {
    pub road_id: RoadId,
    pub month: Month,
    pub dgvi: f64,
    /// Min-max normalization over all rows of the same month, in [0, 1].
    pub dgvi_normalized: f64,
}

/// Aggregates over one month of the DGVI table.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DgviStats {
    pub month: Month,
    pub road_count: usize,
    pub min_dgvi: f64,
    pub max_dgvi: f64,
    pub mean_dgvi: f64,
}

#[cfg(test)]
mod tests {
    use super::Month;

    #[test]
    fn month_round_trips_through_display() {
        let month: Month = "2025-08".parse().unwrap();
        assert_eq!(month.to_string(), "2025-08");
        assert_eq!(month, Month::new(2025, 8).unwrap());
    }

    #[test]
    fn month_rejects_malformed_input() {
        for bad in ["2025", "2025-13", "25-08", "2025-8", "aaaa-bb", "2025-08-01"] {
            assert!(bad.parse::<Month>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn month_orders_chronologically() {
        let earlier: Month = "2024-11".parse().unwrap();
        let later: Month = "2025-04".parse().unwrap();
        assert!(earlier < later);
    }
}
