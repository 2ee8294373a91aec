//! Static transit entities and the transient departure record.

use chrono::{DateTime, Utc};
use geo::Point;
use serde::{Deserialize, Serialize};

use crate::{DirectionCode, LineId, SiteId, StopPointId};

/// Identifier of a single scheduled vehicle run; stable across the run.
pub type JourneyId = i64;

/// User-facing stop aggregate ("Odenplan"), containing one or more platforms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub geometry: Point<f64>,
    pub name: String,
}

/// A single platform with a direction, belonging to exactly one site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopPoint {
    pub id: StopPointId,
    pub site_id: SiteId,
    pub geometry: Point<f64>,
    pub name: String,
    pub direction_code: DirectionCode,
}

/// Oriented successor relation between stop points of one (line, direction),
/// pre-extracted from historical departure observations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopSequenceEdge {
    pub line_id: LineId,
    pub direction_code: DirectionCode,
    pub stop_point_id: StopPointId,
    pub next_stop_point_id: StopPointId,
    /// One journey that was observed traversing this hop.
    pub journey_sample: JourneyId,
    pub sequence_order: u32,
}

/// Live departure forecast at a stop point, as reported by the feed.
#[derive(Debug, Clone)]
pub struct Departure {
    pub journey_id: JourneyId,
    pub line_id: LineId,
    pub designation: String,
    pub direction_code: DirectionCode,
    pub expected: DateTime<Utc>,
    pub stop_point_id: StopPointId,
    pub stop_point_name: String,
    pub destination: String,
}

/// Site annotated with the straight-line distance from a query point.
#[derive(Debug, Clone, Serialize)]
pub struct NearbySite {
    pub id: SiteId,
    pub name: String,
    pub geometry: Point<f64>,
    pub walking_distance_m: f64,
}

/// Successor of a stop point on one (line, direction).
#[derive(Debug, Clone)]
pub struct NextStop {
    pub stop_point_id: StopPointId,
    pub site_id: SiteId,
    pub name: String,
}

/// A target site reached by walking the stop sequence forward, with the stop
/// point through which the sequence enters it and the hop count needed.
#[derive(Debug, Clone)]
pub struct ReachableSite {
    pub site_id: SiteId,
    pub entry_stop_point: StopPointId,
    pub hops: usize,
}
