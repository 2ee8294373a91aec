//! Route plans assembled per planning request.
//!
//! A plan is an ordered list of tagged segments plus scoring fields filled in
//! after ranking. Segment sequencing follows fixed rules: a bus waiting
//! segment immediately precedes a ride on the same stop point and line, and
//! two walks may only neighbour each other when one is an intra-site
//! transfer.

use chrono::{DateTime, Utc};
use geo::{LineString, Point};
use geojson::{Feature, FeatureCollection, Geometry};
use serde::Serialize;
use serde_json::json;

use crate::model::Month;
use crate::{DirectionCode, LineId, RoadId, SiteId, StopPointId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteType {
    Walking,
    DirectBus,
    TransferBus,
}

impl RouteType {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteType::Walking => "walking",
            RouteType::DirectBus => "direct_bus",
            RouteType::TransferBus => "transfer_bus",
        }
    }
}

/// Line identity carried on waiting and ride segments.
#[derive(Debug, Clone)]
pub struct LineRef {
    pub id: LineId,
    pub designation: String,
    pub direction_code: DirectionCode,
}

/// Stop point identity and location carried on segments.
#[derive(Debug, Clone)]
pub struct StopRef {
    pub stop_point_id: StopPointId,
    pub site_id: SiteId,
    pub name: String,
    pub geometry: Point<f64>,
}

/// Walk between two platforms of the same site during a transfer.
#[derive(Debug, Clone)]
pub struct IntraSiteTransfer {
    pub from_stop: StopPointId,
    pub to_stop: StopPointId,
    pub site_id: SiteId,
}

#[derive(Debug, Clone)]
pub struct WalkingSegment {
    pub duration_s: f64,
    pub distance_m: f64,
    pub edge_ids: Vec<RoadId>,
    pub geometry: LineString<f64>,
    pub intra_site: Option<IntraSiteTransfer>,
}

/// Transfer annotation on the waiting segment before the second ride.
#[derive(Debug, Clone)]
pub struct TransferWait {
    pub waiting_s: f64,
    pub from_line: LineRef,
    pub to_line: LineRef,
    pub intra_site_walk: bool,
    pub margin_s: f64,
}

#[derive(Debug, Clone)]
pub struct BusWaitingSegment {
    pub duration_s: f64,
    pub stop: StopRef,
    pub line: LineRef,
    pub expected_departure: DateTime<Utc>,
    pub transfer: Option<TransferWait>,
}

#[derive(Debug, Clone)]
pub struct BusRideSegment {
    pub duration_s: f64,
    pub from: StopRef,
    pub to: StopRef,
    pub line: LineRef,
    pub expected_departure: DateTime<Utc>,
    pub expected_arrival: DateTime<Utc>,
    /// Reconstructed road geometry, display only. Its greenness is never
    /// accumulated into the route total: passengers on a moving bus do not
    /// perceive the streetscape.
    pub geometry: Option<LineString<f64>>,
    pub edge_ids: Vec<RoadId>,
    pub intermediate_stops: Vec<String>,
    /// Timing rests on the average inter-stop estimate rather than the feed.
    pub approximate: bool,
}

#[derive(Debug, Clone)]
pub enum Segment {
    Walking(WalkingSegment),
    BusWaiting(BusWaitingSegment),
    BusRide(BusRideSegment),
}

impl Segment {
    pub fn duration_s(&self) -> f64 {
        match self {
            Segment::Walking(walk) => walk.duration_s,
            Segment::BusWaiting(wait) => wait.duration_s,
            Segment::BusRide(ride) => ride.duration_s,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Segment::Walking(_) => "walking",
            Segment::BusWaiting(_) => "bus_waiting",
            Segment::BusRide(_) => "bus_ride",
        }
    }
}

/// One candidate journey between the requested origin and destination.
#[derive(Debug, Clone)]
pub struct RoutePlan {
    pub id: String,
    pub route_type: RouteType,
    pub origin: Point<f64>,
    pub destination: Point<f64>,
    pub segments: Vec<Segment>,
    pub total_duration_s: f64,
    pub month: Month,
    /// Accumulated DGVI; filled by scoring.
    pub total_acdgvi: f64,
    pub duration_score: f64,
    pub acdgvi_score: f64,
    pub total_score: f64,
}

impl RoutePlan {
    pub fn new(
        id: String,
        route_type: RouteType,
        origin: Point<f64>,
        destination: Point<f64>,
        segments: Vec<Segment>,
        month: Month,
    ) -> Self {
        let total_duration_s = segments.iter().map(Segment::duration_s).sum();
        Self {
            id,
            route_type,
            origin,
            destination,
            segments,
            total_duration_s,
            month,
            total_acdgvi: 0.0,
            duration_score: 0.0,
            acdgvi_score: 0.0,
            total_score: 0.0,
        }
    }

    /// Sorted concatenation of all walking edge ids; two walking routes with
    /// equal fingerprints traverse the same streets.
    pub fn edge_fingerprint(&self) -> Vec<RoadId> {
        let mut ids: Vec<RoadId> = self
            .segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Walking(walk) => Some(walk.edge_ids.iter().copied()),
                _ => None,
            })
            .flatten()
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn ride_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::BusRide(_)))
            .count()
    }

    /// Wall-clock arrival of the last timed segment, when any exists.
    pub fn final_arrival(&self) -> Option<DateTime<Utc>> {
        let mut arrival = None;
        let mut trailing_walk_s = 0.0;
        for segment in &self.segments {
            match segment {
                Segment::BusRide(ride) => {
                    arrival = Some(ride.expected_arrival);
                    trailing_walk_s = 0.0;
                }
                Segment::Walking(walk) if arrival.is_some() => trailing_walk_s += walk.duration_s,
                _ => {}
            }
        }
        arrival.map(|at| at + chrono::Duration::seconds(trailing_walk_s.round() as i64))
    }

    pub fn to_api(&self) -> ApiRoutePlan {
        ApiRoutePlan {
            route_id: self.id.clone(),
            route_type: self.route_type,
            total_duration: self.total_duration_s.round() as u64,
            duration_score: self.duration_score,
            acdgvi_score: self.acdgvi_score,
            total_acdgvi: self.total_acdgvi,
            total_score: self.total_score,
            gvi_data_month: self.month.to_string(),
            summary: self.summary(),
            instructions: self.instructions(),
            timing_details: self.timing_details(),
            transfer_summary: self.transfer_summary(),
            geojson: self.to_geojson(),
            segments: self.segments.iter().map(segment_json).collect(),
        }
    }

    fn summary(&self) -> String {
        match self.route_type {
            RouteType::Walking => {
                let meters: f64 = self
                    .segments
                    .iter()
                    .filter_map(|s| match s {
                        Segment::Walking(w) => Some(w.distance_m),
                        _ => None,
                    })
                    .sum();
                format!(
                    "Walk {:.0} m ({})",
                    meters,
                    minutes(self.total_duration_s)
                )
            }
            RouteType::DirectBus | RouteType::TransferBus => {
                let lines: Vec<String> = self
                    .segments
                    .iter()
                    .filter_map(|s| match s {
                        Segment::BusRide(ride) => Some(ride.line.designation.clone()),
                        _ => None,
                    })
                    .collect();
                format!(
                    "Bus {} ({})",
                    lines.join(" then "),
                    minutes(self.total_duration_s)
                )
            }
        }
    }

    fn instructions(&self) -> Vec<String> {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Walking(walk) => match &walk.intra_site {
                    Some(_) => format!(
                        "Walk to the connecting platform ({})",
                        minutes(walk.duration_s)
                    ),
                    None => format!(
                        "Walk {:.0} m ({})",
                        walk.distance_m,
                        minutes(walk.duration_s)
                    ),
                },
                Segment::BusWaiting(wait) => format!(
                    "Wait at {} for bus {} ({})",
                    wait.stop.name,
                    wait.line.designation,
                    minutes(wait.duration_s)
                ),
                Segment::BusRide(ride) => format!(
                    "Take bus {} from {} to {} ({})",
                    ride.line.designation,
                    ride.from.name,
                    ride.to.name,
                    minutes(ride.duration_s)
                ),
            })
            .collect()
    }

    fn timing_details(&self) -> Vec<String> {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Walking(walk) => {
                    format!("walking: {:.0} s", walk.duration_s)
                }
                Segment::BusWaiting(wait) => format!(
                    "waiting at {}: {:.0} s, departure {}",
                    wait.stop.name,
                    wait.duration_s,
                    wait.expected_departure.format("%H:%M:%S")
                ),
                Segment::BusRide(ride) => format!(
                    "bus {}: {} -> {}{}",
                    ride.line.designation,
                    ride.expected_departure.format("%H:%M:%S"),
                    ride.expected_arrival.format("%H:%M:%S"),
                    if ride.approximate { " (estimated)" } else { "" }
                ),
            })
            .collect()
    }

    fn transfer_summary(&self) -> Option<String> {
        self.segments.iter().find_map(|segment| match segment {
            Segment::BusWaiting(wait) => wait.transfer.as_ref().map(|transfer| {
                format!(
                    "Change from bus {} to bus {} at {} ({:.0} s margin)",
                    transfer.from_line.designation,
                    transfer.to_line.designation,
                    wait.stop.name,
                    transfer.margin_s
                )
            }),
            _ => None,
        })
    }

    /// Renders every segment as a `GeoJSON` feature for the map client.
    pub fn to_geojson(&self) -> FeatureCollection {
        let features = self
            .segments
            .iter()
            .enumerate()
            .map(|(idx, segment)| segment_feature(segment, idx))
            .collect();
        FeatureCollection {
            features,
            bbox: None,
            foreign_members: None,
        }
    }
}

/// API projection of a route plan, as the web layer serializes it.
#[derive(Debug, Clone, Serialize)]
pub struct ApiRoutePlan {
    pub route_id: String,
    pub route_type: RouteType,
    pub total_duration: u64,
    pub duration_score: f64,
    pub acdgvi_score: f64,
    pub total_acdgvi: f64,
    pub total_score: f64,
    pub gvi_data_month: String,
    pub summary: String,
    pub instructions: Vec<String>,
    pub timing_details: Vec<String>,
    pub transfer_summary: Option<String>,
    pub geojson: FeatureCollection,
    pub segments: Vec<serde_json::Value>,
}

fn minutes(seconds: f64) -> String {
    let mins = (seconds / 60.0).round() as i64;
    if mins <= 1 {
        "1 min".to_string()
    } else {
        format!("{mins} min")
    }
}

fn segment_feature(segment: &Segment, idx: usize) -> Feature {
    let value = match segment {
        Segment::Walking(walk) => json!({
            "type": "Feature",
            "geometry": Geometry::new((&walk.geometry).into()),
            "properties": {
                "segment_type": "walking",
                "segment_index": idx,
                "duration": walk.duration_s.round(),
                "distance": walk.distance_m,
                "intra_site_transfer": walk.intra_site.is_some(),
            }
        }),
        Segment::BusWaiting(wait) => json!({
            "type": "Feature",
            "geometry": Geometry::new((&wait.stop.geometry).into()),
            "properties": {
                "segment_type": "bus_waiting",
                "segment_index": idx,
                "duration": wait.duration_s.round(),
                "stop_name": wait.stop.name,
                "line": wait.line.designation,
                "expected_departure": wait.expected_departure.to_rfc3339(),
            }
        }),
        Segment::BusRide(ride) => {
            // Fall back to the straight stop-to-stop chord until enrichment
            // has reconstructed the road geometry.
            let line = ride.geometry.clone().unwrap_or_else(|| {
                LineString::from(vec![
                    (ride.from.geometry.x(), ride.from.geometry.y()),
                    (ride.to.geometry.x(), ride.to.geometry.y()),
                ])
            });
            json!({
                "type": "Feature",
                "geometry": Geometry::new((&line).into()),
                "properties": {
                    "segment_type": "bus_ride",
                    "segment_index": idx,
                    "duration": ride.duration_s.round(),
                    "line": ride.line.designation,
                    "from_name": ride.from.name,
                    "to_name": ride.to.name,
                    "departure": ride.expected_departure.to_rfc3339(),
                    "arrival": ride.expected_arrival.to_rfc3339(),
                    "approximate": ride.approximate,
                }
            })
        }
    };
    Feature::from_json_value(value).expect("segment feature is well-formed")
}

fn segment_json(segment: &Segment) -> serde_json::Value {
    match segment {
        Segment::Walking(walk) => json!({
            "kind": "walking",
            "duration": walk.duration_s.round(),
            "distance": walk.distance_m,
            "edge_ids": walk.edge_ids,
            "intra_site_transfer": walk.intra_site.as_ref().map(|t| json!({
                "from_stop_point": t.from_stop,
                "to_stop_point": t.to_stop,
                "site_id": t.site_id,
            })),
        }),
        Segment::BusWaiting(wait) => json!({
            "kind": "bus_waiting",
            "duration": wait.duration_s.round(),
            "stop_point_id": wait.stop.stop_point_id,
            "site_id": wait.stop.site_id,
            "stop_name": wait.stop.name,
            "line": wait.line.designation,
            "expected_departure": wait.expected_departure.to_rfc3339(),
            "transfer": wait.transfer.as_ref().map(|t| json!({
                "waiting": t.waiting_s.round(),
                "from_line": t.from_line.designation,
                "to_line": t.to_line.designation,
                "intra_site_walk": t.intra_site_walk,
                "margin": t.margin_s,
            })),
        }),
        Segment::BusRide(ride) => json!({
            "kind": "bus_ride",
            "duration": ride.duration_s.round(),
            "from_stop_point": ride.from.stop_point_id,
            "to_stop_point": ride.to.stop_point_id,
            "line_id": ride.line.id,
            "direction_code": ride.line.direction_code,
            "designation": ride.line.designation,
            "expected_departure": ride.expected_departure.to_rfc3339(),
            "expected_arrival": ride.expected_arrival.to_rfc3339(),
            "intermediate_stops": ride.intermediate_stops,
            "edge_ids": ride.edge_ids,
            "approximate": ride.approximate,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::line_string;

    fn walk(ids: &[RoadId], duration_s: f64) -> Segment {
        Segment::Walking(WalkingSegment {
            duration_s,
            distance_m: duration_s * 1.4,
            edge_ids: ids.to_vec(),
            geometry: line_string![(x: 18.05, y: 59.34), (x: 18.06, y: 59.35)],
            intra_site: None,
        })
    }

    #[test]
    fn total_duration_is_the_segment_sum() {
        let plan = RoutePlan::new(
            "walking-1".into(),
            RouteType::Walking,
            Point::new(18.05, 59.34),
            Point::new(18.06, 59.35),
            vec![walk(&[3, 1], 120.0), walk(&[2], 60.0)],
            "2025-08".parse().unwrap(),
        );
        assert!((plan.total_duration_s - 180.0).abs() < 1.0);
    }

    #[test]
    fn fingerprint_is_sorted_and_keeps_duplicates() {
        let plan = RoutePlan::new(
            "walking-1".into(),
            RouteType::Walking,
            Point::new(18.05, 59.34),
            Point::new(18.06, 59.35),
            vec![walk(&[3, 1], 60.0), walk(&[3], 60.0)],
            "2025-08".parse().unwrap(),
        );
        assert_eq!(plan.edge_fingerprint(), vec![1, 3, 3]);
    }

    #[test]
    fn api_projection_carries_one_feature_per_segment() {
        let plan = RoutePlan::new(
            "walking-1".into(),
            RouteType::Walking,
            Point::new(18.05, 59.34),
            Point::new(18.06, 59.35),
            vec![walk(&[1], 90.0)],
            "2025-08".parse().unwrap(),
        );
        let api = plan.to_api();
        assert_eq!(api.geojson.features.len(), 1);
        assert_eq!(api.segments.len(), 1);
        assert_eq!(api.total_duration, 90);
        assert!(api.transfer_summary.is_none());
    }
}
