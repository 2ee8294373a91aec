//! End-to-end planning flows over a synthetic street ladder.
//!
//! Two parallel north-south streets connected by rungs: the west street is
//! bare, the east street is leafy. Bus line 4 runs along the west street
//! through sites A, B and C; line 72 connects site B to site C from a second
//! platform. Departures are scripted per test.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use geo::{line_string, Point};
use hashbrown::HashMap;

use grona_core::model::{
    Departure, GviPoint, RoadEdge, RoadVertex, RouteType, Segment, Site, StopPoint,
    StopSequenceEdge,
};
use grona_core::prelude::*;

const MONTH: &str = "2025-08";

const SITE_A: SiteId = 1000;
const SITE_B: SiteId = 1001;
const SITE_C: SiteId = 1002;

const STOP_A: StopPointId = 5001;
const STOP_B_LINE4: StopPointId = 5002;
const STOP_B_LINE72: StopPointId = 5003;
const STOP_C: StopPointId = 5004;
const STOP_B_FAR: StopPointId = 5005;

const LINE_4: LineId = 4;
const LINE_72: LineId = 72;
const LINE_73: LineId = 73;

fn month() -> Month {
    MONTH.parse().unwrap()
}

fn vertex(id: VertexId, lon: f64, lat: f64) -> RoadVertex {
    RoadVertex {
        id,
        geometry: Point::new(lon, lat),
    }
}

fn edge(
    id: RoadId,
    source: VertexId,
    target: VertexId,
    length_m: f64,
    from: (f64, f64),
    to: (f64, f64),
) -> RoadEdge {
    RoadEdge {
        id,
        geometry: line_string![(x: from.0, y: from.1), (x: to.0, y: to.1)],
        length_m,
        length_norm: 0.0,
        source,
        target,
    }
}

fn gvi(id: i64, lon: f64, lat: f64, value: f64) -> GviPoint {
    GviPoint {
        id,
        geometry: Point::new(lon, lat),
        month: month(),
        value,
    }
}

fn stop(id: StopPointId, site_id: SiteId, lon: f64, lat: f64, name: &str) -> StopPoint {
    StopPoint {
        id,
        site_id,
        geometry: Point::new(lon, lat),
        name: name.to_string(),
        direction_code: 1,
    }
}

fn sequence(
    line_id: LineId,
    stop_point_id: StopPointId,
    next_stop_point_id: StopPointId,
    sequence_order: u32,
) -> StopSequenceEdge {
    StopSequenceEdge {
        line_id,
        direction_code: 1,
        stop_point_id,
        next_stop_point_id,
        journey_sample: 9000,
        sequence_order,
    }
}

/// The ladder: west street at lon 18.050, east street at lon 18.054,
/// rungs every 0.002 degrees of latitude from 59.340 to 59.350.
fn snapshot() -> StoreSnapshot {
    let mut vertices = Vec::new();
    let mut edges = Vec::new();
    let mut gvi_points = Vec::new();
    let mut next_gvi = 1;
    for i in 0..=5i64 {
        let lat = 59.340 + 0.002 * i as f64;
        vertices.push(vertex(100 + i, 18.050, lat));
        vertices.push(vertex(200 + i, 18.054, lat));
        // Rung between the streets.
        edges.push(edge(
            30 + i,
            100 + i,
            200 + i,
            228.0,
            (18.050, lat),
            (18.054, lat),
        ));
        gvi_points.push(gvi(next_gvi, 18.052, lat, 0.5));
        next_gvi += 1;
        if i < 5 {
            let next_lat = lat + 0.002;
            edges.push(edge(
                10 + i,
                100 + i,
                101 + i,
                222.0,
                (18.050, lat),
                (18.050, next_lat),
            ));
            edges.push(edge(
                20 + i,
                200 + i,
                201 + i,
                222.0,
                (18.054, lat),
                (18.054, next_lat),
            ));
            gvi_points.push(gvi(next_gvi, 18.050, lat + 0.001, 0.2));
            next_gvi += 1;
            gvi_points.push(gvi(next_gvi, 18.054, lat + 0.001, 0.9));
            next_gvi += 1;
        }
    }

    StoreSnapshot {
        vertices,
        edges,
        sites: vec![
            Site {
                id: SITE_A,
                geometry: Point::new(18.050, 59.340),
                name: "Odenplan".into(),
            },
            Site {
                id: SITE_B,
                geometry: Point::new(18.050, 59.346),
                name: "Vasaplan".into(),
            },
            Site {
                id: SITE_C,
                geometry: Point::new(18.050, 59.350),
                name: "Haga norra".into(),
            },
        ],
        stop_points: vec![
            stop(STOP_A, SITE_A, 18.050, 59.340, "Odenplan"),
            stop(STOP_B_LINE4, SITE_B, 18.050, 59.346, "Vasaplan"),
            stop(STOP_B_LINE72, SITE_B, 18.0505, 59.346, "Vasaplan east"),
            stop(STOP_C, SITE_C, 18.050, 59.350, "Haga norra"),
            // The far platform of site B, a whole rung away on the east
            // street.
            stop(STOP_B_FAR, SITE_B, 18.054, 59.346, "Vasaplan far"),
        ],
        stop_sequences: vec![
            sequence(LINE_4, STOP_A, STOP_B_LINE4, 1),
            sequence(LINE_4, STOP_B_LINE4, STOP_C, 2),
            sequence(LINE_72, STOP_B_LINE72, STOP_C, 1),
            sequence(LINE_73, STOP_B_FAR, STOP_C, 1),
        ],
        gvi_points,
        dgvi: Vec::new(),
    }
}

async fn fixture_store() -> MemoryStore {
    let store = MemoryStore::build(snapshot(), 4).unwrap();
    rebuild_month(&store, month(), &CancelToken::new())
        .await
        .unwrap();
    store
}

fn test_config() -> PlannerConfig {
    PlannerConfig {
        api_delay_ms: 0,
        ..PlannerConfig::default()
    }
}

#[derive(Default)]
struct ScriptedFeed {
    departures: HashMap<SiteId, Vec<Departure>>,
    calls: Arc<Mutex<Vec<SiteId>>>,
}

impl ScriptedFeed {
    fn with(departures: HashMap<SiteId, Vec<Departure>>) -> Self {
        Self {
            departures,
            calls: Arc::default(),
        }
    }
}

impl TransitFeed for ScriptedFeed {
    async fn departures(&self, site: SiteId, _forecast_s: u32) -> Vec<Departure> {
        self.calls.lock().unwrap().push(site);
        self.departures.get(&site).cloned().unwrap_or_default()
    }
}

fn departure(
    journey_id: i64,
    line_id: LineId,
    designation: &str,
    stop_point_id: StopPointId,
    stop_name: &str,
    expected: DateTime<Utc>,
) -> Departure {
    Departure {
        journey_id,
        line_id,
        designation: designation.to_string(),
        direction_code: 1,
        expected,
        stop_point_id,
        stop_point_name: stop_name.to_string(),
        destination: "Terminus".to_string(),
    }
}

fn request(origin: (f64, f64), destination: (f64, f64), preferences: Preferences) -> PlanRequest {
    serde_json::from_value(serde_json::json!({
        "origin": {"lat": origin.0, "lon": origin.1},
        "destination": {"lat": destination.0, "lon": destination.1},
        "gvi_month": MONTH,
        "preferences": preferences,
    }))
    .unwrap()
}

fn bottom() -> (f64, f64) {
    (59.3401, 18.0501)
}

fn top() -> (f64, f64) {
    (59.3499, 18.0501)
}

fn segment_kinds(plan: &RoutePlan) -> Vec<&'static str> {
    plan.segments.iter().map(Segment::kind).collect()
}

fn assert_invariants(plan: &RoutePlan) {
    let sum: f64 = plan.segments.iter().map(Segment::duration_s).sum();
    assert!(
        (sum - plan.total_duration_s).abs() <= 1.0,
        "segment durations {sum} disagree with total {}",
        plan.total_duration_s
    );
    for pair in plan.segments.windows(2) {
        match (&pair[0], &pair[1]) {
            (Segment::BusWaiting(wait), Segment::BusRide(ride)) => {
                assert_eq!(wait.stop.stop_point_id, ride.from.stop_point_id);
                assert_eq!(wait.line.id, ride.line.id);
                assert_eq!(wait.line.direction_code, ride.line.direction_code);
            }
            (Segment::BusWaiting(_), other) => {
                panic!("bus waiting not followed by a ride but {}", other.kind())
            }
            (Segment::Walking(a), Segment::Walking(b)) => {
                assert!(
                    a.intra_site.is_some() || b.intra_site.is_some(),
                    "two plain walking segments in a row"
                );
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn fastest_walk_follows_the_bare_street() {
    let store = fixture_store().await;
    let planner = RoutePlanner::new(store, ScriptedFeed::default(), test_config());
    let routes = planner
        .plan(&request(bottom(), top(), Preferences::ASAP), &CancelToken::new())
        .await
        .unwrap();

    assert!(!routes.is_empty());
    let best = &routes[0];
    assert_eq!(best.route_type, RouteType::Walking);
    assert!(best.total_duration_s > 700.0 && best.total_duration_s < 900.0);
    assert_eq!(segment_kinds(best), vec!["walking"]);
    assert_eq!(best.edge_fingerprint(), vec![10, 11, 12, 13, 14]);
    assert_invariants(best);
}

#[tokio::test]
async fn green_preference_detours_along_the_leafy_street() {
    let store = fixture_store().await;
    let planner = RoutePlanner::new(store, ScriptedFeed::default(), test_config());
    let routes = planner
        .plan(&request(bottom(), top(), Preferences::GROOT), &CancelToken::new())
        .await
        .unwrap();

    assert!(routes.len() >= 2, "expected both strategies to survive");
    let green = &routes[0];
    let fast = &routes[1];
    assert_ne!(green.edge_fingerprint(), fast.edge_fingerprint());
    assert!(
        green.total_acdgvi >= fast.total_acdgvi,
        "green route accumulated {} vs {}",
        green.total_acdgvi,
        fast.total_acdgvi
    );
    // The detour crosses a rung, rides the east street, and crosses back.
    assert!(green.edge_fingerprint().iter().any(|id| (20..25).contains(id)));
}

#[tokio::test]
async fn correlated_journey_becomes_a_direct_bus_route() {
    let store = fixture_store().await;
    let now = Utc::now();
    let feed = ScriptedFeed::with(HashMap::from_iter([
        (
            SITE_A,
            vec![departure(
                9001,
                LINE_4,
                "4",
                STOP_A,
                "Odenplan",
                now + Duration::seconds(300),
            )],
        ),
        (SITE_B, Vec::new()),
        (
            SITE_C,
            vec![departure(
                9001,
                LINE_4,
                "4",
                STOP_C,
                "Haga norra",
                now + Duration::seconds(900),
            )],
        ),
    ]));
    let planner = RoutePlanner::new(store, feed, test_config());
    let routes = planner
        .plan(&request(bottom(), top(), Preferences::default()), &CancelToken::new())
        .await
        .unwrap();

    let bus: Vec<&RoutePlan> = routes
        .iter()
        .filter(|r| r.route_type == RouteType::DirectBus)
        .collect();
    assert_eq!(bus.len(), 1, "kinds: {:?}", routes.iter().map(|r| r.route_type).collect::<Vec<_>>());
    let plan = bus[0];
    assert_eq!(
        segment_kinds(plan),
        vec!["walking", "bus_waiting", "bus_ride", "walking"]
    );
    assert_invariants(plan);
    assert!((0.0..=1.0).contains(&plan.total_score));

    let Segment::BusRide(ride) = &plan.segments[2] else {
        panic!("expected a ride");
    };
    assert!((ride.duration_s - 600.0).abs() < 2.0);
    assert!(!ride.approximate);
    // Enrichment reconstructed the road path and named the middle stop.
    assert!(ride.geometry.is_some());
    assert!(!ride.edge_ids.is_empty());
    assert_eq!(ride.intermediate_stops, vec!["Vasaplan".to_string()]);
}

#[tokio::test]
async fn feed_outage_degrades_to_walking_only() {
    let store = fixture_store().await;
    let planner = RoutePlanner::new(store, ScriptedFeed::default(), test_config());
    let routes = planner
        .plan(&request(bottom(), top(), Preferences::default()), &CancelToken::new())
        .await
        .unwrap();

    assert!(!routes.is_empty());
    assert!(routes.iter().all(|r| r.route_type == RouteType::Walking));
}

#[tokio::test]
async fn one_transfer_itinerary_changes_buses_at_the_middle_site() {
    let store = fixture_store().await;
    let now = Utc::now();
    let feed = ScriptedFeed::with(HashMap::from_iter([
        (
            SITE_A,
            vec![departure(
                9001,
                LINE_4,
                "4",
                STOP_A,
                "Odenplan",
                now + Duration::seconds(120),
            )],
        ),
        (
            SITE_B,
            vec![departure(
                9100,
                LINE_72,
                "72",
                STOP_B_LINE72,
                "Vasaplan east",
                now + Duration::seconds(420),
            )],
        ),
        (SITE_C, Vec::new()),
    ]));
    let planner = RoutePlanner::new(store, feed, test_config());
    let routes = planner
        .plan(&request(bottom(), top(), Preferences::default()), &CancelToken::new())
        .await
        .unwrap();

    let transfer: Vec<&RoutePlan> = routes
        .iter()
        .filter(|r| r.route_type == RouteType::TransferBus)
        .collect();
    assert_eq!(transfer.len(), 1);
    let plan = transfer[0];
    assert_invariants(plan);
    assert_eq!(plan.ride_count(), 2);
    assert_eq!(
        segment_kinds(plan),
        vec![
            "walking",
            "bus_waiting",
            "bus_ride",
            "walking",
            "bus_waiting",
            "bus_ride",
            "walking",
        ]
    );

    // The platform change is an intra-site walk between the two rides.
    let Segment::Walking(intra) = &plan.segments[3] else {
        panic!("expected the intra-site walk");
    };
    let link = intra.intra_site.as_ref().expect("intra-site marker");
    assert_eq!(link.from_stop, STOP_B_LINE4);
    assert_eq!(link.to_stop, STOP_B_LINE72);
    assert_eq!(link.site_id, SITE_B);

    let Segment::BusRide(second) = &plan.segments[5] else {
        panic!("expected the second ride");
    };
    assert!(second.approximate);
    assert_eq!(second.to.stop_point_id, STOP_C);
    assert!(plan.to_api().transfer_summary.is_some());
    assert_eq!(plan.final_arrival(), Some(second.expected_arrival));
}

#[tokio::test]
async fn transfer_needing_an_unreachable_platform_is_rejected() {
    let store = fixture_store().await;
    let now = Utc::now();
    // The second bus leaves 70 s after the estimated arrival, which clears
    // the flat margin but not the ~160 s walk to the far platform.
    let feed = ScriptedFeed::with(HashMap::from_iter([
        (
            SITE_A,
            vec![departure(
                9001,
                LINE_4,
                "4",
                STOP_A,
                "Odenplan",
                now + Duration::seconds(120),
            )],
        ),
        (
            SITE_B,
            vec![departure(
                9200,
                LINE_73,
                "73",
                STOP_B_FAR,
                "Vasaplan far",
                now + Duration::seconds(280),
            )],
        ),
        (SITE_C, Vec::new()),
    ]));
    let planner = RoutePlanner::new(store, feed, test_config());
    let routes = planner
        .plan(&request(bottom(), top(), Preferences::default()), &CancelToken::new())
        .await
        .unwrap();

    assert!(routes.iter().all(|r| r.route_type == RouteType::Walking));
}

#[tokio::test]
async fn distant_origin_still_walks_but_never_rides() {
    let store = fixture_store().await;
    let now = Utc::now();
    let feed = ScriptedFeed::with(HashMap::from_iter([(
        SITE_A,
        vec![departure(
            9001,
            LINE_4,
            "4",
            STOP_A,
            "Odenplan",
            now + Duration::seconds(300),
        )]
    )]));
    let planner = RoutePlanner::new(store, feed, test_config());
    // Roughly ten kilometers south-west of the network.
    let routes = planner
        .plan(&request((59.25, 17.95), top(), Preferences::default()), &CancelToken::new())
        .await
        .unwrap();

    assert!(routes.iter().all(|r| r.route_type == RouteType::Walking));
}

#[tokio::test]
async fn batch_requests_preserve_site_order() {
    let store = fixture_store().await;
    let feed = ScriptedFeed::default();
    let calls = feed.calls.clone();
    let planner = RoutePlanner::new(store, feed, test_config());
    planner
        .plan(&request(bottom(), top(), Preferences::default()), &CancelToken::new())
        .await
        .unwrap();
    // Origin-side sites first, each nearest first, no duplicates.
    assert_eq!(*calls.lock().unwrap(), vec![SITE_A, SITE_B, SITE_C]);
}

#[tokio::test]
async fn cancelled_request_returns_cancelled() {
    let store = fixture_store().await;
    let planner = RoutePlanner::new(store, ScriptedFeed::default(), test_config());
    let cancel = CancelToken::new();
    cancel.cancel();
    let result = planner
        .plan(&request(bottom(), top(), Preferences::default()), &cancel)
        .await;
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[tokio::test]
async fn missing_month_is_rejected() {
    let store = fixture_store().await;
    let planner = RoutePlanner::new(store, ScriptedFeed::default(), test_config());
    let mut req = request(bottom(), top(), Preferences::default());
    req.gvi_month = Some("2019-01".parse().unwrap());
    let result = planner.plan(&req, &CancelToken::new()).await;
    assert!(matches!(result, Err(Error::NoDataForMonth(_))));
}
