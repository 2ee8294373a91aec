//! Bus candidate discovery.
//!
//! Direct itineraries come from journey correlation: a journey id observed at
//! an origin site and again at a destination site on the same (line,
//! direction) is a seat-through ride. One-transfer itineraries come from a
//! virtual passenger per origin departure, ridden forward along the stop
//! sequence with an average inter-stop time, changing buses where a second
//! departure reaches a destination site.

use std::time::Duration;

use chrono::{DateTime, Utc};
use geo::{Distance, Haversine};
use hashbrown::{HashMap, HashSet};
use log::{debug, warn};

use super::{PlanRequest, Preferences, RoutePlanner};
use crate::dgvi;
use crate::feed::TransitFeed;
use crate::model::{
    BusRideSegment, BusWaitingSegment, Departure, IntraSiteTransfer, JourneyId, LineRef, Month,
    NearbySite, NextStop, RoutePlan, RouteType, Segment, StopPoint, StopRef, TransferWait,
    WalkingSegment,
};
use crate::solver;
use crate::store::{CostExpr, EdgePath, SpatialStore};
use crate::{CancelToken, DirectionCode, LineId, Result, SiteId, StopPointId};

/// Global bound on emitted transfer itineraries per request.
const MAX_TRANSFER_EMISSIONS: usize = 20;
/// Bound on emitted transfer itineraries per virtual passenger.
const MAX_EMISSIONS_PER_AGENT: usize = 2;
/// Candidates kept for DGVI scoring, by earliest arrival.
const SCORED_BUS_CANDIDATES: usize = 5;

pub(super) async fn bus_candidates<S: SpatialStore, F: TransitFeed>(
    planner: &RoutePlanner<S, F>,
    request: &PlanRequest,
    month: Month,
    cancel: &CancelToken,
) -> Result<Vec<RoutePlan>> {
    let config = planner.config();
    let origin = request.origin.point();
    let destination = request.destination.point();
    let radius = config.max_walking_distance();

    let origin_sites = planner
        .store
        .sites_within_and_nearest(origin, radius, 3)
        .await?;
    let destination_sites = planner
        .store
        .sites_within_and_nearest(destination, radius, 3)
        .await?;
    if origin_sites.is_empty() || destination_sites.is_empty() {
        debug!("no candidate sites around one of the endpoints");
        return Ok(Vec::new());
    }
    cancel.check()?;

    // One paced batch over the site union, origin sites first.
    let mut batch_sites: Vec<SiteId> = Vec::new();
    for site in origin_sites.iter().chain(destination_sites.iter()) {
        if !batch_sites.contains(&site.id) {
            batch_sites.push(site.id);
        }
    }
    let pacing = Duration::from_millis(config.api_delay_ms);
    let batch = planner
        .feed
        .batch_departures(&batch_sites, config.forecast_seconds, pacing)
        .await;
    cancel.check()?;

    let now = Utc::now();
    let mut candidates = direct_candidates(planner, &origin_sites, &destination_sites, &batch, now);
    debug!("{} direct candidates", candidates.len());

    let mut cache = DepartureCache::new(&planner.feed, config.forecast_seconds, pacing, batch);
    let transfers = transfer_candidates(
        planner,
        &origin_sites,
        &destination_sites,
        &mut cache,
        now,
        cancel,
    )
    .await?;
    debug!("{} transfer candidates", transfers.len());
    candidates.extend(transfers);

    let avg_hop_s = i64::from(config.transfer_inter_stop_avg);
    candidates.sort_by_key(|candidate| candidate.ride_arrival(avg_hop_s));
    candidates.truncate(SCORED_BUS_CANDIDATES);
    cancel.check()?;

    let mut plans = Vec::new();
    let mut direct_count = 0usize;
    let mut transfer_count = 0usize;
    for candidate in candidates {
        let assembled = match candidate {
            BusCandidate::Direct(direct) => {
                direct_count += 1;
                assemble_direct(planner, request, month, direct, now, direct_count).await
            }
            BusCandidate::Transfer(transfer) => {
                transfer_count += 1;
                assemble_transfer(planner, request, month, transfer, now, transfer_count).await
            }
        };
        match assembled {
            Ok(Some(mut plan)) => {
                plan.total_acdgvi = waiting_total(planner, &plan, month).await;
                plans.push(plan);
            }
            Ok(None) => {}
            Err(err) => warn!("bus candidate assembly failed: {err}"),
        }
    }
    Ok(plans)
}

/// A direct ride: the same journey observed at both ends.
struct DirectCandidate {
    boarding: Departure,
    alighting: Departure,
}

/// A one-transfer ride found by forward simulation.
struct TransferCandidate {
    first: Departure,
    /// Estimated arrival at the transfer stop.
    transfer_arrival: DateTime<Utc>,
    /// Stop point where the passenger leaves the first bus.
    alight_stop: StopPoint,
    second: Departure,
    /// Hops the second bus needs to enter a destination site.
    second_hops: usize,
    /// Stop point through which the second bus enters that site.
    destination_entry: StopPointId,
}

enum BusCandidate {
    Direct(DirectCandidate),
    Transfer(TransferCandidate),
}

impl BusCandidate {
    fn ride_arrival(&self, avg_hop_s: i64) -> DateTime<Utc> {
        match self {
            BusCandidate::Direct(c) => c.alighting.expected,
            BusCandidate::Transfer(c) => {
                c.second.expected + chrono::Duration::seconds(avg_hop_s * c.second_hops as i64)
            }
        }
    }
}

/// Can the passenger walk to the stop and still make the departure, with the
/// configured margin of slack?
fn boarding_feasible<S, F>(
    planner: &RoutePlanner<S, F>,
    site: &NearbySite,
    boarding: &Departure,
    now: DateTime<Utc>,
) -> bool {
    let config = planner.config();
    let walk_s = site.walking_distance_m / config.walking_speed;
    let lead_s = (boarding.expected - now).num_seconds() as f64;
    walk_s + f64::from(config.transfer_margin) <= lead_s
}

fn direct_candidates<S: SpatialStore, F: TransitFeed>(
    planner: &RoutePlanner<S, F>,
    origin_sites: &[NearbySite],
    destination_sites: &[NearbySite],
    batch: &HashMap<SiteId, Vec<Departure>>,
    now: DateTime<Utc>,
) -> Vec<BusCandidate> {
    let config = planner.config();

    // Journeys observed at an origin site; the nearest site wins a journey
    // that calls at several of them.
    let mut observed: HashMap<JourneyId, (&NearbySite, &Departure)> = HashMap::new();
    for site in origin_sites {
        let Some(departures) = batch.get(&site.id) else {
            continue;
        };
        for departure in departures {
            observed.entry(departure.journey_id).or_insert((site, departure));
        }
    }

    let mut taken: HashSet<JourneyId> = HashSet::new();
    let mut candidates = Vec::new();
    for site in destination_sites {
        let Some(departures) = batch.get(&site.id) else {
            continue;
        };
        for alighting in departures {
            let Some(&(origin_site, boarding)) = observed.get(&alighting.journey_id) else {
                continue;
            };
            if boarding.line_id != alighting.line_id
                || boarding.direction_code != alighting.direction_code
                || boarding.stop_point_id == alighting.stop_point_id
            {
                continue;
            }
            if !boarding_feasible(planner, origin_site, boarding, now) {
                continue;
            }
            let ride_s = (alighting.expected - boarding.expected).num_seconds();
            if ride_s <= 0 || ride_s > i64::from(config.bus_search_max_duration) {
                continue;
            }
            if !taken.insert(alighting.journey_id) {
                continue;
            }
            candidates.push(BusCandidate::Direct(DirectCandidate {
                boarding: boarding.clone(),
                alighting: alighting.clone(),
            }));
        }
    }
    candidates
}

/// Request-scoped departure cache for the transfer search, keyed by site id.
/// A miss costs one paced feed call.
struct DepartureCache<'a, F> {
    feed: &'a F,
    forecast_s: u32,
    pacing: Duration,
    entries: HashMap<SiteId, Vec<Departure>>,
}

impl<'a, F: TransitFeed> DepartureCache<'a, F> {
    fn new(
        feed: &'a F,
        forecast_s: u32,
        pacing: Duration,
        seed: HashMap<SiteId, Vec<Departure>>,
    ) -> Self {
        Self {
            feed,
            forecast_s,
            pacing,
            entries: seed,
        }
    }

    async fn get(&mut self, site: SiteId) -> &[Departure] {
        if !self.entries.contains_key(&site) {
            tokio::time::sleep(self.pacing).await;
            let departures = self.feed.departures(site, self.forecast_s).await;
            self.entries.insert(site, departures);
        }
        self.entries
            .get(&site)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

async fn transfer_candidates<S: SpatialStore, F: TransitFeed>(
    planner: &RoutePlanner<S, F>,
    origin_sites: &[NearbySite],
    destination_sites: &[NearbySite],
    cache: &mut DepartureCache<'_, F>,
    now: DateTime<Utc>,
    cancel: &CancelToken,
) -> Result<Vec<BusCandidate>> {
    let config = planner.config();
    let destination_ids: Vec<SiteId> = destination_sites.iter().map(|s| s.id).collect();
    let avg_hop_s = i64::from(config.transfer_inter_stop_avg);

    // Request-scoped lookup caches; transient feed data never outlives the
    // request.
    let mut next_cache: HashMap<(LineId, DirectionCode, StopPointId), Option<NextStop>> =
        HashMap::new();
    let mut stop_cache: HashMap<StopPointId, Option<StopPoint>> = HashMap::new();

    let mut emitted: Vec<BusCandidate> = Vec::new();
    'agents: for site in origin_sites {
        let boardings = cache.get(site.id).await.to_vec();
        for boarding in boardings {
            if !boarding_feasible(planner, site, &boarding, now) {
                continue;
            }
            let mut agent_emissions = 0usize;
            let mut current = boarding.stop_point_id;
            let mut eta = boarding.expected;

            for _hop in 1..=config.transfer_search_depth {
                cancel.check()?;
                let Some(next) = lookup_next(
                    planner,
                    &mut next_cache,
                    boarding.line_id,
                    boarding.direction_code,
                    current,
                )
                .await?
                else {
                    break;
                };
                eta += chrono::Duration::seconds(avg_hop_s);
                current = next.stop_point_id;

                let departures = cache.get(next.site_id).await.to_vec();
                let mut last_scanned: Option<(StopPointId, DirectionCode)> = None;
                for second in departures {
                    let key = (second.stop_point_id, second.direction_code);
                    if last_scanned == Some(key) {
                        continue;
                    }
                    last_scanned = Some(key);

                    if second.journey_id == boarding.journey_id {
                        continue;
                    }
                    if second.line_id == boarding.line_id
                        && second.direction_code == boarding.direction_code
                    {
                        continue;
                    }
                    let Some(alight_stop) =
                        lookup_stop(planner, &mut stop_cache, current).await?
                    else {
                        continue;
                    };
                    // The margin must also cover the walk between platforms
                    // when the second bus leaves from a different stop point.
                    let mut earliest =
                        eta + chrono::Duration::seconds(i64::from(config.transfer_margin));
                    if second.stop_point_id != alight_stop.id {
                        let Some(second_stop) =
                            lookup_stop(planner, &mut stop_cache, second.stop_point_id).await?
                        else {
                            continue;
                        };
                        let walk_s = Haversine
                            .distance(alight_stop.geometry, second_stop.geometry)
                            / config.walking_speed;
                        earliest += chrono::Duration::seconds(walk_s.ceil() as i64);
                    }
                    if second.expected < earliest {
                        continue;
                    }

                    let reachable = planner
                        .store
                        .reachable_sites(
                            second.line_id,
                            second.direction_code,
                            second.stop_point_id,
                            &destination_ids,
                            config.destination_search_depth,
                        )
                        .await?;
                    let Some(hit) = reachable.first() else {
                        continue;
                    };
                    let ride2_s = avg_hop_s * hit.hops as i64;
                    if ride2_s > i64::from(config.bus_search_max_duration) {
                        continue;
                    }

                    emitted.push(BusCandidate::Transfer(TransferCandidate {
                        first: boarding.clone(),
                        transfer_arrival: eta,
                        alight_stop,
                        second: second.clone(),
                        second_hops: hit.hops,
                        destination_entry: hit.entry_stop_point,
                    }));
                    agent_emissions += 1;
                    if emitted.len() >= MAX_TRANSFER_EMISSIONS {
                        debug!("transfer search hit the global emission bound");
                        break 'agents;
                    }
                    if agent_emissions >= MAX_EMISSIONS_PER_AGENT {
                        break;
                    }
                }
                if agent_emissions >= MAX_EMISSIONS_PER_AGENT {
                    break;
                }
            }
        }
    }
    Ok(emitted)
}

async fn lookup_next<S: SpatialStore, F>(
    planner: &RoutePlanner<S, F>,
    cache: &mut HashMap<(LineId, DirectionCode, StopPointId), Option<NextStop>>,
    line: LineId,
    direction: DirectionCode,
    stop: StopPointId,
) -> Result<Option<NextStop>> {
    if let Some(entry) = cache.get(&(line, direction, stop)) {
        return Ok(entry.clone());
    }
    let next = planner.store.next_stop(line, direction, stop).await?;
    cache.insert((line, direction, stop), next.clone());
    Ok(next)
}

async fn lookup_stop<S: SpatialStore, F>(
    planner: &RoutePlanner<S, F>,
    cache: &mut HashMap<StopPointId, Option<StopPoint>>,
    stop: StopPointId,
) -> Result<Option<StopPoint>> {
    if let Some(entry) = cache.get(&stop) {
        return Ok(entry.clone());
    }
    let found = planner.store.stop_point(stop).await?;
    cache.insert(stop, found.clone());
    Ok(found)
}

fn user_cost(month: Month, preferences: Preferences) -> CostExpr {
    CostExpr::Weighted {
        month,
        w_time: preferences.time,
        w_green: preferences.green,
    }
}

fn stop_ref(stop: &StopPoint) -> StopRef {
    StopRef {
        stop_point_id: stop.id,
        site_id: stop.site_id,
        name: stop.name.clone(),
        geometry: stop.geometry,
    }
}

fn line_ref(departure: &Departure) -> LineRef {
    LineRef {
        id: departure.line_id,
        designation: departure.designation.clone(),
        direction_code: departure.direction_code,
    }
}

fn walking_segment(path: EdgePath, walking_speed: f64) -> Segment {
    Segment::Walking(WalkingSegment {
        duration_s: path.length_m / walking_speed,
        distance_m: path.length_m,
        edge_ids: path.edge_ids,
        geometry: path.geometry,
        intra_site: None,
    })
}

async fn assemble_direct<S: SpatialStore, F: TransitFeed>(
    planner: &RoutePlanner<S, F>,
    request: &PlanRequest,
    month: Month,
    candidate: DirectCandidate,
    now: DateTime<Utc>,
    ordinal: usize,
) -> Result<Option<RoutePlan>> {
    let store = planner.store();
    let config = planner.config();
    let Some(board_stop) = store.stop_point(candidate.boarding.stop_point_id).await? else {
        return Ok(None);
    };
    let Some(alight_stop) = store.stop_point(candidate.alighting.stop_point_id).await? else {
        return Ok(None);
    };

    let origin = request.origin.point();
    let destination = request.destination.point();
    let cost = user_cost(month, request.preferences);
    let Some(access) = solver::walking_path(store, origin, board_stop.geometry, &cost).await?
    else {
        return Ok(None);
    };
    let Some(egress) =
        solver::walking_path(store, alight_stop.geometry, destination, &cost).await?
    else {
        return Ok(None);
    };

    let access_s = access.length_m / config.walking_speed;
    let lead_s = (candidate.boarding.expected - now).num_seconds() as f64;
    let waiting_s = (lead_s - access_s).max(0.0);
    let ride_s = (candidate.alighting.expected - candidate.boarding.expected).num_seconds() as f64;

    let line = line_ref(&candidate.boarding);
    let segments = vec![
        walking_segment(access, config.walking_speed),
        Segment::BusWaiting(BusWaitingSegment {
            duration_s: waiting_s,
            stop: stop_ref(&board_stop),
            line: line.clone(),
            expected_departure: candidate.boarding.expected,
            transfer: None,
        }),
        Segment::BusRide(BusRideSegment {
            duration_s: ride_s,
            from: stop_ref(&board_stop),
            to: stop_ref(&alight_stop),
            line,
            expected_departure: candidate.boarding.expected,
            expected_arrival: candidate.alighting.expected,
            geometry: None,
            edge_ids: Vec::new(),
            intermediate_stops: Vec::new(),
            approximate: false,
        }),
        walking_segment(egress, config.walking_speed),
    ];
    Ok(Some(RoutePlan::new(
        format!("direct-bus-{ordinal}"),
        RouteType::DirectBus,
        origin,
        destination,
        segments,
        month,
    )))
}

async fn assemble_transfer<S: SpatialStore, F: TransitFeed>(
    planner: &RoutePlanner<S, F>,
    request: &PlanRequest,
    month: Month,
    candidate: TransferCandidate,
    now: DateTime<Utc>,
    ordinal: usize,
) -> Result<Option<RoutePlan>> {
    let store = planner.store();
    let config = planner.config();
    let Some(board_stop) = store.stop_point(candidate.first.stop_point_id).await? else {
        return Ok(None);
    };
    let Some(second_stop) = store.stop_point(candidate.second.stop_point_id).await? else {
        return Ok(None);
    };
    let Some(exit_stop) = store.stop_point(candidate.destination_entry).await? else {
        return Ok(None);
    };

    let origin = request.origin.point();
    let destination = request.destination.point();
    let cost = user_cost(month, request.preferences);
    let Some(access) = solver::walking_path(store, origin, board_stop.geometry, &cost).await?
    else {
        return Ok(None);
    };
    let Some(egress) = solver::walking_path(store, exit_stop.geometry, destination, &cost).await?
    else {
        return Ok(None);
    };

    let access_s = access.length_m / config.walking_speed;
    let lead_s = (candidate.first.expected - now).num_seconds() as f64;
    let waiting1_s = (lead_s - access_s).max(0.0);
    let ride1_s = (candidate.transfer_arrival - candidate.first.expected).num_seconds() as f64;

    let first_line = line_ref(&candidate.first);
    let second_line = line_ref(&candidate.second);
    let avg_hop_s = i64::from(config.transfer_inter_stop_avg);
    let ride2_arrival = candidate.second.expected
        + chrono::Duration::seconds(avg_hop_s * candidate.second_hops as i64);
    let ride2_s = (ride2_arrival - candidate.second.expected).num_seconds() as f64;

    let mut segments = vec![
        walking_segment(access, config.walking_speed),
        Segment::BusWaiting(BusWaitingSegment {
            duration_s: waiting1_s,
            stop: stop_ref(&board_stop),
            line: first_line.clone(),
            expected_departure: candidate.first.expected,
            transfer: None,
        }),
        Segment::BusRide(BusRideSegment {
            duration_s: ride1_s,
            from: stop_ref(&board_stop),
            to: stop_ref(&candidate.alight_stop),
            line: first_line.clone(),
            expected_departure: candidate.first.expected,
            expected_arrival: candidate.transfer_arrival,
            geometry: None,
            edge_ids: Vec::new(),
            intermediate_stops: Vec::new(),
            approximate: true,
        }),
    ];

    // Platform change inside the transfer site, when the second bus leaves
    // from a different stop point.
    let margin_s = (candidate.second.expected - candidate.transfer_arrival).num_seconds() as f64;
    let mut intra_walk_s = 0.0;
    let intra_site_walk = candidate.alight_stop.id != second_stop.id;
    let intra_distance_m = if intra_site_walk {
        let distance_m = Haversine.distance(candidate.alight_stop.geometry, second_stop.geometry);
        intra_walk_s = distance_m / config.walking_speed;
        distance_m
    } else {
        0.0
    };
    let waiting2_s = margin_s - intra_walk_s;
    if waiting2_s < 0.0 {
        // The rider cannot reach the other platform before the second bus
        // leaves.
        debug!(
            "transfer at stop {} misses the connection by {:.0} s",
            candidate.alight_stop.id, -waiting2_s
        );
        return Ok(None);
    }
    if intra_site_walk {
        segments.push(Segment::Walking(WalkingSegment {
            duration_s: intra_walk_s,
            distance_m: intra_distance_m,
            edge_ids: Vec::new(),
            geometry: geo::LineString::from(vec![
                (
                    candidate.alight_stop.geometry.x(),
                    candidate.alight_stop.geometry.y(),
                ),
                (second_stop.geometry.x(), second_stop.geometry.y()),
            ]),
            intra_site: Some(IntraSiteTransfer {
                from_stop: candidate.alight_stop.id,
                to_stop: second_stop.id,
                site_id: second_stop.site_id,
            }),
        }));
    }

    segments.push(Segment::BusWaiting(BusWaitingSegment {
        duration_s: waiting2_s,
        stop: stop_ref(&second_stop),
        line: second_line.clone(),
        expected_departure: candidate.second.expected,
        transfer: Some(TransferWait {
            waiting_s: waiting2_s,
            from_line: first_line,
            to_line: second_line.clone(),
            intra_site_walk,
            margin_s,
        }),
    }));
    segments.push(Segment::BusRide(BusRideSegment {
        duration_s: ride2_s,
        from: stop_ref(&second_stop),
        to: stop_ref(&exit_stop),
        line: second_line,
        expected_departure: candidate.second.expected,
        expected_arrival: ride2_arrival,
        geometry: None,
        edge_ids: Vec::new(),
        intermediate_stops: Vec::new(),
        approximate: true,
    }));
    segments.push(walking_segment(egress, config.walking_speed));

    Ok(Some(RoutePlan::new(
        format!("transfer-bus-{ordinal}"),
        RouteType::TransferBus,
        origin,
        destination,
        segments,
        month,
    )))
}

/// Accumulated DGVI of a bus route: the waiting buffers only.
async fn waiting_total<S: SpatialStore, F>(
    planner: &RoutePlanner<S, F>,
    plan: &RoutePlan,
    month: Month,
) -> f64 {
    let mut total = 0.0;
    for segment in &plan.segments {
        if let Segment::BusWaiting(wait) = segment {
            total += dgvi::waiting_dgvi(planner.store(), wait.stop.geometry, month).await;
        }
    }
    total
}
