//! Visualization enrichment of surviving routes.
//!
//! Bus rides get their road geometry reconstructed by pure-length search
//! between the endpoint stops, and the ordered intermediate stop names for
//! display. Enrichment failures leave the segment bare; the chord between
//! the stops is rendered instead.

use log::{debug, warn};

use super::RoutePlanner;
use crate::feed::TransitFeed;
use crate::model::{RoutePlan, Segment};
use crate::solver;
use crate::store::SpatialStore;
use crate::{CancelToken, Result};

pub(super) async fn enrich_routes<S: SpatialStore, F: TransitFeed>(
    planner: &RoutePlanner<S, F>,
    routes: &mut [RoutePlan],
    cancel: &CancelToken,
) -> Result<()> {
    for route in routes.iter_mut() {
        cancel.check()?;
        for segment in route.segments.iter_mut() {
            let Segment::BusRide(ride) = segment else {
                continue;
            };
            match solver::ride_geometry(planner.store(), ride.from.geometry, ride.to.geometry)
                .await
            {
                Ok(Some(path)) => {
                    ride.geometry = Some(path.geometry);
                    ride.edge_ids = path.edge_ids;
                }
                Ok(None) => debug!(
                    "no road path between stops {} and {}",
                    ride.from.stop_point_id, ride.to.stop_point_id
                ),
                Err(err) => warn!("ride geometry reconstruction failed: {err}"),
            }
            match planner
                .store()
                .stops_along(
                    ride.line.id,
                    ride.line.direction_code,
                    ride.from.stop_point_id,
                    ride.to.stop_point_id,
                    planner.config().stops_along_depth,
                )
                .await
            {
                Ok(stops) => {
                    ride.intermediate_stops = stops.into_iter().map(|stop| stop.name).collect();
                }
                Err(err) => warn!("intermediate stop enumeration failed: {err}"),
            }
        }
    }
    Ok(())
}
