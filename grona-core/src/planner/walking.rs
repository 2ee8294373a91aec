//! Walking candidate generation under the three preference strategies.

use hashbrown::HashSet;
use log::{debug, warn};

use super::{PlanRequest, Preferences, RoutePlanner};
use crate::dgvi;
use crate::feed::TransitFeed;
use crate::model::{Month, RoutePlan, RouteType, Segment, WalkingSegment};
use crate::solver;
use crate::store::{CostExpr, EdgePath, SpatialStore};
use crate::{CancelToken, Result, RoadId};

/// Runs the user, ASAP and GROOT strategies, deduplicates by edge
/// fingerprint and keeps the first two survivors in that priority order.
pub(super) async fn walking_candidates<S: SpatialStore, F: TransitFeed>(
    planner: &RoutePlanner<S, F>,
    request: &PlanRequest,
    month: Month,
    cancel: &CancelToken,
) -> Result<Vec<RoutePlan>> {
    let origin = request.origin.point();
    let destination = request.destination.point();
    cancel.check()?;

    let solve = |preferences: Preferences| {
        let cost = CostExpr::Weighted {
            month,
            w_time: preferences.time,
            w_green: preferences.green,
        };
        async move { solver::walking_path(planner.store(), origin, destination, &cost).await }
    };
    let (user, asap, groot) = tokio::join!(
        solve(request.preferences),
        solve(Preferences::ASAP),
        solve(Preferences::GROOT),
    );
    cancel.check()?;

    let mut plans: Vec<RoutePlan> = Vec::with_capacity(2);
    let mut seen: HashSet<Vec<RoadId>> = HashSet::new();
    for (label, outcome) in [("user", user), ("asap", asap), ("groot", groot)] {
        let path = match outcome {
            Ok(Some(path)) => path,
            Ok(None) => {
                debug!("walking strategy {label}: no path");
                continue;
            }
            Err(err) => {
                warn!("walking strategy {label} failed: {err}");
                continue;
            }
        };
        let mut fingerprint = path.edge_ids.clone();
        fingerprint.sort_unstable();
        if !seen.insert(fingerprint) {
            debug!("walking strategy {label}: duplicate of an earlier strategy");
            continue;
        }

        let total_acdgvi = dgvi::walking_dgvi(planner.store(), &path.edge_ids, month).await;
        let mut plan = build_plan(planner, request, month, path, plans.len() + 1);
        plan.total_acdgvi = total_acdgvi;
        plans.push(plan);
        if plans.len() == 2 {
            break;
        }
    }
    Ok(plans)
}

fn build_plan<S, F>(
    planner: &RoutePlanner<S, F>,
    request: &PlanRequest,
    month: Month,
    path: EdgePath,
    ordinal: usize,
) -> RoutePlan {
    let duration_s = path.length_m / planner.config.walking_speed;
    let segment = Segment::Walking(WalkingSegment {
        duration_s,
        distance_m: path.length_m,
        edge_ids: path.edge_ids,
        geometry: path.geometry,
        intra_site: None,
    });
    RoutePlan::new(
        format!("walking-{ordinal}"),
        RouteType::Walking,
        request.origin.point(),
        request.destination.point(),
        vec![segment],
        month,
    )
}
