//! Shortest-path front end over the spatial store.
//!
//! Resolves arbitrary query points to graph vertices and runs the store's
//! edge-path search under a caller-supplied cost. A missing nearest vertex or
//! an unreachable target is a quiet `None`; the caller decides what degrades.

use geo::Point;
use log::debug;

use crate::store::{CostExpr, EdgePath, SpatialStore};
use crate::Result;

/// Walking path between two arbitrary points, snapped to the road graph.
pub async fn walking_path<S: SpatialStore>(
    store: &S,
    origin: Point<f64>,
    destination: Point<f64>,
    cost: &CostExpr,
) -> Result<Option<EdgePath>> {
    let Some(from) = store.nearest_vertex(origin).await? else {
        debug!("no graph vertex near origin ({}, {})", origin.x(), origin.y());
        return Ok(None);
    };
    let Some(to) = store.nearest_vertex(destination).await? else {
        debug!(
            "no graph vertex near destination ({}, {})",
            destination.x(),
            destination.y()
        );
        return Ok(None);
    };
    store.shortest_edge_path(from, to, cost).await
}

/// Road path a bus ride follows between two stop locations, found by pure
/// metric length. Display only: its greenness never enters a route total.
pub async fn ride_geometry<S: SpatialStore>(
    store: &S,
    from_stop: Point<f64>,
    to_stop: Point<f64>,
) -> Result<Option<EdgePath>> {
    walking_path(store, from_stop, to_stop, &CostExpr::Length).await
}
