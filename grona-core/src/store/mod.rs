//! Read-mostly abstraction over the geospatial graph data.
//!
//! The engine never sees a query language; it consumes the typed operations
//! of [`SpatialStore`]. The production implementation is [`MemoryStore`], an
//! in-process store built from a loaded snapshot of the road network, the
//! greenness layers and the static transit tables.

pub mod memory;

pub use memory::{MemoryStore, StoreSnapshot};

use geo::LineString;

use crate::model::{
    DgviStats, GviPoint, Month, NearbySite, NextStop, ReachableSite, StopPoint,
};
use crate::{DirectionCode, LineId, Result, RoadId, SiteId, StopPointId, VertexId};

/// Per-edge traversal cost, evaluated by the store.
///
/// An explicit value rather than interpolated query text, so weights and the
/// month tag can never leak into a query surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CostExpr {
    /// `w_time · length_norm + w_green · (1 − dgvi_normalized)`, where a road
    /// without a DGVI row for the month counts as 0 greenness.
    Weighted {
        month: Month,
        w_time: f64,
        w_green: f64,
    },
    /// Pure metric length. Used to reconstruct the road path of a bus ride.
    Length,
}

/// Shortest-path result: edges in traversal order, the metric length of the
/// path (independent of the cost used to find it) and the stitched polyline.
#[derive(Debug, Clone)]
pub struct EdgePath {
    pub edge_ids: Vec<RoadId>,
    pub length_m: f64,
    pub geometry: LineString<f64>,
}

impl EdgePath {
    pub fn empty() -> Self {
        Self {
            edge_ids: Vec::new(),
            length_m: 0.0,
            geometry: LineString::new(Vec::new()),
        }
    }
}

/// Query surface of the geospatial store.
///
/// Every operation is a suspension point and draws a permit from the store's
/// bounded connection pool for its duration.
#[allow(async_fn_in_trait)]
pub trait SpatialStore {
    /// Graph vertex minimizing great-circle distance to the query point; ties
    /// broken by the smaller vertex id. `None` when the graph is empty.
    async fn nearest_vertex(&self, point: geo::Point<f64>) -> Result<Option<VertexId>>;

    /// Single-source single-target shortest path under the supplied cost,
    /// treating the road graph as undirected. `None` when either endpoint is
    /// unknown or no path exists. Equal endpoints yield an empty path.
    async fn shortest_edge_path(
        &self,
        from: VertexId,
        to: VertexId,
        cost: &CostExpr,
    ) -> Result<Option<EdgePath>>;

    /// Geometry and metric length of one road edge.
    async fn edge_geometry(&self, edge: RoadId) -> Result<Option<(LineString<f64>, f64)>>;

    /// GVI points of the month within a 1 m buffer of the edge geometry,
    /// each projected onto the line as `(parameter in [0,1], gvi value)`.
    async fn matched_gvi_points(&self, edge: RoadId, month: Month) -> Result<Vec<(f64, f64)>>;

    /// Road edges whose geometry lies within `radius_m` of the point.
    async fn edges_within(&self, point: geo::Point<f64>, radius_m: f64) -> Result<Vec<RoadId>>;

    /// Union of all sites within `radius_m` and the `k` nearest sites
    /// overall, capped at five, annotated with straight-line distance and
    /// ordered by it.
    async fn sites_within_and_nearest(
        &self,
        point: geo::Point<f64>,
        radius_m: f64,
        k: usize,
    ) -> Result<Vec<NearbySite>>;

    async fn stop_point(&self, id: StopPointId) -> Result<Option<StopPoint>>;

    /// Successor of a stop point on one (line, direction), when the stop
    /// sequence records one.
    async fn next_stop(
        &self,
        line: LineId,
        direction: DirectionCode,
        stop: StopPointId,
    ) -> Result<Option<NextStop>>;

    /// Walks the stop sequence forward from `stop` for at most `max_depth`
    /// hops and reports every target site entered, with the entry stop point
    /// and its hop depth.
    async fn reachable_sites(
        &self,
        line: LineId,
        direction: DirectionCode,
        stop: StopPointId,
        targets: &[SiteId],
        max_depth: usize,
    ) -> Result<Vec<ReachableSite>>;

    /// Ordered stops strictly between `from_stop` and `to_stop` on one
    /// (line, direction), bounded by `max_depth` hops.
    async fn stops_along(
        &self,
        line: LineId,
        direction: DirectionCode,
        from_stop: StopPointId,
        to_stop: StopPointId,
        max_depth: usize,
    ) -> Result<Vec<StopPoint>>;

    /// Months with greenness data, ascending.
    async fn available_months(&self) -> Result<Vec<Month>>;

    async fn dgvi_stats(&self, month: Month) -> Result<Option<DgviStats>>;

    async fn gvi_points(&self, month: Month, limit: usize) -> Result<Vec<GviPoint>>;

    /// All road ids in a stable order; the DGVI rebuild iterates these.
    async fn road_ids(&self) -> Result<Vec<RoadId>>;

    async fn dgvi_normalized(&self, edge: RoadId, month: Month) -> Result<Option<f64>>;

    /// Writes raw DGVI values for one month. Normalized values of touched
    /// rows are stale until [`SpatialStore::normalize_month`] runs.
    async fn upsert_dgvi(&self, month: Month, rows: &[(RoadId, f64)]) -> Result<()>;

    /// Recomputes min-max normalization across the month's rows; a degenerate
    /// month (min equals max) normalizes to all zeros.
    async fn normalize_month(&self, month: Month) -> Result<()>;

    /// Persists externally computed greenness samples, returning the count.
    async fn insert_gvi_points(&self, points: Vec<GviPoint>) -> Result<usize>;
}
