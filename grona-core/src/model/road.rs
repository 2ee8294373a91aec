//! Road network entities as produced by the static loader.

use geo::{LineString, Point};
use serde::{Deserialize, Serialize};

use crate::{RoadId, VertexId};

/// One row of the road table. The solver traverses edges in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoadEdge {
    pub id: RoadId,
    /// Polyline geometry in WGS84, ordered source to target.
    pub geometry: LineString<f64>,
    pub length_m: f64,
    /// Min-max normalized length over the whole graph, in [0, 1]. Recomputed
    /// when the store is built, so snapshots may omit it.
    #[serde(default)]
    pub length_norm: f64,
    pub source: VertexId,
    pub target: VertexId,
}

/// Vertex of the precomputed road topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoadVertex {
    pub id: VertexId,
    pub geometry: Point<f64>,
}
