//! In-process spatial store over a loaded snapshot.
//!
//! Spatial queries use two-stage filtering: an R-tree pass in plain degree
//! space narrows candidates, then great-circle distance decides. Shortest
//! paths run a traced Dijkstra over an undirected petgraph of the road
//! topology, with the cost expression evaluated per edge.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;

use geo::{Closest, ClosestPoint, Coord, Distance, Haversine, Line, LineLocatePoint, LineString, Point};
use hashbrown::{HashMap, HashSet};
use log::{info, warn};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, Semaphore};

use super::{CostExpr, EdgePath, SpatialStore};
use crate::model::{
    DgviStats, GviPoint, Month, NearbySite, NextStop, ReachableSite, RoadEdge, RoadVertex, Site,
    StopPoint, StopSequenceEdge,
};
use crate::{DirectionCode, Error, LineId, Result, RoadId, SiteId, StopPointId, VertexId};

/// Meters per degree of latitude; longitude shrinks with cos(lat).
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Buffer around an edge geometry within which a GVI point matches it.
const GVI_MATCH_BUFFER_M: f64 = 1.0;

/// Everything the store is built from. Produced by the out-of-scope data
/// loader; read from disk by the server binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub vertices: Vec<RoadVertex>,
    pub edges: Vec<RoadEdge>,
    pub sites: Vec<Site>,
    pub stop_points: Vec<StopPoint>,
    pub stop_sequences: Vec<StopSequenceEdge>,
    #[serde(default)]
    pub gvi_points: Vec<GviPoint>,
    #[serde(default)]
    pub dgvi: Vec<crate::model::RoadDgvi>,
}

#[derive(Clone)]
struct VertexNode {
    position: [f64; 2],
    id: VertexId,
}

impl RTreeObject for VertexNode {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

impl PointDistance for VertexNode {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.position[0] - point[0];
        let dy = self.position[1] - point[1];
        dx * dx + dy * dy
    }
}

/// One straight span of a road polyline, pointing back at its edge slot.
#[derive(Clone)]
struct EdgeSpan {
    segment: Line<f64>,
    slot: usize,
    aabb: AABB<[f64; 2]>,
}

impl EdgeSpan {
    fn new(segment: Line<f64>, slot: usize) -> Self {
        let aabb = AABB::from_corners(
            [segment.start.x, segment.start.y],
            [segment.end.x, segment.end.y],
        );
        Self {
            segment,
            slot,
            aabb,
        }
    }
}

impl RTreeObject for EdgeSpan {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

impl PointDistance for EdgeSpan {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let a = [self.segment.start.x, self.segment.start.y];
        let b = [self.segment.end.x, self.segment.end.y];
        let ab = [b[0] - a[0], b[1] - a[1]];
        let ap = [point[0] - a[0], point[1] - a[1]];
        let ab_ab = ab[0] * ab[0] + ab[1] * ab[1];
        if ab_ab == 0.0 {
            return ap[0] * ap[0] + ap[1] * ap[1];
        }
        let t = ((ab[0] * ap[0] + ab[1] * ap[1]) / ab_ab).clamp(0.0, 1.0);
        let dx = point[0] - (a[0] + t * ab[0]);
        let dy = point[1] - (a[1] + t * ab[1]);
        dx * dx + dy * dy
    }
}

#[derive(Clone)]
struct SiteNode {
    position: [f64; 2],
    slot: usize,
}

impl RTreeObject for SiteNode {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

impl PointDistance for SiteNode {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.position[0] - point[0];
        let dy = self.position[1] - point[1];
        dx * dx + dy * dy
    }
}

#[derive(Clone)]
struct GviNode {
    position: [f64; 2],
    value: f64,
    id: i64,
}

impl RTreeObject for GviNode {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

#[derive(Clone, Copy)]
struct DgviRow {
    raw: f64,
    normalized: f64,
}

#[derive(Default)]
struct Greenery {
    points: HashMap<Month, Vec<GviPoint>>,
    point_index: HashMap<Month, RTree<GviNode>>,
    dgvi: HashMap<(RoadId, Month), DgviRow>,
    next_point_id: i64,
}

impl Greenery {
    fn rebuild_month_index(&mut self, month: Month) {
        let nodes: Vec<GviNode> = self
            .points
            .get(&month)
            .map(|points| {
                points
                    .iter()
                    .map(|p| GviNode {
                        position: [p.geometry.x(), p.geometry.y()],
                        value: p.value,
                        id: p.id,
                    })
                    .collect()
            })
            .unwrap_or_default();
        self.point_index.insert(month, RTree::bulk_load(nodes));
    }
}

/// Production [`SpatialStore`]: R-tree indexes over the static layers plus a
/// mutable greenness side guarded by a read-write lock. A semaphore sized by
/// the configured pool bound stands in for the database connection pool; each
/// query holds one permit for its duration.
pub struct MemoryStore {
    pool: Semaphore,
    graph: UnGraph<VertexId, usize>,
    node_index: HashMap<VertexId, NodeIndex>,
    edges: Vec<RoadEdge>,
    edge_slots: HashMap<RoadId, usize>,
    vertex_index: RTree<VertexNode>,
    edge_index: RTree<EdgeSpan>,
    sites: Vec<Site>,
    site_index: RTree<SiteNode>,
    stop_points: HashMap<StopPointId, StopPoint>,
    successors: HashMap<(LineId, DirectionCode, StopPointId), StopSequenceEdge>,
    greenery: RwLock<Greenery>,
}

impl MemoryStore {
    /// Builds the store from a snapshot, recomputing the min-max normalized
    /// edge length over the whole graph.
    pub fn build(snapshot: StoreSnapshot, pool_size: usize) -> Result<Self> {
        let StoreSnapshot {
            vertices,
            mut edges,
            sites,
            stop_points,
            stop_sequences,
            gvi_points,
            dgvi,
        } = snapshot;

        normalize_lengths(&mut edges);

        let mut graph = UnGraph::<VertexId, usize>::with_capacity(vertices.len(), edges.len());
        let mut node_index = HashMap::with_capacity(vertices.len());
        let mut vertex_nodes = Vec::with_capacity(vertices.len());
        for vertex in &vertices {
            let idx = graph.add_node(vertex.id);
            node_index.insert(vertex.id, idx);
            vertex_nodes.push(VertexNode {
                position: [vertex.geometry.x(), vertex.geometry.y()],
                id: vertex.id,
            });
        }

        let mut edge_slots = HashMap::with_capacity(edges.len());
        let mut spans = Vec::new();
        for (slot, edge) in edges.iter().enumerate() {
            let (Some(&source), Some(&target)) =
                (node_index.get(&edge.source), node_index.get(&edge.target))
            else {
                warn!(
                    "road {} references unknown vertices ({}, {}), skipping",
                    edge.id, edge.source, edge.target
                );
                continue;
            };
            graph.add_edge(source, target, slot);
            edge_slots.insert(edge.id, slot);
            for segment in edge.geometry.lines() {
                spans.push(EdgeSpan::new(segment, slot));
            }
        }

        let site_nodes = sites
            .iter()
            .enumerate()
            .map(|(slot, site)| SiteNode {
                position: [site.geometry.x(), site.geometry.y()],
                slot,
            })
            .collect();

        let stop_points: HashMap<StopPointId, StopPoint> =
            stop_points.into_iter().map(|sp| (sp.id, sp)).collect();

        let mut successors = HashMap::with_capacity(stop_sequences.len());
        for seq in stop_sequences {
            if seq.stop_point_id == seq.next_stop_point_id {
                warn!(
                    "stop sequence of line {} loops on stop {}, skipping",
                    seq.line_id, seq.stop_point_id
                );
                continue;
            }
            successors.insert((seq.line_id, seq.direction_code, seq.stop_point_id), seq);
        }

        let mut greenery = Greenery::default();
        for point in gvi_points {
            greenery.next_point_id = greenery.next_point_id.max(point.id + 1);
            greenery.points.entry(point.month).or_default().push(point);
        }
        let months: Vec<Month> = greenery.points.keys().copied().collect();
        for month in months {
            greenery.rebuild_month_index(month);
        }
        for row in dgvi {
            greenery.dgvi.insert(
                (row.road_id, row.month),
                DgviRow {
                    raw: row.dgvi,
                    normalized: row.dgvi_normalized,
                },
            );
        }

        info!(
            "spatial store ready: {} vertices, {} edges, {} sites, {} stop points",
            vertices.len(),
            edges.len(),
            sites.len(),
            stop_points.len()
        );

        Ok(Self {
            pool: Semaphore::new(pool_size.max(1)),
            graph,
            node_index,
            edges,
            edge_slots,
            vertex_index: RTree::bulk_load(vertex_nodes),
            edge_index: RTree::bulk_load(spans),
            sites,
            site_index: RTree::bulk_load(site_nodes),
            stop_points,
            successors,
            greenery: RwLock::new(greenery),
        })
    }

    /// Loads a JSON snapshot from disk and builds the store.
    pub fn from_snapshot_file(path: impl AsRef<Path>, pool_size: usize) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let snapshot: StoreSnapshot = serde_json::from_reader(std::io::BufReader::new(file))?;
        Self::build(snapshot, pool_size)
    }

    async fn permit(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        self.pool
            .acquire()
            .await
            .map_err(|_| Error::ResourceExhausted("spatial store pool closed".into()))
    }

    fn edge_by_id(&self, id: RoadId) -> Option<&RoadEdge> {
        self.edge_slots.get(&id).map(|&slot| &self.edges[slot])
    }

    fn edge_cost(&self, slot: usize, cost: &CostExpr, greenery: &Greenery) -> f64 {
        let edge = &self.edges[slot];
        match cost {
            CostExpr::Length => edge.length_m,
            CostExpr::Weighted {
                month,
                w_time,
                w_green,
            } => {
                let dgvi_norm = greenery
                    .dgvi
                    .get(&(edge.id, *month))
                    .map_or(0.0, |row| row.normalized);
                w_time * edge.length_norm + w_green * (1.0 - dgvi_norm)
            }
        }
    }

    /// Traced Dijkstra over the undirected road graph. Returns the traversal
    /// as (vertex path, edge slots) or `None` when the target is unreachable.
    fn dijkstra(
        &self,
        start: NodeIndex,
        target: NodeIndex,
        cost: &CostExpr,
        greenery: &Greenery,
    ) -> Option<(Vec<NodeIndex>, Vec<usize>)> {
        let estimated = self.graph.node_count().min(1024);
        let mut distances: HashMap<NodeIndex, f64> = HashMap::with_capacity(estimated);
        let mut predecessors: HashMap<NodeIndex, (NodeIndex, usize)> =
            HashMap::with_capacity(estimated);
        let mut heap = BinaryHeap::with_capacity(estimated / 4);

        distances.insert(start, 0.0);
        heap.push(SearchState {
            cost: 0.0,
            node: start,
        });

        while let Some(SearchState { cost: reached, node }) = heap.pop() {
            if node == target {
                break;
            }
            if let Some(&best) = distances.get(&node) {
                if reached > best {
                    continue;
                }
            }
            for edge in self.graph.edges(node) {
                let next = if edge.source() == node {
                    edge.target()
                } else {
                    edge.source()
                };
                let slot = *edge.weight();
                let next_cost = reached + self.edge_cost(slot, cost, greenery);
                let improved = match distances.get(&next) {
                    Some(&known) => next_cost < known,
                    None => true,
                };
                if improved {
                    distances.insert(next, next_cost);
                    predecessors.insert(next, (node, slot));
                    heap.push(SearchState {
                        cost: next_cost,
                        node: next,
                    });
                }
            }
        }

        if !distances.contains_key(&target) {
            return None;
        }

        let mut nodes = vec![target];
        let mut slots = Vec::new();
        let mut current = target;
        while current != start {
            let &(prev, slot) = predecessors.get(&current)?;
            slots.push(slot);
            nodes.push(prev);
            current = prev;
        }
        nodes.reverse();
        slots.reverse();
        Some((nodes, slots))
    }

    /// Stitches edge polylines into one line, following traversal order and
    /// flipping edges walked target-to-source.
    fn merge_geometry(&self, nodes: &[NodeIndex], slots: &[usize]) -> LineString<f64> {
        let mut coords: Vec<Coord<f64>> = Vec::new();
        for (step, &slot) in slots.iter().enumerate() {
            let edge = &self.edges[slot];
            let from_id = self.graph[nodes[step]];
            let forward = edge.source == from_id;
            let mut take = |coord: Coord<f64>| {
                if coords.last() != Some(&coord) {
                    coords.push(coord);
                }
            };
            if forward {
                edge.geometry.coords().copied().for_each(&mut take);
            } else {
                edge.geometry.coords().rev().copied().for_each(&mut take);
            }
        }
        LineString::new(coords)
    }

    fn haversine_to_linestring(point: Point<f64>, line: &LineString<f64>) -> f64 {
        match line.closest_point(&point) {
            Closest::Intersection(p) | Closest::SinglePoint(p) => Haversine.distance(point, p),
            Closest::Indeterminate => f64::INFINITY,
        }
    }
}

#[derive(Copy, Clone, PartialEq)]
struct SearchState {
    cost: f64,
    node: NodeIndex,
}

impl Eq for SearchState {}

impl Ord for SearchState {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap by cost (reversed from standard Rust BinaryHeap)
        other.cost.total_cmp(&self.cost)
    }
}

impl PartialOrd for SearchState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Degree radius that is guaranteed to cover `radius_m` around the point;
/// the exact great-circle filter runs on the candidates afterwards.
fn degree_radius(point: Point<f64>, radius_m: f64) -> f64 {
    let lat_scale = point.y().to_radians().cos().max(0.2);
    radius_m / (METERS_PER_DEGREE * lat_scale)
}

fn normalize_lengths(edges: &mut [RoadEdge]) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for edge in edges.iter() {
        min = min.min(edge.length_m);
        max = max.max(edge.length_m);
    }
    let span = max - min;
    for edge in edges.iter_mut() {
        edge.length_norm = if span > 0.0 {
            (edge.length_m - min) / span
        } else {
            0.0
        };
    }
}

impl SpatialStore for MemoryStore {
    async fn nearest_vertex(&self, point: Point<f64>) -> Result<Option<VertexId>> {
        let _permit = self.permit().await?;
        let query = [point.x(), point.y()];
        // Euclidean pre-filter; great-circle distance decides among the
        // closest candidates, ties by smaller vertex id.
        let best = self
            .vertex_index
            .nearest_neighbor_iter(&query)
            .take(8)
            .map(|node| {
                let candidate = Point::new(node.position[0], node.position[1]);
                (Haversine.distance(point, candidate), node.id)
            })
            .min_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        Ok(best.map(|(_, id)| id))
    }

    async fn shortest_edge_path(
        &self,
        from: VertexId,
        to: VertexId,
        cost: &CostExpr,
    ) -> Result<Option<EdgePath>> {
        let _permit = self.permit().await?;
        let (Some(&start), Some(&target)) = (self.node_index.get(&from), self.node_index.get(&to))
        else {
            return Ok(None);
        };
        if start == target {
            return Ok(Some(EdgePath::empty()));
        }
        let greenery = self.greenery.read().await;
        let Some((nodes, slots)) = self.dijkstra(start, target, cost, &greenery) else {
            return Ok(None);
        };
        drop(greenery);

        let edge_ids = slots.iter().map(|&slot| self.edges[slot].id).collect();
        let length_m = slots.iter().map(|&slot| self.edges[slot].length_m).sum();
        let geometry = self.merge_geometry(&nodes, &slots);
        Ok(Some(EdgePath {
            edge_ids,
            length_m,
            geometry,
        }))
    }

    async fn edge_geometry(&self, edge: RoadId) -> Result<Option<(LineString<f64>, f64)>> {
        let _permit = self.permit().await?;
        Ok(self
            .edge_by_id(edge)
            .map(|e| (e.geometry.clone(), e.length_m)))
    }

    async fn matched_gvi_points(&self, edge: RoadId, month: Month) -> Result<Vec<(f64, f64)>> {
        let _permit = self.permit().await?;
        let Some(edge) = self.edge_by_id(edge) else {
            return Ok(Vec::new());
        };
        let greenery = self.greenery.read().await;
        let Some(index) = greenery.point_index.get(&month) else {
            return Ok(Vec::new());
        };

        let mut min = [f64::INFINITY; 2];
        let mut max = [f64::NEG_INFINITY; 2];
        for coord in edge.geometry.coords() {
            min[0] = min[0].min(coord.x);
            min[1] = min[1].min(coord.y);
            max[0] = max[0].max(coord.x);
            max[1] = max[1].max(coord.y);
        }
        let mid = Point::new((min[0] + max[0]) / 2.0, (min[1] + max[1]) / 2.0);
        let pad = degree_radius(mid, GVI_MATCH_BUFFER_M);
        let envelope = AABB::from_corners([min[0] - pad, min[1] - pad], [max[0] + pad, max[1] + pad]);

        let mut matched = Vec::new();
        for node in index.locate_in_envelope_intersecting(&envelope) {
            let sample = Point::new(node.position[0], node.position[1]);
            if Self::haversine_to_linestring(sample, &edge.geometry) <= GVI_MATCH_BUFFER_M {
                if let Some(parameter) = edge.geometry.line_locate_point(&sample) {
                    matched.push((parameter, node.value));
                }
            }
        }
        Ok(matched)
    }

    async fn edges_within(&self, point: Point<f64>, radius_m: f64) -> Result<Vec<RoadId>> {
        let _permit = self.permit().await?;
        let query = [point.x(), point.y()];
        let radius_deg = degree_radius(point, radius_m);
        let mut seen: HashSet<usize> = HashSet::new();
        let mut hits = Vec::new();
        for span in self
            .edge_index
            .locate_within_distance(query, radius_deg * radius_deg)
        {
            if !seen.insert(span.slot) {
                continue;
            }
            let edge = &self.edges[span.slot];
            if Self::haversine_to_linestring(point, &edge.geometry) <= radius_m {
                hits.push(edge.id);
            }
        }
        hits.sort_unstable();
        Ok(hits)
    }

    async fn sites_within_and_nearest(
        &self,
        point: Point<f64>,
        radius_m: f64,
        k: usize,
    ) -> Result<Vec<NearbySite>> {
        let _permit = self.permit().await?;
        let query = [point.x(), point.y()];
        let radius_deg = degree_radius(point, radius_m);

        let mut slots: Vec<usize> = self
            .site_index
            .locate_within_distance(query, radius_deg * radius_deg)
            .map(|node| node.slot)
            .collect();
        // Euclidean pre-filter with headroom: degree-space ordering skews
        // with latitude, so pull extra candidates and let the great-circle
        // re-sort below decide which k are truly nearest.
        slots.extend(
            self.site_index
                .nearest_neighbor_iter(&query)
                .take(k.max(8))
                .map(|node| node.slot),
        );

        let mut seen: HashSet<usize> = HashSet::new();
        let mut nearby: Vec<NearbySite> = Vec::new();
        for slot in slots {
            if !seen.insert(slot) {
                continue;
            }
            let site = &self.sites[slot];
            let distance = Haversine.distance(point, site.geometry);
            // Radius candidates came from the degree-space pre-filter; keep
            // them only when the great-circle distance confirms, while the k
            // nearest stay regardless.
            nearby.push(NearbySite {
                id: site.id,
                name: site.name.clone(),
                geometry: site.geometry,
                walking_distance_m: distance,
            });
        }
        nearby.sort_by(|a, b| {
            a.walking_distance_m
                .total_cmp(&b.walking_distance_m)
                .then_with(|| a.id.cmp(&b.id))
        });
        let nearest_ids: HashSet<SiteId> = nearby.iter().take(k).map(|s| s.id).collect();
        nearby.retain(|s| s.walking_distance_m <= radius_m || nearest_ids.contains(&s.id));
        nearby.truncate(5);
        Ok(nearby)
    }

    async fn stop_point(&self, id: StopPointId) -> Result<Option<StopPoint>> {
        let _permit = self.permit().await?;
        Ok(self.stop_points.get(&id).cloned())
    }

    async fn next_stop(
        &self,
        line: LineId,
        direction: DirectionCode,
        stop: StopPointId,
    ) -> Result<Option<NextStop>> {
        let _permit = self.permit().await?;
        let Some(seq) = self.successors.get(&(line, direction, stop)) else {
            return Ok(None);
        };
        match self.stop_points.get(&seq.next_stop_point_id) {
            Some(next) => Ok(Some(NextStop {
                stop_point_id: next.id,
                site_id: next.site_id,
                name: next.name.clone(),
            })),
            None => {
                warn!(
                    "stop sequence of line {} points at unknown stop {}",
                    line, seq.next_stop_point_id
                );
                Ok(None)
            }
        }
    }

    async fn reachable_sites(
        &self,
        line: LineId,
        direction: DirectionCode,
        stop: StopPointId,
        targets: &[SiteId],
        max_depth: usize,
    ) -> Result<Vec<ReachableSite>> {
        let _permit = self.permit().await?;
        let targets: HashSet<SiteId> = targets.iter().copied().collect();
        let mut reached = Vec::new();
        let mut visited: HashSet<StopPointId> = HashSet::new();
        let mut current = stop;
        for hops in 1..=max_depth {
            let Some(seq) = self.successors.get(&(line, direction, current)) else {
                break;
            };
            let next = seq.next_stop_point_id;
            if !visited.insert(next) {
                break;
            }
            if let Some(stop_point) = self.stop_points.get(&next) {
                if targets.contains(&stop_point.site_id) {
                    reached.push(ReachableSite {
                        site_id: stop_point.site_id,
                        entry_stop_point: next,
                        hops,
                    });
                }
            }
            current = next;
        }
        Ok(reached)
    }

    async fn stops_along(
        &self,
        line: LineId,
        direction: DirectionCode,
        from_stop: StopPointId,
        to_stop: StopPointId,
        max_depth: usize,
    ) -> Result<Vec<StopPoint>> {
        let _permit = self.permit().await?;
        let mut stops = Vec::new();
        let mut visited: HashSet<StopPointId> = HashSet::new();
        let mut current = from_stop;
        for _ in 0..max_depth {
            let Some(seq) = self.successors.get(&(line, direction, current)) else {
                break;
            };
            let next = seq.next_stop_point_id;
            if next == to_stop || !visited.insert(next) {
                break;
            }
            if let Some(stop_point) = self.stop_points.get(&next) {
                stops.push(stop_point.clone());
            }
            current = next;
        }
        Ok(stops)
    }

    async fn available_months(&self) -> Result<Vec<Month>> {
        let _permit = self.permit().await?;
        let greenery = self.greenery.read().await;
        let mut months: Vec<Month> = greenery
            .points
            .keys()
            .chain(greenery.dgvi.keys().map(|(_, month)| month))
            .copied()
            .collect();
        months.sort_unstable();
        months.dedup();
        Ok(months)
    }

    async fn dgvi_stats(&self, month: Month) -> Result<Option<DgviStats>> {
        let _permit = self.permit().await?;
        let greenery = self.greenery.read().await;
        let mut count = 0usize;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for ((_, row_month), row) in &greenery.dgvi {
            if *row_month != month {
                continue;
            }
            count += 1;
            min = min.min(row.raw);
            max = max.max(row.raw);
            sum += row.raw;
        }
        if count == 0 {
            return Ok(None);
        }
        Ok(Some(DgviStats {
            month,
            road_count: count,
            min_dgvi: min,
            max_dgvi: max,
            mean_dgvi: sum / count as f64,
        }))
    }

    async fn gvi_points(&self, month: Month, limit: usize) -> Result<Vec<GviPoint>> {
        let _permit = self.permit().await?;
        let greenery = self.greenery.read().await;
        Ok(greenery
            .points
            .get(&month)
            .map(|points| points.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn road_ids(&self) -> Result<Vec<RoadId>> {
        let _permit = self.permit().await?;
        let mut ids: Vec<RoadId> = self.edge_slots.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn dgvi_normalized(&self, edge: RoadId, month: Month) -> Result<Option<f64>> {
        let _permit = self.permit().await?;
        let greenery = self.greenery.read().await;
        Ok(greenery
            .dgvi
            .get(&(edge, month))
            .map(|row| row.normalized))
    }

    async fn upsert_dgvi(&self, month: Month, rows: &[(RoadId, f64)]) -> Result<()> {
        let _permit = self.permit().await?;
        let mut greenery = self.greenery.write().await;
        for &(road_id, raw) in rows {
            greenery.dgvi.insert(
                (road_id, month),
                DgviRow {
                    raw,
                    normalized: 0.0,
                },
            );
        }
        Ok(())
    }

    async fn normalize_month(&self, month: Month) -> Result<()> {
        let _permit = self.permit().await?;
        let mut greenery = self.greenery.write().await;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for ((_, row_month), row) in &greenery.dgvi {
            if *row_month == month {
                min = min.min(row.raw);
                max = max.max(row.raw);
            }
        }
        let span = max - min;
        for ((_, row_month), row) in greenery.dgvi.iter_mut() {
            if *row_month == month {
                row.normalized = if span > 0.0 { (row.raw - min) / span } else { 0.0 };
            }
        }
        Ok(())
    }

    async fn insert_gvi_points(&self, points: Vec<GviPoint>) -> Result<usize> {
        let _permit = self.permit().await?;
        let mut greenery = self.greenery.write().await;
        let mut touched: Vec<Month> = Vec::new();
        let count = points.len();
        for mut point in points {
            if point.id <= 0 {
                point.id = greenery.next_point_id;
            }
            greenery.next_point_id = greenery.next_point_id.max(point.id + 1);
            if !touched.contains(&point.month) {
                touched.push(point.month);
            }
            greenery.points.entry(point.month).or_default().push(point);
        }
        for month in touched {
            greenery.rebuild_month_index(month);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::line_string;

    fn month() -> Month {
        "2025-08".parse().unwrap()
    }

    fn vertex(id: VertexId, x: f64, y: f64) -> RoadVertex {
        RoadVertex {
            id,
            geometry: Point::new(x, y),
        }
    }

    fn edge(id: RoadId, source: VertexId, target: VertexId, length_m: f64, coords: [(f64, f64); 2]) -> RoadEdge {
        RoadEdge {
            id,
            geometry: line_string![
                (x: coords[0].0, y: coords[0].1),
                (x: coords[1].0, y: coords[1].1),
            ],
            length_m,
            length_norm: 0.0,
            source,
            target,
        }
    }

    /// Square of vertices around Odenplan with a short and a long way from
    /// vertex 1 to vertex 3.
    fn square_snapshot() -> StoreSnapshot {
        StoreSnapshot {
            vertices: vec![
                vertex(1, 18.050, 59.340),
                vertex(2, 18.052, 59.340),
                vertex(3, 18.052, 59.342),
                vertex(4, 18.050, 59.342),
            ],
            edges: vec![
                edge(10, 1, 2, 110.0, [(18.050, 59.340), (18.052, 59.340)]),
                edge(11, 2, 3, 220.0, [(18.052, 59.340), (18.052, 59.342)]),
                edge(12, 1, 4, 100.0, [(18.050, 59.340), (18.050, 59.342)]),
                edge(13, 4, 3, 100.0, [(18.050, 59.342), (18.052, 59.342)]),
            ],
            ..StoreSnapshot::default()
        }
    }

    #[tokio::test]
    async fn nearest_vertex_breaks_ties_by_smaller_id() {
        let mut snapshot = square_snapshot();
        // Duplicate location with a higher id must lose the tie.
        snapshot.vertices.push(vertex(9, 18.050, 59.340));
        let store = MemoryStore::build(snapshot, 2).unwrap();
        let found = store
            .nearest_vertex(Point::new(18.0500, 59.3400))
            .await
            .unwrap();
        assert_eq!(found, Some(1));
    }

    #[tokio::test]
    async fn nearest_sites_rank_by_great_circle_not_degree_distance() {
        // At this latitude a degree of longitude is about half a degree of
        // latitude in meters. The eastern site is further in degree space
        // but nearer in meters, and must still win the k = 1 slot.
        let mut snapshot = square_snapshot();
        snapshot.sites = vec![
            Site {
                id: 1,
                geometry: Point::new(18.050, 59.3415),
                name: "North".into(),
            },
            Site {
                id: 2,
                geometry: Point::new(18.0525, 59.340),
                name: "East".into(),
            },
        ];
        let store = MemoryStore::build(snapshot, 2).unwrap();
        let nearby = store
            .sites_within_and_nearest(Point::new(18.050, 59.340), 50.0, 1)
            .await
            .unwrap();
        assert_eq!(nearby.len(), 1);
        assert_eq!(nearby[0].id, 2);
        assert!(nearby[0].walking_distance_m < 160.0);
    }

    #[tokio::test]
    async fn equal_endpoints_yield_an_empty_path() {
        let store = MemoryStore::build(square_snapshot(), 2).unwrap();
        let path = store
            .shortest_edge_path(2, 2, &CostExpr::Length)
            .await
            .unwrap()
            .unwrap();
        assert!(path.edge_ids.is_empty());
        assert_eq!(path.length_m, 0.0);
    }

    #[tokio::test]
    async fn length_cost_picks_the_metrically_shorter_path() {
        let store = MemoryStore::build(square_snapshot(), 2).unwrap();
        let path = store
            .shortest_edge_path(1, 3, &CostExpr::Length)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(path.edge_ids, vec![12, 13]);
        assert!((path.length_m - 200.0).abs() < 1e-9);
        assert!(path.geometry.coords().count() >= 3);
    }

    #[tokio::test]
    async fn green_cost_prefers_the_greener_detour() {
        let store = MemoryStore::build(square_snapshot(), 2).unwrap();
        // The longer way around (10, 11) is the green one this month.
        store
            .upsert_dgvi(month(), &[(10, 40.0), (11, 40.0), (12, -60.0), (13, -60.0)])
            .await
            .unwrap();
        store.normalize_month(month()).await.unwrap();

        let green = CostExpr::Weighted {
            month: month(),
            w_time: 0.0,
            w_green: 1.0,
        };
        let path = store.shortest_edge_path(1, 3, &green).await.unwrap().unwrap();
        assert_eq!(path.edge_ids, vec![10, 11]);

        let fast = CostExpr::Weighted {
            month: month(),
            w_time: 1.0,
            w_green: 0.0,
        };
        let path = store.shortest_edge_path(1, 3, &fast).await.unwrap().unwrap();
        assert_eq!(path.edge_ids, vec![12, 13]);
    }

    #[tokio::test]
    async fn unknown_vertices_report_no_path() {
        let store = MemoryStore::build(square_snapshot(), 2).unwrap();
        let path = store
            .shortest_edge_path(1, 999, &CostExpr::Length)
            .await
            .unwrap();
        assert!(path.is_none());
    }

    #[tokio::test]
    async fn edges_within_finds_streets_around_a_point() {
        let store = MemoryStore::build(square_snapshot(), 2).unwrap();
        let hits = store
            .edges_within(Point::new(18.050, 59.340), 50.0)
            .await
            .unwrap();
        assert!(hits.contains(&10));
        assert!(hits.contains(&12));
        assert!(!hits.contains(&11));
    }

    #[tokio::test]
    async fn normalization_is_bounded_and_degenerate_months_zero_out() {
        let store = MemoryStore::build(square_snapshot(), 2).unwrap();
        store
            .upsert_dgvi(month(), &[(10, -5.0), (11, 15.0), (12, 5.0)])
            .await
            .unwrap();
        store.normalize_month(month()).await.unwrap();
        for (road, expected) in [(10, 0.0), (11, 1.0), (12, 0.5)] {
            let norm = store.dgvi_normalized(road, month()).await.unwrap().unwrap();
            assert!((norm - expected).abs() < 1e-9);
        }

        let flat: Month = "2025-09".parse().unwrap();
        store
            .upsert_dgvi(flat, &[(10, 7.0), (11, 7.0)])
            .await
            .unwrap();
        store.normalize_month(flat).await.unwrap();
        for road in [10, 11] {
            let norm = store.dgvi_normalized(road, flat).await.unwrap().unwrap();
            assert_eq!(norm, 0.0);
        }
    }

    #[tokio::test]
    async fn matched_points_project_onto_the_edge() {
        let mut snapshot = square_snapshot();
        snapshot.gvi_points = vec![
            GviPoint {
                id: 1,
                geometry: Point::new(18.051, 59.340),
                month: month(),
                value: 0.8,
            },
            // A different month never matches.
            GviPoint {
                id: 2,
                geometry: Point::new(18.051, 59.340),
                month: "2025-09".parse().unwrap(),
                value: 0.1,
            },
            // Too far from edge 10.
            GviPoint {
                id: 3,
                geometry: Point::new(18.051, 59.341),
                month: month(),
                value: 0.9,
            },
        ];
        let store = MemoryStore::build(snapshot, 2).unwrap();
        let matched = store.matched_gvi_points(10, month()).await.unwrap();
        assert_eq!(matched.len(), 1);
        let (parameter, value) = matched[0];
        assert!((parameter - 0.5).abs() < 0.05);
        assert!((value - 0.8).abs() < f64::EPSILON);
    }
}
