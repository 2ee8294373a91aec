//! Accumulation of greenness along road geometry.
//!
//! DGVI integrates (gvi − 1) over an edge, so plain unvegetated street
//! contributes zero and greenery accumulates as positive surplus. Walking
//! paths sum their edges; waiting at a stop sums a 200 m circular buffer.
//! Bus rides are deliberately excluded from accumulation: passengers on a
//! moving bus do not perceive the streetscape.

use geo::Point;
use log::{info, warn};

use crate::model::Month;
use crate::store::SpatialStore;
use crate::{CancelToken, Result, RoadId};

/// Radius around a waiting stop whose streets contribute greenness, meters.
pub const WAITING_BUFFER_M: f64 = 200.0;

/// Roads recomputed per batch during a monthly rebuild.
pub const REBUILD_CHUNK: usize = 100;

/// DGVI of one road edge for one month.
///
/// Matched GVI points are projected onto the line as parameters in [0,1];
/// missing endpoints are synthesized from the nearest matched value, and each
/// consecutive interval contributes `Δp · L · ((v_i + v_{i+1})/2 − 1)`. An
/// edge with no matched points scores exactly zero.
pub async fn edge_dgvi<S: SpatialStore>(store: &S, edge: RoadId, month: Month) -> Result<f64> {
    let Some((_, length_m)) = store.edge_geometry(edge).await? else {
        return Ok(0.0);
    };
    let mut samples = store.matched_gvi_points(edge, month).await?;
    if samples.is_empty() {
        return Ok(0.0);
    }
    samples.sort_by(|a, b| a.0.total_cmp(&b.0));
    if samples[0].0 > 0.0 {
        let nearest = samples[0].1;
        samples.insert(0, (0.0, nearest));
    }
    if samples[samples.len() - 1].0 < 1.0 {
        let nearest = samples[samples.len() - 1].1;
        samples.push((1.0, nearest));
    }

    let mut dgvi = 0.0;
    for pair in samples.windows(2) {
        let (p0, v0) = pair[0];
        let (p1, v1) = pair[1];
        dgvi += (p1 - p0) * length_m * ((v0 + v1) / 2.0 - 1.0);
    }
    Ok(dgvi)
}

/// DGVI of a walking path: the sum over its edge list, duplicates counted.
/// A failing edge contributes zero and is logged.
pub async fn walking_dgvi<S: SpatialStore>(store: &S, edges: &[RoadId], month: Month) -> f64 {
    let mut total = 0.0;
    for &edge in edges {
        match edge_dgvi(store, edge, month).await {
            Ok(value) => total += value,
            Err(err) => warn!("DGVI of road {edge} failed, counting 0: {err}"),
        }
    }
    total
}

/// Greenness around a waiting stop: every road within the buffer contributes
/// `L · avg_gvi − L`, with an unmatched road averaging zero.
pub async fn waiting_dgvi<S: SpatialStore>(store: &S, stop: Point<f64>, month: Month) -> f64 {
    let edges = match store.edges_within(stop, WAITING_BUFFER_M).await {
        Ok(edges) => edges,
        Err(err) => {
            warn!("waiting DGVI buffer query failed, counting 0: {err}");
            return 0.0;
        }
    };
    let mut total = 0.0;
    for edge in edges {
        match waiting_contribution(store, edge, month).await {
            Ok(value) => total += value,
            Err(err) => warn!("waiting DGVI of road {edge} failed, counting 0: {err}"),
        }
    }
    total
}

async fn waiting_contribution<S: SpatialStore>(
    store: &S,
    edge: RoadId,
    month: Month,
) -> Result<f64> {
    let Some((_, length_m)) = store.edge_geometry(edge).await? else {
        return Ok(0.0);
    };
    let samples = store.matched_gvi_points(edge, month).await?;
    let avg = if samples.is_empty() {
        0.0
    } else {
        samples.iter().map(|&(_, v)| v).sum::<f64>() / samples.len() as f64
    };
    Ok(length_m * avg - length_m)
}

/// Recomputes the month's DGVI table in chunks and re-normalizes it.
///
/// Restartable: a rerun recomputes the same values row by row, and the
/// normalization pass at the end always covers the whole month.
pub async fn rebuild_month<S: SpatialStore>(
    store: &S,
    month: Month,
    cancel: &CancelToken,
) -> Result<usize> {
    let roads = store.road_ids().await?;
    info!("rebuilding DGVI for {month}: {} roads", roads.len());
    let mut written = 0;
    for chunk in roads.chunks(REBUILD_CHUNK) {
        cancel.check()?;
        let mut rows = Vec::with_capacity(chunk.len());
        for &road in chunk {
            let value = match edge_dgvi(store, road, month).await {
                Ok(value) => value,
                Err(err) => {
                    warn!("DGVI of road {road} failed during rebuild, writing 0: {err}");
                    0.0
                }
            };
            rows.push((road, value));
        }
        store.upsert_dgvi(month, &rows).await?;
        written += rows.len();
    }
    store.normalize_month(month).await?;
    info!("DGVI rebuild for {month} complete: {written} rows");
    Ok(written)
}
