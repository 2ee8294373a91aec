//! HTTP routes of the planning service.

use std::result::Result;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use geojson::{Feature, FeatureCollection, Geometry};
use grona_core::model::GviPoint;
use grona_core::prelude::*;
use serde_json::json;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::greenery::GreeneryClient;
use crate::schemas::{
    AddGviPointsRequest, AddGviPointsResponse, ErrorBody, MonthsResponse, NearbySitesQuery,
    PlanRoutesRequest, PlanRoutesResponse, RouteSet, UpdateDgviRequest, UpdateDgviResponse,
};

/// Points served at most by `GET /gvi-points/{month}`.
const GVI_POINTS_LIMIT: usize = 20_000;
/// Points accepted at most by `POST /add-gvi-points`.
const ADD_POINTS_LIMIT: usize = 20;

#[derive(Clone)]
pub struct AppState {
    pub planner: Arc<RoutePlanner<MemoryStore, HttpTransitFeed>>,
    pub greenery: GreeneryClient,
    pub request_deadline: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "ok"})) }))
        .route("/plan-routes", post(plan_routes))
        .route("/available-months", get(available_months))
        .route("/dgvi-stats/{month}", get(dgvi_stats))
        .route("/gvi-points/{month}", get(gvi_points))
        .route("/nearby-sites", get(nearby_sites))
        .route("/update-dgvi", post(update_dgvi))
        .route("/add-gvi-points", post(add_gvi_points))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
}

/// Core errors mapped onto HTTP statuses with a structured body.
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    detail: String,
}

impl ApiError {
    fn deadline() -> Self {
        Self {
            status: StatusCode::GATEWAY_TIMEOUT,
            kind: "deadline_exceeded",
            detail: "planning request exceeded its deadline".into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let (status, kind) = match &err {
            Error::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            Error::NoDataForMonth(_) => (StatusCode::NOT_FOUND, "no_data_for_month"),
            Error::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_failure"),
            Error::ResourceExhausted(_) => (StatusCode::SERVICE_UNAVAILABLE, "resource_exhausted"),
            Error::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
            Error::Io(_) | Error::Serialization(_) | Error::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        if status.is_server_error() {
            error!("request failed: {err}");
        } else {
            warn!("request rejected: {err}");
        }
        Self {
            status,
            kind,
            detail: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind,
            detail: self.detail,
        };
        (self.status, Json(body)).into_response()
    }
}

async fn plan_routes(
    State(state): State<AppState>,
    Json(request): Json<PlanRoutesRequest>,
) -> Result<Json<PlanRoutesResponse>, ApiError> {
    let core_request = request.to_core()?;
    let cancel = CancelToken::new();
    let planned = match tokio::time::timeout(
        state.request_deadline,
        state.planner.plan(&core_request, &cancel),
    )
    .await
    {
        Ok(outcome) => outcome?,
        Err(_elapsed) => {
            cancel.cancel();
            return Err(ApiError::deadline());
        }
    };

    let routes: Vec<_> = planned.iter().map(RoutePlan::to_api).collect();
    Ok(Json(PlanRoutesResponse {
        request,
        results: RouteSet {
            total_routes: routes.len(),
            routes,
        },
    }))
}

async fn available_months(
    State(state): State<AppState>,
) -> Result<Json<MonthsResponse>, ApiError> {
    let months = state.planner.store().available_months().await?;
    Ok(Json(MonthsResponse {
        months: months.iter().map(Month::to_string).collect(),
    }))
}

async fn dgvi_stats(
    State(state): State<AppState>,
    Path(month): Path<String>,
) -> Result<Response, ApiError> {
    let month: Month = month.parse()?;
    match state.planner.store().dgvi_stats(month).await? {
        Some(stats) => Ok(Json(stats).into_response()),
        None => Err(Error::NoDataForMonth(month.to_string()).into()),
    }
}

async fn gvi_points(
    State(state): State<AppState>,
    Path(month): Path<String>,
) -> Result<Json<FeatureCollection>, ApiError> {
    let month: Month = month.parse()?;
    let points = state
        .planner
        .store()
        .gvi_points(month, GVI_POINTS_LIMIT)
        .await?;
    let features = points.iter().map(point_feature).collect();
    Ok(Json(FeatureCollection {
        features,
        bbox: None,
        foreign_members: None,
    }))
}

fn point_feature(point: &GviPoint) -> Feature {
    let value = json!({
        "type": "Feature",
        "geometry": Geometry::new((&point.geometry).into()),
        "properties": {
            "id": point.id,
            "gvi": point.value,
            "month": point.month.to_string(),
        }
    });
    Feature::from_json_value(value).expect("point feature is well-formed")
}

async fn nearby_sites(
    State(state): State<AppState>,
    Query(query): Query<NearbySitesQuery>,
) -> Result<Response, ApiError> {
    let point = LatLon {
        lat: query.lat,
        lon: query.lon,
    };
    let sites = state
        .planner
        .store()
        .sites_within_and_nearest(point.point(), query.max_distance, 3)
        .await?;
    Ok(Json(sites).into_response())
}

async fn update_dgvi(
    State(state): State<AppState>,
    Json(request): Json<UpdateDgviRequest>,
) -> Result<Json<UpdateDgviResponse>, ApiError> {
    let month: Month = request.month.parse()?;
    info!("DGVI rebuild requested for {month}");
    let roads_updated =
        rebuild_month(state.planner.store(), month, &CancelToken::new()).await?;
    Ok(Json(UpdateDgviResponse {
        month: month.to_string(),
        roads_updated,
    }))
}

async fn add_gvi_points(
    State(state): State<AppState>,
    Json(request): Json<AddGviPointsRequest>,
) -> Result<Json<AddGviPointsResponse>, ApiError> {
    let month: Month = request.month.parse()?;
    if request.points.is_empty() || request.points.len() > ADD_POINTS_LIMIT {
        return Err(Error::InvalidInput(format!(
            "between 1 and {ADD_POINTS_LIMIT} points per call, got {}",
            request.points.len()
        ))
        .into());
    }

    let computed = state.greenery.calculate(&request.points, &request.month).await?;
    info!(
        "greenness service processed {} points, {} failed upstream",
        computed.processed_count, computed.failed_count
    );
    let mut failed = 0usize;
    let mut fresh = Vec::new();
    for result in computed.results {
        match (result.success, result.gvi) {
            (true, Some(value)) => fresh.push(GviPoint {
                id: 0,
                geometry: geo::Point::new(result.lon, result.lat),
                month,
                value,
            }),
            _ => {
                warn!(
                    "greenness service failed for ({}, {}): {}",
                    result.lat,
                    result.lon,
                    result.error.as_deref().unwrap_or("unknown")
                );
                failed += 1;
            }
        }
    }
    let added = state.planner.store().insert_gvi_points(fresh).await?;
    Ok(Json(AddGviPointsResponse {
        month: month.to_string(),
        added,
        failed,
    }))
}
