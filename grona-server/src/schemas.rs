//! Request and response bodies of the HTTP surface.

use grona_core::model::ApiRoutePlan;
use grona_core::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRoutesRequest {
    pub origin: LatLon,
    pub destination: LatLon,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gvi_month: Option<String>,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_max_results() -> usize {
    4
}

impl PlanRoutesRequest {
    pub fn to_core(&self) -> Result<PlanRequest> {
        let gvi_month = self
            .gvi_month
            .as_deref()
            .map(str::parse::<Month>)
            .transpose()?;
        Ok(PlanRequest {
            origin: self.origin,
            destination: self.destination,
            gvi_month,
            preferences: self.preferences,
            max_results: self.max_results,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct PlanRoutesResponse {
    pub request: PlanRoutesRequest,
    pub results: RouteSet,
}

#[derive(Debug, Serialize)]
pub struct RouteSet {
    pub total_routes: usize,
    pub routes: Vec<ApiRoutePlan>,
}

#[derive(Debug, Serialize)]
pub struct MonthsResponse {
    pub months: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct NearbySitesQuery {
    pub lat: f64,
    pub lon: f64,
    #[serde(default = "default_max_distance")]
    pub max_distance: f64,
}

fn default_max_distance() -> f64 {
    1680.0
}

#[derive(Debug, Deserialize)]
pub struct UpdateDgviRequest {
    pub month: String,
}

#[derive(Debug, Serialize)]
pub struct UpdateDgviResponse {
    pub month: String,
    pub roads_updated: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGviPoint {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Deserialize)]
pub struct AddGviPointsRequest {
    pub month: String,
    pub points: Vec<NewGviPoint>,
}

#[derive(Debug, Serialize)]
pub struct AddGviPointsResponse {
    pub month: String,
    pub added: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub detail: String,
}
