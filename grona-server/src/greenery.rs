//! Client for the external greenness model service.
//!
//! The service computes a street-level GVI value for a coordinate from
//! satellite imagery; this process only forwards points and persists the
//! values that come back.

use grona_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::schemas::NewGviPoint;

#[derive(Debug, Clone)]
pub struct GreeneryClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct CalculateRequest<'a> {
    points: &'a [NewGviPoint],
    month: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct CalculateResponse {
    pub results: Vec<PointResult>,
    #[serde(default)]
    pub processed_count: usize,
    #[serde(default)]
    pub failed_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct PointResult {
    pub lat: f64,
    pub lon: f64,
    pub gvi: Option<f64>,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl GreeneryClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Internal(format!("building greenery client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Computes GVI values for up to 20 points in one call.
    pub async fn calculate(&self, points: &[NewGviPoint], month: &str) -> Result<CalculateResponse> {
        let url = format!("{}/api/v1/calculate_gvi", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&CalculateRequest { points, month })
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("greenness service: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Upstream(format!("greenness service: {e}")))?;
        response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("greenness service: decoding response: {e}")))
    }
}
