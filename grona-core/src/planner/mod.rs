//! Top-level route planning orchestration.
//!
//! One request fans out into walking candidates (three preference
//! strategies), direct-bus candidates (journey correlation over a paced
//! departure batch) and one-transfer candidates (virtual-passenger forward
//! simulation), then scores, ranks and enriches the survivors.

mod enrich;
mod scoring;
mod transit;
mod walking;

use geo::Point;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::feed::TransitFeed;
use crate::model::{Month, RoutePlan};
use crate::store::SpatialStore;
use crate::{CancelToken, Error, PlannerConfig, Result};

/// Preference vector trading travel time against greenness exposure.
/// Weights are non-negative and sum to one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Preferences {
    pub time: f64,
    pub green: f64,
}

impl Preferences {
    /// Fastest route, greenness ignored.
    pub const ASAP: Preferences = Preferences {
        time: 1.0,
        green: 0.0,
    };
    /// Greenest route, time ignored.
    pub const GROOT: Preferences = Preferences {
        time: 0.0,
        green: 1.0,
    };

    pub fn validate(&self) -> Result<()> {
        if self.time < 0.0 || self.green < 0.0 {
            return Err(Error::InvalidInput(
                "preference weights must be non-negative".into(),
            ));
        }
        if (self.time + self.green - 1.0).abs() > 1e-6 {
            return Err(Error::InvalidInput(format!(
                "preference weights must sum to 1, got {}",
                self.time + self.green
            )));
        }
        Ok(())
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            time: 0.5,
            green: 0.5,
        }
    }
}

/// Geographic coordinate pair as the web layer sends it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn point(self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }

    fn validate(self, label: &str) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.lat) || !(-180.0..=180.0).contains(&self.lon) {
            return Err(Error::InvalidInput(format!(
                "{label} coordinates out of range: ({}, {})",
                self.lat, self.lon
            )));
        }
        Ok(())
    }
}

/// One planning request.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanRequest {
    pub origin: LatLon,
    pub destination: LatLon,
    #[serde(default)]
    pub gvi_month: Option<Month>,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_max_results() -> usize {
    4
}

impl PlanRequest {
    fn validate(&self) -> Result<()> {
        self.origin.validate("origin")?;
        self.destination.validate("destination")?;
        self.preferences.validate()?;
        if self.max_results == 0 {
            return Err(Error::InvalidInput("max_results must be positive".into()));
        }
        Ok(())
    }
}

/// The planning engine. Stateless between requests apart from its store and
/// feed handles; safe to share behind an `Arc`.
pub struct RoutePlanner<S, F> {
    store: S,
    feed: F,
    config: PlannerConfig,
}

impl<S, F> RoutePlanner<S, F> {
    pub fn new(store: S, feed: F, config: PlannerConfig) -> Self {
        Self {
            store,
            feed,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }
}

impl<S: SpatialStore, F: TransitFeed> RoutePlanner<S, F> {
    /// Plans routes between the request endpoints.
    ///
    /// Per-candidate failures shrink the result set; an unreachable departure
    /// feed degrades to walking-only. An empty result is a success.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for malformed requests, `NoDataForMonth` when the
    /// requested (or any default) greenness month has no data, `Cancelled`
    /// once the token fires between batches.
    pub async fn plan(
        &self,
        request: &PlanRequest,
        cancel: &CancelToken,
    ) -> Result<Vec<RoutePlan>> {
        request.validate()?;
        let month = self.resolve_month(request.gvi_month).await?;
        cancel.check()?;

        let (walking, bus) = tokio::join!(
            walking::walking_candidates(self, request, month, cancel),
            transit::bus_candidates(self, request, month, cancel),
        );
        let mut walking = walking?;
        let mut bus = match bus {
            Ok(bus) => bus,
            Err(Error::Upstream(detail)) => {
                warn!("bus search degraded to walking-only: {detail}");
                Vec::new()
            }
            Err(err) => return Err(err),
        };
        cancel.check()?;

        scoring::score_category(&mut walking, request.preferences);
        scoring::score_category(&mut bus, request.preferences);
        walking.truncate(2);
        bus.truncate(2);

        let mut routes = walking;
        routes.append(&mut bus);
        enrich::enrich_routes(self, &mut routes, cancel).await?;
        routes.truncate(request.max_results);

        info!(
            "planned {} routes ({} walking, {} bus) for month {month}",
            routes.len(),
            routes
                .iter()
                .filter(|r| r.route_type == crate::model::RouteType::Walking)
                .count(),
            routes
                .iter()
                .filter(|r| r.route_type != crate::model::RouteType::Walking)
                .count(),
        );
        Ok(routes)
    }

    /// Uses the requested month when it has data, otherwise the most recent
    /// month with greenness data.
    async fn resolve_month(&self, requested: Option<Month>) -> Result<Month> {
        let available = self.store.available_months().await?;
        match requested {
            Some(month) => {
                if available.contains(&month) {
                    Ok(month)
                } else {
                    Err(Error::NoDataForMonth(month.to_string()))
                }
            }
            None => available
                .last()
                .copied()
                .ok_or_else(|| Error::NoDataForMonth("no greenness data loaded".into())),
        }
    }
}
