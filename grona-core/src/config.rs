//! Engine configuration with the defaults of the production deployment.

use serde::Deserialize;

/// Tunables of the route planning engine.
///
/// Every field has a production default; deployments override single values
/// through the server's environment mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Pedestrian speed in m/s.
    pub walking_speed: f64,
    /// Minimum slack between arriving at a stop and the bus leaving, seconds.
    pub transfer_margin: u32,
    /// Maximum time a traveller is asked to walk to reach transit, seconds.
    pub max_walking_time: u32,
    /// Pacing delay between successive departure-feed requests, milliseconds.
    pub api_delay_ms: u64,
    /// Per-call timeout for the departure feed, milliseconds.
    pub feed_timeout_ms: u64,
    /// Forecast window requested from the departure feed, seconds (feed caps at 1200).
    pub forecast_seconds: u32,
    /// Longest acceptable bus ride, seconds.
    pub bus_search_max_duration: u32,
    /// Average time between consecutive stops used when the feed cannot be
    /// queried further ahead, seconds.
    pub transfer_inter_stop_avg: u32,
    /// Hops a virtual passenger rides forward looking for a transfer site.
    pub transfer_search_depth: usize,
    /// Hops the second leg may take to reach a destination site.
    pub destination_search_depth: usize,
    /// Bound on enumerated intermediate stops for display.
    pub stops_along_depth: usize,
    /// Bound on concurrent spatial-store queries.
    pub db_pool_size: usize,
    /// Sites considered around each endpoint of a bus search.
    pub max_nearby_sites: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            walking_speed: 1.4,
            transfer_margin: 60,
            max_walking_time: 1200,
            api_delay_ms: 500,
            feed_timeout_ms: 10_000,
            forecast_seconds: crate::MAX_FORECAST_SECONDS,
            bus_search_max_duration: 3600,
            transfer_inter_stop_avg: 90,
            transfer_search_depth: 10,
            destination_search_depth: 20,
            stops_along_depth: 50,
            db_pool_size: 8,
            max_nearby_sites: 5,
        }
    }
}

impl PlannerConfig {
    /// Straight-line reach of a pedestrian, meters.
    pub fn max_walking_distance(&self) -> f64 {
        self.walking_speed * f64::from(self.max_walking_time)
    }
}

#[cfg(test)]
mod tests {
    use super::PlannerConfig;

    #[test]
    fn default_walking_reach_matches_twenty_minutes() {
        let config = PlannerConfig::default();
        assert!((config.max_walking_distance() - 1680.0).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_deserialization_keeps_defaults() {
        let config: PlannerConfig = serde_json::from_str(r#"{"walking_speed": 1.2}"#).unwrap();
        assert!((config.walking_speed - 1.2).abs() < f64::EPSILON);
        assert_eq!(config.transfer_margin, 60);
        assert_eq!(config.db_pool_size, 8);
    }
}
