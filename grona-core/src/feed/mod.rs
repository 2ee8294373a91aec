//! Client for the live bus-departure feed.
//!
//! The upstream exposes a per-site forecast capped at 1200 seconds and does
//! not publish its rate limits, so batch calls are strictly sequential with a
//! fixed pacing delay. A failing site degrades to an empty list; a batch
//! never fails as a whole.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use hashbrown::HashMap;
use log::{debug, warn};
use serde::Deserialize;

use crate::model::{Departure, JourneyId};
use crate::{DirectionCode, Error, LineId, Result, SiteId, StopPointId, MAX_FORECAST_SECONDS};

/// Source of live departures. One implementation speaks HTTP; tests script
/// their own.
#[allow(async_fn_in_trait)]
pub trait TransitFeed {
    /// Bus departures expected at the site within the forecast window.
    /// Per-site failures are logged and degrade to an empty list.
    async fn departures(&self, site: SiteId, forecast_s: u32) -> Vec<Departure>;

    /// Sequentially fetches departures for every site, in input order, with
    /// `pacing` slept between successive requests. Partial failures yield
    /// empty entries; the map always has one entry per requested site.
    async fn batch_departures(
        &self,
        sites: &[SiteId],
        forecast_s: u32,
        pacing: Duration,
    ) -> HashMap<SiteId, Vec<Departure>> {
        let mut batch = HashMap::with_capacity(sites.len());
        for (idx, &site) in sites.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(pacing).await;
            }
            let departures = self.departures(site, forecast_s).await;
            debug!("site {site}: {} departures", departures.len());
            batch.insert(site, departures);
        }
        batch
    }
}

/// HTTP client for `GET sites/{siteId}/departures?forecast=N`.
#[derive(Debug, Clone)]
pub struct HttpTransitFeed {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransitFeed {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("building feed client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn fetch(&self, site: SiteId, forecast_s: u32) -> Result<Vec<Departure>> {
        let url = format!("{}/sites/{site}/departures", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("forecast", forecast_s)])
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("site {site}: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Upstream(format!("site {site}: {e}")))?;
        let body: DeparturesResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("site {site}: decoding departures: {e}")))?;
        Ok(bus_departures(body))
    }
}

impl TransitFeed for HttpTransitFeed {
    async fn departures(&self, site: SiteId, forecast_s: u32) -> Vec<Departure> {
        let forecast_s = forecast_s.min(MAX_FORECAST_SECONDS);
        match self.fetch(site, forecast_s).await {
            Ok(departures) => departures,
            Err(err) => {
                warn!("departure feed degraded: {err}");
                Vec::new()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeparturesResponse {
    #[serde(default)]
    departures: Vec<WireDeparture>,
}

#[derive(Debug, Deserialize)]
struct WireDeparture {
    destination: String,
    direction_code: DirectionCode,
    #[serde(deserialize_with = "deserialize_expected")]
    expected: DateTime<Utc>,
    journey: WireJourney,
    line: WireLine,
    stop_point: WireStopPoint,
}

#[derive(Debug, Deserialize)]
struct WireJourney {
    id: JourneyId,
}

#[derive(Debug, Deserialize)]
struct WireLine {
    id: LineId,
    designation: String,
    #[serde(default)]
    transport_mode: String,
}

#[derive(Debug, Deserialize)]
struct WireStopPoint {
    id: StopPointId,
    name: String,
}

/// The feed emits RFC 3339 timestamps but omits the offset on some stops;
/// offset-less times are taken as UTC.
fn deserialize_expected<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(stamped) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(stamped.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

/// Keeps bus-mode departures and flattens the wire shape.
fn bus_departures(body: DeparturesResponse) -> Vec<Departure> {
    body.departures
        .into_iter()
        .filter(|d| d.line.transport_mode.eq_ignore_ascii_case("bus"))
        .map(|d| Departure {
            journey_id: d.journey.id,
            line_id: d.line.id,
            designation: d.line.designation,
            direction_code: d.direction_code,
            expected: d.expected,
            stop_point_id: d.stop_point.id,
            stop_point_name: d.stop_point.name,
            destination: d.destination,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "departures": [
            {
                "destination": "Radiohuset",
                "direction_code": 2,
                "expected": "2025-08-14T09:21:30Z",
                "journey": {"id": 551100},
                "line": {"id": 4, "designation": "4", "transport_mode": "BUS"},
                "stop_point": {"id": 40121, "name": "Odenplan"}
            },
            {
                "destination": "Ropsten",
                "direction_code": 1,
                "expected": "2025-08-14T09:23:00",
                "journey": {"id": 551101},
                "line": {"id": 13, "designation": "13", "transport_mode": "METRO"},
                "stop_point": {"id": 40122, "name": "Odenplan"}
            }
        ]
    }"#;

    #[test]
    fn only_bus_departures_survive_decoding() {
        let body: DeparturesResponse = serde_json::from_str(SAMPLE).unwrap();
        let departures = bus_departures(body);
        assert_eq!(departures.len(), 1);
        let dep = &departures[0];
        assert_eq!(dep.journey_id, 551100);
        assert_eq!(dep.designation, "4");
        assert_eq!(dep.stop_point_id, 40121);
        assert_eq!(dep.destination, "Radiohuset");
    }

    #[test]
    fn offsetless_timestamps_are_read_as_utc() {
        let body: DeparturesResponse = serde_json::from_str(SAMPLE).unwrap();
        let naive = &body.departures[1];
        assert_eq!(naive.expected.to_rfc3339(), "2025-08-14T09:23:00+00:00");
    }

    struct ScriptedFeed {
        failing: SiteId,
    }

    impl TransitFeed for ScriptedFeed {
        async fn departures(&self, site: SiteId, _forecast_s: u32) -> Vec<Departure> {
            if site == self.failing {
                return Vec::new();
            }
            vec![Departure {
                journey_id: site * 10,
                line_id: 4,
                designation: "4".into(),
                direction_code: 1,
                expected: Utc::now(),
                stop_point_id: site * 100,
                stop_point_name: format!("stop {site}"),
                destination: "Terminus".into(),
            }]
        }
    }

    #[tokio::test]
    async fn batch_with_empty_site_list_is_empty() {
        let feed = ScriptedFeed { failing: 0 };
        let batch = feed
            .batch_departures(&[], 1200, Duration::from_millis(0))
            .await;
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn batch_keeps_entries_for_failing_sites() {
        let feed = ScriptedFeed { failing: 7 };
        let batch = feed
            .batch_departures(&[5, 7, 9], 1200, Duration::from_millis(0))
            .await;
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[&5].len(), 1);
        assert!(batch[&7].is_empty());
        assert_eq!(batch[&9].len(), 1);
    }
}
