//! Green-aware multimodal route planning.
//!
//! The engine plans walking and one-transfer bus journeys between two
//! geographic points, scoring every candidate by a convex combination of
//! travel time and accumulated greenness (DGVI, a distance-adjusted
//! green-view index). Road topology, greenness samples and static transit
//! tables are served by a [`store::SpatialStore`]; live bus departures come
//! from a [`feed::TransitFeed`].

pub mod config;
pub mod dgvi;
pub mod error;
pub mod feed;
pub mod model;
pub mod planner;
pub mod prelude;
pub mod solver;
pub mod store;

mod cancel;

pub use cancel::CancelToken;
pub use config::PlannerConfig;
pub use error::{Error, Result};

/// Stable identifier of a road edge.
pub type RoadId = i64;
/// Identifier of a road-graph vertex from the precomputed topology.
pub type VertexId = i64;
/// Identifier of a bus site (the user-facing stop aggregate).
pub type SiteId = i64;
/// Identifier of a stop point (a single platform within a site).
pub type StopPointId = i64;
/// Identifier of a bus line.
pub type LineId = i64;
/// Direction code of a line; a (line, direction) pair names one route path.
pub type DirectionCode = i16;

/// Upper bound the departure feed accepts for its forecast window, seconds.
pub const MAX_FORECAST_SECONDS: u32 = 1200;
