//! Data model of the planning engine
//!
//! Road network, greenness layers, static transit tables and the route plans
//! assembled per request.

pub mod greenery;
pub mod road;
pub mod route;
pub mod transit;

pub use greenery::{DgviStats, GviPoint, Month, RoadDgvi};
pub use road::{RoadEdge, RoadVertex};
pub use route::{
    ApiRoutePlan, BusRideSegment, BusWaitingSegment, IntraSiteTransfer, LineRef, RoutePlan,
    RouteType, Segment, StopRef, TransferWait, WalkingSegment,
};
pub use transit::{
    Departure, JourneyId, NearbySite, NextStop, ReachableSite, Site, StopPoint, StopSequenceEdge,
};
