pub use crate::MAX_FORECAST_SECONDS;

// Re-export key components
pub use crate::config::PlannerConfig;
pub use crate::dgvi::{edge_dgvi, rebuild_month, waiting_dgvi, walking_dgvi};
pub use crate::error::{Error, Result};
pub use crate::feed::{HttpTransitFeed, TransitFeed};
pub use crate::model::{Month, RoutePlan, RouteType, Segment};
pub use crate::planner::{LatLon, PlanRequest, Preferences, RoutePlanner};
pub use crate::solver::{ride_geometry, walking_path};
pub use crate::store::{CostExpr, EdgePath, MemoryStore, SpatialStore, StoreSnapshot};

// Cancellation and identifier types
pub use crate::CancelToken;
pub use crate::{DirectionCode, LineId, RoadId, SiteId, StopPointId, VertexId};
