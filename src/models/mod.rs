mod api;

pub use api::{
    HealthResponse, LimitsInfo, SecurityStats, SecurityStatsResponse, ServiceInfo,
};
