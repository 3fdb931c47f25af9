mod health;
pub mod predict;
mod security;

pub use health::{health_check, readiness_check, service_info};
pub use predict::predict_image;
pub use security::security_stats;
