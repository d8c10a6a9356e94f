mod health;

pub use health::{HealthResponse, health_check, readiness_check};
