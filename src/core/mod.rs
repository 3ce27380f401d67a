pub mod config;
pub mod error;
pub mod health;
pub mod logging;

pub use config::{Config, WatcherConfig};
pub use error::{ApiError, DeliveryError, StorageError, WatchError, WatchResult};
pub use health::{EngineHealth, HealthChecker, HealthStatus};
