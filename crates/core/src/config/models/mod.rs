pub mod app_config;
pub mod database;
pub mod dispatcher_worker;
pub mod observability;
pub mod sandbox;
pub mod security;

pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use dispatcher_worker::{DispatcherConfig, WorkerConfig};
pub use observability::ObservabilityConfig;
pub use sandbox::SandboxConfig;
pub use security::SecurityConfig;
