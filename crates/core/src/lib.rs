pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod retry;
pub mod traits;
pub mod triggers;
pub mod vars;

pub use config::AppConfig;
pub use errors::*;
pub use logging::init_logging;
pub use retry::RetryConfig;
pub use traits::*;
pub use triggers::{TriggerContext, TriggerGuard};
