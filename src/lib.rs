pub mod app;
pub mod cli;
pub mod shutdown;

pub use app::{AppMode, Application};
pub use shutdown::ShutdownManager;
