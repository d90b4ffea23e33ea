pub mod database;
pub mod in_memory_queue;
pub mod observability;

pub use database::*;
pub use in_memory_queue::{InMemoryMessageQueue, InMemoryQueueConfig};
pub use observability::*;
