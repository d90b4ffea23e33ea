//! 清单图：组/主机关系、传递闭包与派生字段

pub mod computed;
pub mod graph;
pub mod service;

pub use computed::compute;
pub use graph::{InventoryGraph, MAX_DEPTH};
pub use service::InventoryService;
