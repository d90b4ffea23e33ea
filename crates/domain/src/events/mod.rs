//! 作业事件写入：分类、父事件挂接、标记传播与主机汇总

pub mod classify;
pub mod ingestor;

pub use classify::{classify, Classification};
pub use ingestor::{EventIngestor, EventPayload};
