//! 编排核心的领域逻辑
//!
//! 纯计算部分（加密、角色闭包、清单派生字段、事件分类、问卷校验）
//! 与基于仓储接口的服务放在一起，存储实现由 infrastructure 提供。

pub mod activity;
pub mod credentials;
pub mod events;
pub mod inventory;
pub mod launch;
pub mod rbac;
pub mod ssh_key;
pub mod survey;
pub mod token;
pub mod vault;

pub use activity::ActivityRecorder;
pub use credentials::CredentialService;
pub use events::{EventIngestor, EventPayload};
pub use inventory::InventoryService;
pub use launch::{LaunchOverrides, LaunchPlan};
pub use rbac::RoleService;
pub use vault::{SecretValue, Vault, ENCRYPTED_PREFIX};
