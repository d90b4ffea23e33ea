//! 配置管理
//!
//! 配置按以下顺序加载，后者覆盖前者：
//!
//! 1. 内置默认值
//! 2. TOML 配置文件
//! 3. `CONDUCTOR_` 前缀的环境变量（嵌套字段使用 `__` 分隔）
//! 4. 平台约定的环境变量：`SECRET_KEY`、`SYSTEM_UUID`、`PROJECTS_ROOT`、`JOBOUTPUT_ROOT`

pub mod models;

pub use models::*;
