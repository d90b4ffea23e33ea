//! 角色图
//!
//! 资源声明隐式角色，成员关系沿父边继承。祖先闭包物化为
//! `role_ancestors` 表，权限判断只需一次连接查询。

pub mod catalogue;
pub mod closure;
pub mod service;

pub use catalogue::{definition, definitions, RoleDefinition};
pub use closure::compute_ancestors;
pub use service::{RoleLinks, RoleService};
