//! 主机配置回调
//!
//! 主机以模板的 `host_config_key` 请求为自己启动一次作业。请求来源 IP
//! 按反向解析名、主机名正向解析、连接地址变量三种方式匹配清单中的主机，
//! 必须恰好匹配一台。

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::models::{Host, UnifiedTemplate};
use conductor_core::{ConductorError, ConductorResult, Repositories};
use tracing::{debug, info, warn};

use crate::controller::{JobController, LaunchResult};

/// 主机名解析
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// IP 对应的主机名
    async fn reverse(&self, ip: IpAddr) -> Vec<String>;

    /// 主机名解析出的地址
    async fn forward(&self, name: &str) -> Vec<IpAddr>;
}

/// 使用系统解析器（hosts 文件与 DNS）
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl SystemResolver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HostResolver for SystemResolver {
    async fn reverse(&self, ip: IpAddr) -> Vec<String> {
        let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip)).await;
        match lookup {
            // 没有 PTR 记录时系统解析器原样返回数字地址
            Ok(Ok(name)) if name.parse::<IpAddr>().is_err() => vec![name],
            Ok(Ok(_)) => Vec::new(),
            Ok(Err(e)) => {
                debug!("反向解析 {} 失败: {}", ip, e);
                Vec::new()
            }
            Err(e) => {
                warn!("反向解析任务异常退出: {}", e);
                Vec::new()
            }
        }
    }

    async fn forward(&self, name: &str) -> Vec<IpAddr> {
        match tokio::net::lookup_host((name, 0)).await {
            Ok(addrs) => addrs.map(|a| a.ip()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

pub struct HostCallbackService {
    repos: Repositories,
    controller: Arc<JobController>,
    resolver: Arc<dyn HostResolver>,
}

impl HostCallbackService {
    pub fn new(
        repos: Repositories,
        controller: Arc<JobController>,
        resolver: Arc<dyn HostResolver>,
    ) -> Self {
        Self {
            repos,
            controller,
            resolver,
        }
    }

    /// 匹配请求来源的主机
    pub async fn find_hosts(&self, inventory_id: i64, remote: IpAddr) -> ConductorResult<Vec<Host>> {
        let hosts: Vec<Host> = self
            .repos
            .inventories
            .list_hosts(inventory_id)
            .await?
            .into_iter()
            .filter(|h| h.active && h.enabled)
            .collect();

        let mut matched: BTreeMap<i64, Host> = BTreeMap::new();
        let names = self.resolver.reverse(remote).await;
        for host in &hosts {
            let by_name = names.iter().any(|n| n == &host.name);
            let by_variable = host
                .connection_address()
                .map(|addr| {
                    addr.parse::<IpAddr>().map(|a| a == remote).unwrap_or(false)
                        || names.iter().any(|n| n == addr)
                })
                .unwrap_or(false);
            if by_name || by_variable {
                matched.insert(host.id, host.clone());
            }
        }

        // 前两种方式都没有结果时再逐个正向解析
        if matched.is_empty() {
            for host in &hosts {
                if self.resolver.forward(&host.name).await.contains(&remote) {
                    matched.insert(host.id, host.clone());
                }
            }
        }
        Ok(matched.into_values().collect())
    }

    pub async fn callback(
        &self,
        template_id: i64,
        host_config_key: &str,
        remote: IpAddr,
    ) -> ConductorResult<LaunchResult> {
        let template = match self.repos.templates.get_by_id(template_id).await? {
            Some(UnifiedTemplate::JobTemplate(t)) => t,
            _ => return Err(ConductorError::not_found("作业模板", template_id)),
        };
        if template.host_config_key.is_empty() || template.host_config_key != host_config_key {
            warn!(template.id = template_id, remote = %remote, "主机回调密钥不匹配");
            return Err(ConductorError::permission("主机回调密钥不匹配"));
        }
        let inventory_id = template
            .inventory_id
            .ok_or_else(|| ConductorError::validation("模板没有清单，无法回调"))?;

        let hosts = self.find_hosts(inventory_id, remote).await?;
        let host = match hosts.as_slice() {
            [host] => host,
            [] => {
                return Err(ConductorError::validation(format!(
                    "没有与 {remote} 匹配的主机"
                )))
            }
            many => {
                return Err(ConductorError::validation(format!(
                    "{} 匹配了 {} 台主机",
                    remote,
                    many.len()
                )))
            }
        };

        info!("主机 {} 请求回调模板 {}", host.name, template_id);
        self.controller
            .launch_callback(template_id, &host.name)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reverse_never_returns_numeric_address() {
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let names = SystemResolver::new().reverse(ip).await;
        assert!(names.iter().all(|n| n.parse::<IpAddr>().is_err()));
    }

    #[tokio::test]
    async fn test_forward_resolves_literal_address() {
        let addrs = SystemResolver::new().forward("127.0.0.1").await;
        assert!(addrs.contains(&"127.0.0.1".parse::<IpAddr>().unwrap()));
    }
}
