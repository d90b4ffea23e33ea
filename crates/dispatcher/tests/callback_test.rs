mod common;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use conductor_core::models::{Host, JobDetails, LaunchType};
use conductor_core::ConductorError;
use conductor_dispatcher::{HostCallbackService, HostResolver};
use serde_json::json;
use tracing_test::traced_test;

use common::fixture;

/// 固定映射的解析器
#[derive(Default)]
struct StaticResolver {
    reverse: HashMap<IpAddr, Vec<String>>,
    forward: HashMap<String, Vec<IpAddr>>,
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn reverse(&self, ip: IpAddr) -> Vec<String> {
        self.reverse.get(&ip).cloned().unwrap_or_default()
    }

    async fn forward(&self, name: &str) -> Vec<IpAddr> {
        self.forward.get(name).cloned().unwrap_or_default()
    }
}

fn ip(text: &str) -> IpAddr {
    text.parse().unwrap()
}

#[tokio::test]
#[traced_test]
async fn test_callback_matches_single_host() -> Result<()> {
    let f = fixture().await?;
    let inventory = f.inventory_with_hosts(&["web1", "web2"]).await?;
    let mut db = Host::new(inventory.id, "db1");
    db.variables = json!({ "ansible_host": "10.0.0.9" });
    f.inventory.create_host(&db).await?;
    let project = f.manual_project().await?;
    let template = f
        .job_template(
            "provision",
            project,
            inventory.id,
            json!({ "host_config_key": "s3cret", "limit": "all" }),
        )
        .await?;

    let mut resolver = StaticResolver::default();
    resolver
        .reverse
        .insert(ip("10.0.0.5"), vec!["web1".to_string()]);
    resolver
        .forward
        .insert("web2".to_string(), vec![ip("10.0.0.6")]);
    let service = HostCallbackService::new(
        f.repos.clone(),
        f.controller.clone(),
        Arc::new(resolver),
    );

    // 反向解析名
    let result = service.callback(template, "s3cret", ip("10.0.0.5")).await?;
    let job = f.repos.jobs.get_by_id(result.job_id).await?.unwrap();
    assert_eq!(job.launch_type, LaunchType::Callback);
    let JobDetails::Job(fields) = &job.details else {
        panic!("expected playbook job");
    };
    assert_eq!(fields.limit, "web1");

    // 连接地址变量
    let result = service.callback(template, "s3cret", ip("10.0.0.9")).await?;
    let job = f.repos.jobs.get_by_id(result.job_id).await?.unwrap();
    assert!(matches!(&job.details, JobDetails::Job(fields) if fields.limit == "db1"));

    // 正向解析
    let hosts = service.find_hosts(inventory.id, ip("10.0.0.6")).await?;
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].name, "web2");
    Ok(())
}

#[tokio::test]
async fn test_callback_rejections() -> Result<()> {
    let f = fixture().await?;
    let inventory = f.inventory_with_hosts(&["web1", "web2"]).await?;
    let project = f.manual_project().await?;
    let template = f
        .job_template(
            "provision",
            project,
            inventory.id,
            json!({ "host_config_key": "s3cret" }),
        )
        .await?;
    let closed = f.job_template("closed", project, inventory.id, json!({})).await?;

    let mut resolver = StaticResolver::default();
    resolver.reverse.insert(
        ip("10.0.0.7"),
        vec!["web1".to_string(), "web2".to_string()],
    );
    let service = HostCallbackService::new(
        f.repos.clone(),
        f.controller.clone(),
        Arc::new(resolver),
    );

    let err = service
        .callback(template, "wrong", ip("10.0.0.7"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::Permission(_)));

    // 未设置密钥的模板不接受回调
    let err = service
        .callback(closed, "", ip("10.0.0.7"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::Permission(_)));

    let err = service
        .callback(template, "s3cret", ip("10.0.0.7"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::Validation(_)));

    let err = service
        .callback(template, "s3cret", ip("192.168.1.1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::Validation(_)));
    Ok(())
}

#[tokio::test]
async fn test_distinct_callbacks_run_together() -> Result<()> {
    let f = fixture().await?;
    let inventory = f.inventory_with_hosts(&["web1", "web2"]).await?;
    let project = f.manual_project().await?;
    let template = f
        .job_template(
            "provision",
            project,
            inventory.id,
            json!({ "host_config_key": "s3cret" }),
        )
        .await?;

    let a = f.controller.launch_callback(template, "web1").await?;
    let b = f.controller.launch_callback(template, "web2").await?;
    let same = f.controller.launch_callback(template, "web1").await?;

    let report = f.task_manager.run_cycle().await?;
    assert_eq!(report.promoted, vec![a.job_id, b.job_id]);
    assert_eq!(report.blocked, vec![same.job_id]);
    Ok(())
}
