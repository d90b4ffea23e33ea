use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use conductor::cli::{exit_code, run_command, Cli};
use conductor::{AppMode, Application, ShutdownManager};
use conductor_core::models::{Host, Inventory, JobStatus};
use conductor_core::{AppConfig, TriggerContext};
use conductor_domain::InventoryService;
use conductor_infrastructure::SqliteStore;
use serde_json::Value;
use tempfile::TempDir;
use tracing_test::traced_test;

const CONFIG: &str = r#"
[database]
url = "sqlite::memory:"
max_connections = 1
min_connections = 1

[dispatcher]
schedule_interval_seconds = 1
schedule_tick_seconds = 30
capacity_override = 10

[worker]
worker_id = "app-test-worker"
poll_interval_ms = 50
cancel_poll_interval_ms = 50
cancel_timeout_seconds = 1

[sandbox]
enabled = false

[security]
secret_key = "app-test-secret-key-01"
system_uuid = "6f1c2a5e-3d1b-4c8e-9a7f-0b2d4e6f8a1c"
"#;

struct TestApp {
    app: Arc<Application>,
    _root: TempDir,
}

async fn test_app(runner_body: &str) -> Result<TestApp> {
    let root = TempDir::new()?;
    let projects = root.path().join("projects");
    std::fs::create_dir_all(projects.join("playbooks"))?;
    let job_status = root.path().join("job_status");
    std::fs::create_dir_all(&job_status)?;

    let runner = root.path().join("runner.sh");
    std::fs::write(&runner, format!("#!/bin/sh\n{runner_body}\n"))?;
    std::fs::set_permissions(&runner, std::fs::Permissions::from_mode(0o755))?;

    let mut config = AppConfig::from_toml(CONFIG)?;
    config.worker.playbook_runner = runner.display().to_string();
    config.worker.projects_root = projects.display().to_string();
    config.worker.joboutput_root = job_status.display().to_string();

    let store = SqliteStore::in_memory().await?;
    Ok(TestApp {
        app: Arc::new(Application::with_store(config, AppMode::All, store)),
        _root: root,
    })
}

/// 通过命令行入口执行一次性命令
async fn cli(app: &Application, args: &[&str]) -> Result<Value> {
    let cli = Cli::try_parse_from(std::iter::once("conductor").chain(args.iter().copied()))?;
    let output = run_command(app, cli.command).await?;
    Ok(serde_json::from_str(&output)?)
}

/// 创建清单、项目和作业模板，返回模板 ID
async fn job_template(app: &Application) -> Result<i64> {
    let repos = app.repositories();
    let inventory = repos
        .inventories
        .create_inventory(&Inventory {
            name: "prod".to_string(),
            organization_id: 1,
            ..Default::default()
        })
        .await?;
    InventoryService::new(repos.inventories.clone(), Arc::new(TriggerContext::new()))
        .create_host(&Host::new(inventory.id, "web1"))
        .await?;

    let project = cli(
        app,
        &[
            "create-template",
            "project",
            r#"{"name": "playbooks", "local_path": "playbooks"}"#,
        ],
    )
    .await?;
    let fields = serde_json::json!({
        "name": "deploy",
        "project_id": project["id"],
        "inventory_id": inventory.id,
        "playbook": "site.yml"
    });
    let template = cli(app, &["create-template", "job_template", &fields.to_string()]).await?;
    Ok(template["id"].as_i64().unwrap_or_default())
}

async fn wait_finished(app: &Application, job_id: i64) -> Result<JobStatus> {
    let mut status = JobStatus::New;
    for _ in 0..200 {
        let report = app.controller().status(job_id).await?;
        status = report.status;
        if status.is_finished() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Ok(status)
}

#[tokio::test]
#[traced_test]
async fn test_launched_job_runs_to_completion() -> Result<()> {
    let t = test_app("echo 'hello from conductor'").await?;
    let template_id = job_template(&t.app).await?;

    let launched = cli(&t.app, &["launch", &template_id.to_string(), "--limit", "web1"]).await?;
    let job_id = launched["job_id"].as_i64().unwrap_or_default();
    assert!(job_id > 0);

    let shutdown = ShutdownManager::new();
    let handle = {
        let app = t.app.clone();
        let rx = shutdown.subscribe().await;
        tokio::spawn(async move { app.run(rx).await })
    };

    let status = wait_finished(&t.app, job_id).await?;
    // 停止后连接池随之关闭，先读取结果
    let job = t.app.repositories().jobs.get_by_id(job_id).await?.unwrap();
    shutdown.shutdown().await;
    tokio::time::timeout(Duration::from_secs(10), handle).await???;

    assert_eq!(status, JobStatus::Successful);
    assert!(job.execution_node.is_some());
    assert!(job.result_stdout.contains("hello from conductor"));
    assert!(!job.failed);
    Ok(())
}

#[tokio::test]
async fn test_cancel_pending_job_from_cli() -> Result<()> {
    let t = test_app("exit 0").await?;
    let template_id = job_template(&t.app).await?;

    let launched = cli(&t.app, &["launch", &template_id.to_string()]).await?;
    let job_id = launched["job_id"].as_i64().unwrap_or_default();

    let canceled = cli(&t.app, &["cancel", &job_id.to_string()]).await?;
    assert_eq!(canceled["status"], "canceled");

    let report = cli(&t.app, &["status", &job_id.to_string()]).await?;
    assert_eq!(report["status"], "canceled");
    assert_eq!(report["next_event_counter"], 1);
    Ok(())
}

#[tokio::test]
async fn test_cli_errors_map_to_exit_codes() -> Result<()> {
    let t = test_app("exit 0").await?;

    let missing = cli(&t.app, &["status", "999"]).await.unwrap_err();
    assert_eq!(exit_code(&missing), 4);

    let invalid = cli(&t.app, &["create-template", "job_template", r#"{"name": ""}"#])
        .await
        .unwrap_err();
    assert_eq!(exit_code(&invalid), 1);

    let malformed = cli(&t.app, &["create-template", "project", "not json"])
        .await
        .unwrap_err();
    assert_eq!(exit_code(&malformed), 1);
    Ok(())
}
