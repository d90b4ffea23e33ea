#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use conductor_core::config::{SandboxConfig, WorkerConfig};
use conductor_core::models::{
    Host, Inventory, JobDetails, JobFields, JobStatus, Project, UnifiedJob, UnifiedTemplate,
};
use conductor_core::{Repositories, TriggerContext};
use conductor_domain::{EventIngestor, InventoryService, Vault};
use conductor_infrastructure::{InMemoryMessageQueue, SqliteStore};
use conductor_worker::output::encode_event;
use conductor_worker::JobExecutor;
use serde_json::Value;
use tempfile::TempDir;

pub const SECRET_KEY: &str = "test-secret-key-0123";

pub struct Fixture {
    pub _store: SqliteStore,
    pub repos: Repositories,
    pub queue: Arc<InMemoryMessageQueue>,
    pub vault: Arc<Vault>,
    pub inventory: Arc<InventoryService>,
    pub ingestor: Arc<EventIngestor>,
    pub root: TempDir,
    pub config: WorkerConfig,
}

pub async fn fixture() -> Result<Fixture> {
    let store = SqliteStore::in_memory().await?;
    let repos = store.repositories();
    let inventory = Arc::new(InventoryService::new(
        repos.inventories.clone(),
        Arc::new(TriggerContext::new()),
    ));
    let ingestor = Arc::new(EventIngestor::new(repos.clone(), inventory.clone()));

    let root = TempDir::new()?;
    let projects = root.path().join("projects");
    std::fs::create_dir_all(projects.join("playbooks"))?;
    let job_status = root.path().join("job_status");
    std::fs::create_dir_all(&job_status)?;

    let config = WorkerConfig {
        projects_root: projects.display().to_string(),
        joboutput_root: job_status.display().to_string(),
        cancel_poll_interval_ms: 50,
        cancel_timeout_seconds: 1,
        poll_interval_ms: 50,
        ..Default::default()
    };

    Ok(Fixture {
        _store: store,
        repos,
        queue: Arc::new(InMemoryMessageQueue::new()),
        vault: Arc::new(Vault::new(SECRET_KEY)),
        inventory,
        ingestor,
        root,
        config,
    })
}

/// 按回调格式编码一组事件
pub fn encoded(events: &[Value]) -> Vec<u8> {
    events.iter().flat_map(|e| encode_event(e, 16)).collect()
}

impl Fixture {
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    pub fn write_bytes(&self, name: &str, bytes: &[u8]) -> Result<String> {
        let path = self.path(name);
        std::fs::write(&path, bytes)?;
        Ok(path.display().to_string())
    }

    /// 写入可执行的 sh 脚本
    pub fn write_script(&self, name: &str, body: &str) -> Result<String> {
        let path = self.path(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        Ok(path.display().to_string())
    }

    pub fn executor_with(&self, config: WorkerConfig, sandbox: SandboxConfig) -> JobExecutor {
        JobExecutor::new(
            self.repos.clone(),
            self.vault.clone(),
            self.ingestor.clone(),
            self.inventory.clone(),
            config,
            sandbox,
        )
    }

    /// 以指定脚本作为 playbook 执行器，不启用沙箱
    pub fn executor(&self, playbook_runner: &str) -> JobExecutor {
        let config = WorkerConfig {
            playbook_runner: playbook_runner.to_string(),
            ..self.config.clone()
        };
        self.executor_with(
            config,
            SandboxConfig {
                enabled: false,
                ..Default::default()
            },
        )
    }

    pub async fn inventory_with_hosts(&self, hosts: &[&str]) -> Result<i64> {
        let inventory = self
            .repos
            .inventories
            .create_inventory(&Inventory {
                name: "prod".to_string(),
                organization_id: 1,
                ..Default::default()
            })
            .await?;
        for name in hosts {
            self.inventory
                .create_host(&Host::new(inventory.id, *name))
                .await?;
        }
        Ok(inventory.id)
    }

    pub async fn project(&self) -> Result<i64> {
        let created = self
            .repos
            .templates
            .create(&UnifiedTemplate::Project(Project {
                name: "playbooks".to_string(),
                local_path: "playbooks".to_string(),
                ..Default::default()
            }))
            .await?;
        Ok(created.id())
    }

    /// 已被调度器放行的作业
    pub async fn running_job(&self, details: JobDetails) -> Result<UnifiedJob> {
        let mut job = self
            .repos
            .jobs
            .create(&UnifiedJob::new("test job", None, details))
            .await?;
        job.update_status(JobStatus::Running);
        self.repos.jobs.update(&job).await?;
        Ok(job)
    }

    pub async fn running_playbook(&self, fields: JobFields) -> Result<UnifiedJob> {
        let inventory_id = match fields.inventory_id {
            Some(id) => id,
            None => self.inventory_with_hosts(&["web1"]).await?,
        };
        let project_id = match fields.project_id {
            Some(id) => id,
            None => self.project().await?,
        };
        self.running_job(JobDetails::Job(JobFields {
            inventory_id: Some(inventory_id),
            project_id: Some(project_id),
            playbook: "site.yml".to_string(),
            ..fields
        }))
        .await
    }

    pub async fn stored(&self, job_id: i64) -> Result<UnifiedJob> {
        Ok(self
            .repos
            .jobs
            .get_by_id(job_id)
            .await?
            .expect("job exists"))
    }
}
