#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use conductor_core::models::{queues, Host, Inventory, JobStatus, Message, MessageType, TemplateKind};
use conductor_core::{MessageQueue, Repositories, TriggerContext};
use conductor_dispatcher::{JobController, TaskManager};
use conductor_domain::{ActivityRecorder, EventIngestor, InventoryService, RoleService, Vault};
use conductor_infrastructure::{InMemoryMessageQueue, MetricsCollector, SqliteStore};
use serde_json::json;

pub const SECRET_KEY: &str = "test-secret-key-0123";

pub struct Fixture {
    pub _store: SqliteStore,
    pub repos: Repositories,
    pub queue: Arc<InMemoryMessageQueue>,
    pub vault: Arc<Vault>,
    pub roles: Arc<RoleService>,
    pub inventory: Arc<InventoryService>,
    pub ingestor: Arc<EventIngestor>,
    pub controller: Arc<JobController>,
    pub task_manager: Arc<TaskManager>,
}

pub async fn fixture() -> Result<Fixture> {
    fixture_with_capacity(1000).await
}

pub async fn fixture_with_capacity(capacity: i64) -> Result<Fixture> {
    let store = SqliteStore::in_memory().await?;
    let repos = store.repositories();
    let triggers = Arc::new(TriggerContext::new());
    let queue = Arc::new(InMemoryMessageQueue::new());
    let vault = Arc::new(Vault::new(SECRET_KEY));
    let roles = Arc::new(RoleService::new(repos.roles.clone()));
    let inventory = Arc::new(InventoryService::new(
        repos.inventories.clone(),
        triggers.clone(),
    ));
    let ingestor = Arc::new(EventIngestor::new(repos.clone(), inventory.clone()));
    let metrics = Arc::new(MetricsCollector::new());

    let controller = Arc::new(JobController::new(
        repos.clone(),
        vault.clone(),
        roles.clone(),
        ActivityRecorder::new(repos.activity.clone(), triggers),
        ingestor.clone(),
        queue.clone(),
        metrics.clone(),
    ));
    let task_manager = Arc::new(TaskManager::new(
        repos.clone(),
        queue.clone(),
        inventory.clone(),
        ingestor.clone(),
        metrics,
        capacity,
    ));

    Ok(Fixture {
        _store: store,
        repos,
        queue,
        vault,
        roles,
        inventory,
        ingestor,
        controller,
        task_manager,
    })
}

impl Fixture {
    pub async fn inventory_with_hosts(&self, hosts: &[&str]) -> Result<Inventory> {
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
        Ok(inventory)
    }

    pub async fn manual_project(&self) -> Result<i64> {
        Ok(self
            .controller
            .create_template(
                TemplateKind::Project,
                json!({ "name": "playbooks", "local_path": "playbooks" }),
            )
            .await?)
    }

    pub async fn git_project(&self) -> Result<i64> {
        Ok(self
            .controller
            .create_template(
                TemplateKind::Project,
                json!({
                    "name": "site",
                    "scm_type": "git",
                    "scm_url": "https://git.example.com/site.git",
                    "scm_update_on_launch": true
                }),
            )
            .await?)
    }

    /// 启动时同步的云清单来源
    pub async fn cloud_source(&self, inventory_id: i64, cache_timeout: i64) -> Result<i64> {
        Ok(self
            .controller
            .create_template(
                TemplateKind::InventorySource,
                json!({
                    "name": "ec2",
                    "inventory_id": inventory_id,
                    "source": "ec2",
                    "update_on_launch": true,
                    "update_cache_timeout": cache_timeout
                }),
            )
            .await?)
    }

    pub async fn job_template(
        &self,
        name: &str,
        project_id: i64,
        inventory_id: i64,
        extra: serde_json::Value,
    ) -> Result<i64> {
        let mut fields = json!({
            "name": name,
            "project_id": project_id,
            "inventory_id": inventory_id,
            "playbook": "site.yml"
        });
        if let (Some(target), Some(extra)) = (fields.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                target.insert(k.clone(), v.clone());
            }
        }
        Ok(self
            .controller
            .create_template(TemplateKind::JobTemplate, fields)
            .await?)
    }

    pub async fn status_of(&self, job_id: i64) -> Result<JobStatus> {
        Ok(self
            .repos
            .jobs
            .get_by_id(job_id)
            .await?
            .map(|j| j.status)
            .unwrap_or(JobStatus::New))
    }

    /// 模拟 worker 结束作业并上报
    pub async fn finish_job(&self, job_id: i64, status: JobStatus) -> Result<()> {
        let mut job = self.repos.jobs.get_by_id(job_id).await?.expect("job exists");
        job.update_status(status);
        self.repos.jobs.update(&job).await?;
        self.queue
            .publish_message(queues::SCHEDULER, &Message::job_completed(job_id, status))
            .await?;
        Ok(())
    }

    pub async fn dispatched(&self) -> Result<Vec<i64>> {
        Ok(self
            .queue
            .consume_messages(queues::JOBS)
            .await?
            .into_iter()
            .filter_map(|m| match m.message_type {
                MessageType::JobDispatch { job_id } => Some(job_id),
                _ => None,
            })
            .collect())
    }
}
