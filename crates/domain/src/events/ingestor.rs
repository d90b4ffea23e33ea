use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use conductor_core::models::{
    JobEvent, JobEventKind, JobHostSummary, HOST_COUNTER_KEYS,
};
use conductor_core::{ConductorError, ConductorResult, Repositories};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::classify::classify;
use crate::inventory::InventoryService;

/// 执行器回传的单个事件
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventPayload {
    pub event: String,
    pub event_data: Value,
    pub host: Option<String>,
    pub uuid: Option<String>,
    pub counter: Option<i64>,
    pub stdout: Option<String>,
    pub start_line: Option<i64>,
    pub end_line: Option<i64>,
}

impl EventPayload {
    pub fn verbose(counter: i64, stdout: String, start_line: i64, end_line: i64) -> Self {
        Self {
            event: JobEventKind::Verbose.as_str().to_string(),
            event_data: Value::Object(Default::default()),
            counter: Some(counter),
            stdout: Some(stdout),
            start_line: Some(start_line),
            end_line: Some(end_line),
            ..Default::default()
        }
    }
}

/// 单个作业的写入状态
#[derive(Debug, Default)]
struct JobTrail {
    loaded: bool,
    inventory_id: Option<i64>,
    last_counter: i64,
    /// 每种类型最近一次事件的 (counter, id)
    latest: HashMap<JobEventKind, (i64, i64)>,
}

impl JobTrail {
    fn record(&mut self, kind: JobEventKind, counter: i64, id: i64) {
        self.last_counter = self.last_counter.max(counter);
        let slot = self.latest.entry(kind).or_insert((counter, id));
        if counter >= slot.0 {
            *slot = (counter, id);
        }
    }

    fn parent_for(&self, kind: JobEventKind) -> Option<i64> {
        kind.parent_kinds()
            .iter()
            .filter_map(|k| self.latest.get(k))
            .max_by_key(|(counter, _)| *counter)
            .map(|(_, id)| *id)
    }
}

/// 事件写入器
///
/// 按到达顺序写入事件并挂接父事件；stats 事件到达时生成主机汇总、
/// 向上传播失败/变更标记并请求清单重算。
pub struct EventIngestor {
    repos: Repositories,
    inventory: Arc<InventoryService>,
    trails: std::sync::Mutex<HashMap<i64, Arc<Mutex<JobTrail>>>>,
}

impl EventIngestor {
    pub fn new(repos: Repositories, inventory: Arc<InventoryService>) -> Self {
        Self {
            repos,
            inventory,
            trails: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn trail(&self, job_id: i64) -> Arc<Mutex<JobTrail>> {
        let mut trails = self
            .trails
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        trails.entry(job_id).or_default().clone()
    }

    /// 首次写入时从已存储的事件恢复状态
    async fn load_trail(&self, job_id: i64, trail: &mut JobTrail) -> ConductorResult<()> {
        let job = self
            .repos
            .jobs
            .get_by_id(job_id)
            .await?
            .ok_or_else(|| ConductorError::not_found("作业", job_id))?;
        trail.inventory_id = job.inventory_id();
        for event in self.repos.events.list_events(job_id).await? {
            trail.record(event.kind, event.counter, event.id);
        }
        trail.loaded = true;
        Ok(())
    }

    #[instrument(skip(self, payload), fields(event = %payload.event))]
    pub async fn ingest(&self, job_id: i64, payload: EventPayload) -> ConductorResult<JobEvent> {
        let kind = JobEventKind::parse(&payload.event).ok_or_else(|| {
            ConductorError::validation(format!("未知的事件类型: {}", payload.event))
        })?;

        let trail = self.trail(job_id);
        let mut trail = trail.lock().await;
        if !trail.loaded {
            self.load_trail(job_id, &mut trail).await?;
        }

        let classified = classify(kind, &payload.event_data);
        let counter = match payload.counter {
            Some(c) if c > trail.last_counter => c,
            _ => trail.last_counter + 1,
        };

        let host_name = payload
            .host
            .clone()
            .filter(|h| !h.is_empty())
            .unwrap_or(classified.host_name);
        let host_id = match (trail.inventory_id, host_name.is_empty()) {
            (Some(inventory_id), false) => self
                .repos
                .inventories
                .find_host(inventory_id, &host_name)
                .await?
                .map(|h| h.id),
            _ => None,
        };

        let mut event = JobEvent::new(job_id, classified.kind, payload.event_data);
        event.uuid = payload.uuid.unwrap_or_default();
        event.parent_id = trail.parent_for(classified.kind);
        event.host_id = host_id;
        event.host_name = host_name;
        event.play = classified.play;
        event.task = classified.task;
        event.role = classified.role;
        event.counter = counter;
        event.failed = classified.failed;
        event.changed = classified.changed;
        event.stdout = payload.stdout.unwrap_or_default();
        event.start_line = payload.start_line.unwrap_or_default();
        event.end_line = payload.end_line.unwrap_or_default();

        let created = self.repos.events.create_event(&event).await?;
        trail.record(created.kind, created.counter, created.id);
        let inventory_id = trail.inventory_id;
        drop(trail);

        if created.kind == JobEventKind::PlaybookOnStats {
            self.propagate_flags(job_id).await?;
            self.process_stats(job_id, inventory_id, &created.event_data)
                .await?;
        }
        Ok(created)
    }

    /// 将失败与变更标记沿父链向上传播，重复执行结果不变
    pub async fn propagate_flags(&self, job_id: i64) -> ConductorResult<usize> {
        let mut events = self.repos.events.list_events(job_id).await?;
        let index: HashMap<i64, usize> = events
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id, i))
            .collect();
        let original: Vec<(bool, bool)> = events.iter().map(|e| (e.failed, e.changed)).collect();

        // 父事件的 counter 总是更小，倒序一遍即可传播到根
        for i in (0..events.len()).rev() {
            let (failed, changed, parent) = (events[i].failed, events[i].changed, events[i].parent_id);
            if let Some(&p) = parent.and_then(|id| index.get(&id)) {
                events[p].failed |= failed;
                events[p].changed |= changed;
            }
        }

        let updates: Vec<(i64, bool, bool)> = events
            .iter()
            .zip(original)
            .filter(|(e, (failed, changed))| e.failed != *failed || e.changed != *changed)
            .map(|(e, _)| (e.id, e.failed, e.changed))
            .collect();
        if !updates.is_empty() {
            self.repos.events.update_event_flags(&updates).await?;
        }
        debug!("作业 {} 传播标记，更新 {} 个事件", job_id, updates.len());
        Ok(updates.len())
    }

    /// 根据 stats 事件写入主机汇总
    async fn process_stats(
        &self,
        job_id: i64,
        inventory_id: Option<i64>,
        data: &Value,
    ) -> ConductorResult<()> {
        let mut host_names = BTreeSet::new();
        for key in HOST_COUNTER_KEYS {
            if let Some(map) = data.get(key).and_then(Value::as_object) {
                host_names.extend(map.keys().cloned());
            }
        }

        for host_name in host_names {
            let mut summary = JobHostSummary::new(job_id, host_name.clone());
            for key in HOST_COUNTER_KEYS {
                let value = data
                    .get(key)
                    .and_then(|m| m.get(&host_name))
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                summary.set_counter(key, value);
            }
            summary.refresh_failed();

            let host = match inventory_id {
                Some(inventory_id) => {
                    self.repos
                        .inventories
                        .find_host(inventory_id, &host_name)
                        .await?
                }
                None => None,
            };
            summary.host_id = host.as_ref().map(|h| h.id);
            let saved = self.repos.events.upsert_host_summary(&summary).await?;

            if let Some(mut host) = host {
                host.last_job_id = Some(job_id);
                host.last_job_host_summary_id = Some(saved.id);
                host.has_active_failures = saved.failed;
                self.repos.inventories.update_host(&host).await?;
            } else {
                warn!("作业 {} 的主机 {} 不在清单中", job_id, host_name);
            }
        }

        if let Some(inventory_id) = inventory_id {
            self.inventory.update_computed_fields(inventory_id).await?;
        }
        info!("作业 {} 主机汇总已更新", job_id);
        Ok(())
    }

    /// 作业结束后释放缓存的写入状态
    pub fn finish(&self, job_id: i64) {
        let mut trails = self
            .trails
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        trails.remove(&job_id);
    }
}
