use std::sync::Arc;

use conductor_core::models::{ActivityEntry, ActivityOperation};
use conductor_core::{ActivityStreamRepository, ConductorResult, TriggerContext};
use serde_json::Value;
use tracing::debug;

/// 活动流记录器，活动流被关闭时静默跳过
pub struct ActivityRecorder {
    repo: Arc<dyn ActivityStreamRepository>,
    triggers: Arc<TriggerContext>,
}

impl ActivityRecorder {
    pub fn new(repo: Arc<dyn ActivityStreamRepository>, triggers: Arc<TriggerContext>) -> Self {
        Self { repo, triggers }
    }

    pub async fn record(
        &self,
        operation: ActivityOperation,
        object_type: &str,
        object_id: i64,
        changes: Value,
        actor_id: Option<i64>,
    ) -> ConductorResult<Option<ActivityEntry>> {
        if !self.triggers.activity_stream_enabled() {
            debug!("活动流已关闭，跳过 {} {}({})", operation.as_str(), object_type, object_id);
            return Ok(None);
        }
        let entry = ActivityEntry::new(operation, object_type, object_id, changes).with_actor(actor_id);
        Ok(Some(self.repo.record(&entry).await?))
    }

    pub async fn history(&self, object_type: &str, object_id: i64) -> ConductorResult<Vec<ActivityEntry>> {
        self.repo.list_for_object(object_type, object_id).await
    }
}
