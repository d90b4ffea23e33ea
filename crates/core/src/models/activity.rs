use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityOperation {
    Create,
    Update,
    Delete,
    Associate,
    Disassociate,
}

impl ActivityOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityOperation::Create => "create",
            ActivityOperation::Update => "update",
            ActivityOperation::Delete => "delete",
            ActivityOperation::Associate => "associate",
            ActivityOperation::Disassociate => "disassociate",
        }
    }
}

/// 活动流记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub operation: ActivityOperation,
    pub object_type: String,
    pub object_id: i64,
    pub changes: serde_json::Value,
    pub actor_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(
        operation: ActivityOperation,
        object_type: impl Into<String>,
        object_id: i64,
        changes: serde_json::Value,
    ) -> Self {
        Self {
            id: 0,
            operation,
            object_type: object_type.into(),
            object_id,
            changes,
            actor_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_actor(mut self, actor_id: Option<i64>) -> Self {
        self.actor_id = actor_id;
        self
    }
}
