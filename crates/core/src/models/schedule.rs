use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub name: String,
    pub template_id: i64,
    pub enabled: bool,
    /// `DTSTART:... RRULE:...`
    pub rrule: String,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    /// 作为启动覆盖项使用
    pub extra_data: serde_json::Value,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    pub fn new(name: impl Into<String>, template_id: i64, rrule: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            template_id,
            enabled: true,
            rrule: rrule.into(),
            next_run: None,
            last_run: None,
            extra_data: serde_json::Value::Object(Default::default()),
            active: true,
            created_at: Utc::now(),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.active && self.next_run.map(|t| t <= now).unwrap_or(false)
    }
}
