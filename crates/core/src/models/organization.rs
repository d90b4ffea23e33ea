use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            description: String::new(),
            active: true,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub is_superuser: bool,
    pub is_system_auditor: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: 0,
            username: username.into(),
            is_superuser: false,
            is_system_auditor: false,
            active: true,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub name: String,
    pub organization_id: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Team {
    pub fn new(name: impl Into<String>, organization_id: i64) -> Self {
        Self {
            id: 0,
            name: name.into(),
            organization_id,
            active: true,
            created_at: Utc::now(),
        }
    }
}
