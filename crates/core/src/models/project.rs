use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScmType {
    #[default]
    None,
    Git,
    Hg,
    Svn,
}

impl ScmType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScmType::None => "none",
            ScmType::Git => "git",
            ScmType::Hg => "hg",
            ScmType::Svn => "svn",
        }
    }
}

/// 项目，同时是源码更新作业的模板
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub organization_id: Option<i64>,
    pub scm_type: ScmType,
    pub scm_url: String,
    pub scm_branch: String,
    pub scm_clean: bool,
    pub credential_id: Option<i64>,
    pub scm_update_on_launch: bool,
    /// 秒
    pub scm_update_cache_timeout: i64,
    pub local_path: String,
    pub last_update_failed: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_job_run: Option<DateTime<Utc>>,
    pub last_job_failed: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Default for Project {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            organization_id: None,
            scm_type: ScmType::None,
            scm_url: String::new(),
            scm_branch: String::new(),
            scm_clean: false,
            credential_id: None,
            scm_update_on_launch: false,
            scm_update_cache_timeout: 0,
            local_path: String::new(),
            last_update_failed: false,
            last_updated: None,
            last_job_run: None,
            last_job_failed: false,
            active: true,
            created_at: Utc::now(),
        }
    }
}

impl Project {
    pub fn needs_update_on_launch(&self, now: DateTime<Utc>) -> bool {
        if !self.active || self.scm_type == ScmType::None || !self.scm_update_on_launch {
            return false;
        }
        match self.last_updated {
            None => true,
            Some(last) => now >= last + Duration::seconds(self.scm_update_cache_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_project() -> Project {
        Project {
            name: "playbooks".into(),
            scm_type: ScmType::Git,
            scm_url: "https://example.com/playbooks.git".into(),
            scm_update_on_launch: true,
            scm_update_cache_timeout: 60,
            ..Default::default()
        }
    }

    #[test]
    fn test_needs_update_when_never_updated() {
        assert!(git_project().needs_update_on_launch(Utc::now()));
    }

    #[test]
    fn test_cache_timeout_suppresses_update() {
        let now = Utc::now();
        let mut project = git_project();
        project.last_updated = Some(now - Duration::seconds(30));
        assert!(!project.needs_update_on_launch(now));

        project.last_updated = Some(now - Duration::seconds(60));
        assert!(project.needs_update_on_launch(now));
    }

    #[test]
    fn test_manual_or_inactive_project_never_updates() {
        let mut project = git_project();
        project.scm_type = ScmType::None;
        assert!(!project.needs_update_on_launch(Utc::now()));

        let mut project = git_project();
        project.active = false;
        assert!(!project.needs_update_on_launch(Utc::now()));
    }
}
