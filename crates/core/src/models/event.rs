use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    RunnerOnFailed,
    RunnerOnOk,
    RunnerOnError,
    RunnerOnSkipped,
    RunnerOnUnreachable,
    RunnerOnNoHosts,
    RunnerOnAsyncPoll,
    RunnerOnAsyncOk,
    RunnerOnAsyncFailed,
    RunnerOnFileDiff,
    PlaybookOnStart,
    PlaybookOnNotify,
    PlaybookOnNoHostsMatched,
    PlaybookOnNoHostsRemaining,
    PlaybookOnTaskStart,
    PlaybookOnVarsPrompt,
    PlaybookOnSetup,
    PlaybookOnImportForHost,
    PlaybookOnNotImportForHost,
    PlaybookOnPlayStart,
    PlaybookOnStats,
    /// 非事件输出
    Verbose,
}

use JobEventKind::*;

const PLAYBOOK_PARENTS: &[JobEventKind] = &[PlaybookOnStart];
const PLAY_PARENTS: &[JobEventKind] = &[PlaybookOnPlayStart];
const TASK_PARENTS: &[JobEventKind] = &[PlaybookOnSetup, PlaybookOnTaskStart];

impl JobEventKind {
    pub const ALL: [JobEventKind; 22] = [
        RunnerOnFailed,
        RunnerOnOk,
        RunnerOnError,
        RunnerOnSkipped,
        RunnerOnUnreachable,
        RunnerOnNoHosts,
        RunnerOnAsyncPoll,
        RunnerOnAsyncOk,
        RunnerOnAsyncFailed,
        RunnerOnFileDiff,
        PlaybookOnStart,
        PlaybookOnNotify,
        PlaybookOnNoHostsMatched,
        PlaybookOnNoHostsRemaining,
        PlaybookOnTaskStart,
        PlaybookOnVarsPrompt,
        PlaybookOnSetup,
        PlaybookOnImportForHost,
        PlaybookOnNotImportForHost,
        PlaybookOnPlayStart,
        PlaybookOnStats,
        Verbose,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerOnFailed => "runner_on_failed",
            RunnerOnOk => "runner_on_ok",
            RunnerOnError => "runner_on_error",
            RunnerOnSkipped => "runner_on_skipped",
            RunnerOnUnreachable => "runner_on_unreachable",
            RunnerOnNoHosts => "runner_on_no_hosts",
            RunnerOnAsyncPoll => "runner_on_async_poll",
            RunnerOnAsyncOk => "runner_on_async_ok",
            RunnerOnAsyncFailed => "runner_on_async_failed",
            RunnerOnFileDiff => "runner_on_file_diff",
            PlaybookOnStart => "playbook_on_start",
            PlaybookOnNotify => "playbook_on_notify",
            PlaybookOnNoHostsMatched => "playbook_on_no_hosts_matched",
            PlaybookOnNoHostsRemaining => "playbook_on_no_hosts_remaining",
            PlaybookOnTaskStart => "playbook_on_task_start",
            PlaybookOnVarsPrompt => "playbook_on_vars_prompt",
            PlaybookOnSetup => "playbook_on_setup",
            PlaybookOnImportForHost => "playbook_on_import_for_host",
            PlaybookOnNotImportForHost => "playbook_on_not_import_for_host",
            PlaybookOnPlayStart => "playbook_on_play_start",
            PlaybookOnStats => "playbook_on_stats",
            Verbose => "verbose",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == value)
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            RunnerOnFailed | RunnerOnError | RunnerOnUnreachable | RunnerOnAsyncFailed
        )
    }

    /// 允许作为父事件的类型
    pub fn parent_kinds(&self) -> &'static [JobEventKind] {
        match self {
            PlaybookOnPlayStart | PlaybookOnStats | PlaybookOnVarsPrompt => PLAYBOOK_PARENTS,
            PlaybookOnNotify
            | PlaybookOnSetup
            | PlaybookOnTaskStart
            | PlaybookOnNoHostsMatched
            | PlaybookOnNoHostsRemaining
            | PlaybookOnImportForHost
            | PlaybookOnNotImportForHost => PLAY_PARENTS,
            RunnerOnFailed | RunnerOnOk | RunnerOnError | RunnerOnSkipped
            | RunnerOnUnreachable | RunnerOnNoHosts | RunnerOnAsyncPoll | RunnerOnAsyncOk
            | RunnerOnAsyncFailed | RunnerOnFileDiff => TASK_PARENTS,
            PlaybookOnStart | Verbose => &[],
        }
    }

    pub fn is_runner(&self) -> bool {
        self.as_str().starts_with("runner_on_")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub id: i64,
    pub job_id: i64,
    pub uuid: String,
    pub kind: JobEventKind,
    pub event_data: serde_json::Value,
    pub parent_id: Option<i64>,
    pub host_id: Option<i64>,
    pub host_name: String,
    pub play: String,
    pub role: String,
    pub task: String,
    pub counter: i64,
    pub failed: bool,
    pub changed: bool,
    pub stdout: String,
    pub start_line: i64,
    pub end_line: i64,
    pub created_at: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(job_id: i64, kind: JobEventKind, event_data: serde_json::Value) -> Self {
        Self {
            id: 0,
            job_id,
            uuid: String::new(),
            kind,
            event_data,
            parent_id: None,
            host_id: None,
            host_name: String::new(),
            play: String::new(),
            role: String::new(),
            task: String::new(),
            counter: 0,
            failed: false,
            changed: false,
            stdout: String::new(),
            start_line: 0,
            end_line: 0,
            created_at: Utc::now(),
        }
    }
}

/// stats 事件中的六类主机计数
pub const HOST_COUNTER_KEYS: [&str; 6] = ["changed", "dark", "failures", "ok", "processed", "skipped"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHostSummary {
    pub id: i64,
    pub job_id: i64,
    pub host_id: Option<i64>,
    pub host_name: String,
    pub changed: i64,
    pub dark: i64,
    pub failures: i64,
    pub ok: i64,
    pub processed: i64,
    pub skipped: i64,
    pub failed: bool,
    pub created_at: DateTime<Utc>,
}

impl JobHostSummary {
    pub fn new(job_id: i64, host_name: impl Into<String>) -> Self {
        Self {
            id: 0,
            job_id,
            host_id: None,
            host_name: host_name.into(),
            changed: 0,
            dark: 0,
            failures: 0,
            ok: 0,
            processed: 0,
            skipped: 0,
            failed: false,
            created_at: Utc::now(),
        }
    }

    pub fn set_counter(&mut self, key: &str, value: i64) {
        match key {
            "changed" => self.changed = value,
            "dark" => self.dark = value,
            "failures" => self.failures = value,
            "ok" => self.ok = value,
            "processed" => self.processed = value,
            "skipped" => self.skipped = value,
            _ => {}
        }
    }

    pub fn refresh_failed(&mut self) {
        self.failed = self.dark > 0 || self.failures > 0;
    }
}

#[cfg(test)]
mod tests {
    use super::JobEventKind::*;
    use super::*;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in JobEventKind::ALL {
            assert_eq!(JobEventKind::parse(kind.as_str()), Some(kind));
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
        }
        assert_eq!(JobEventKind::parse("runner_on_bogus"), None);
    }

    #[test]
    fn test_parent_sets() {
        assert_eq!(PlaybookOnPlayStart.parent_kinds(), &[PlaybookOnStart]);
        assert_eq!(PlaybookOnTaskStart.parent_kinds(), &[PlaybookOnPlayStart]);
        assert_eq!(
            RunnerOnOk.parent_kinds(),
            &[PlaybookOnSetup, PlaybookOnTaskStart]
        );
        assert!(PlaybookOnStart.parent_kinds().is_empty());
        assert!(Verbose.parent_kinds().is_empty());
    }

    #[test]
    fn test_failure_set() {
        let failures: Vec<_> = JobEventKind::ALL
            .iter()
            .filter(|k| k.is_failure())
            .collect();
        assert_eq!(failures.len(), 4);
        assert!(!RunnerOnAsyncOk.is_failure());
    }

    #[test]
    fn test_summary_failed_flag() {
        let mut summary = JobHostSummary::new(1, "web1");
        summary.set_counter("ok", 3);
        summary.refresh_failed();
        assert!(!summary.failed);

        summary.set_counter("dark", 1);
        summary.refresh_failed();
        assert!(summary.failed);
    }
}
