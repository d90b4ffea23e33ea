use conductor_core::models::JobEventKind;
use serde_json::Value;

/// 从事件数据中提取的分类结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: JobEventKind,
    pub failed: bool,
    pub changed: bool,
    pub host_name: String,
    pub play: String,
    pub task: String,
    pub role: String,
}

fn text(data: &Value, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn flag(data: &Value, key: &str) -> bool {
    data.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// 分类只在写入时进行，已存储的事件不会重新分类
pub fn classify(kind: JobEventKind, event_data: &Value) -> Classification {
    let res = event_data.get("res").filter(|r| r.is_object());

    let mut kind = kind;
    if kind == JobEventKind::RunnerOnAsyncOk {
        if let Some(res) = res {
            let rc_failed = res
                .get("rc")
                .and_then(Value::as_i64)
                .map(|rc| rc != 0)
                .unwrap_or(false);
            if flag(res, "failed") || rc_failed {
                kind = JobEventKind::RunnerOnAsyncFailed;
            }
        }
    }

    let failed = kind.is_failure() && !flag(event_data, "ignore_errors");
    let changed = res.map(|r| flag(r, "changed")).unwrap_or(false);

    Classification {
        kind,
        failed,
        changed,
        host_name: text(event_data, "host"),
        play: text(event_data, "play"),
        task: text(event_data, "task"),
        role: text(event_data, "role"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use JobEventKind::*;

    #[test]
    fn test_async_ok_corrected_to_failed() {
        let c = classify(RunnerOnAsyncOk, &json!({"res": {"rc": 2}}));
        assert_eq!(c.kind, RunnerOnAsyncFailed);
        assert!(c.failed);

        let c = classify(RunnerOnAsyncOk, &json!({"res": {"failed": true}}));
        assert_eq!(c.kind, RunnerOnAsyncFailed);

        let c = classify(RunnerOnAsyncOk, &json!({"res": {"rc": 0, "changed": true}}));
        assert_eq!(c.kind, RunnerOnAsyncOk);
        assert!(!c.failed);
        assert!(c.changed);
    }

    #[test]
    fn test_ignore_errors_suppresses_failed() {
        let c = classify(RunnerOnFailed, &json!({"ignore_errors": true, "host": "web1"}));
        assert!(!c.failed);
        assert_eq!(c.host_name, "web1");

        assert!(classify(RunnerOnUnreachable, &json!({})).failed);
    }

    #[test]
    fn test_timed_out_payload_kept_as_is() {
        let c = classify(RunnerOnAsyncFailed, &json!({"res": {"msg": "timed out"}}));
        assert_eq!(c.kind, RunnerOnAsyncFailed);
        let c = classify(RunnerOnAsyncPoll, &json!({"res": {"msg": "timed out"}}));
        assert_eq!(c.kind, RunnerOnAsyncPoll);
        assert!(!c.failed);
    }

    #[test]
    fn test_names_extracted() {
        let c = classify(
            PlaybookOnTaskStart,
            &json!({"play": "web", "task": "install", "role": "nginx"}),
        );
        assert_eq!((c.play.as_str(), c.task.as_str(), c.role.as_str()), ("web", "install", "nginx"));
    }
}
