//! 作业回传事件使用的任务令牌
//!
//! 令牌为 `<job_id>-<hex(HMAC-SHA256(secret, created_at))>`，由作业创建时间
//! 派生，不落库；只有运行中的作业接受令牌。

use chrono::SecondsFormat;
use conductor_core::models::{JobStatus, UnifiedJob};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::vault::Vault;

type HmacSha256 = Hmac<Sha256>;

fn keyed_mac(secret: &[u8], job: &UnifiedJob) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(
        job.created_at
            .to_rfc3339_opts(SecondsFormat::Micros, true)
            .as_bytes(),
    );
    Some(mac)
}

/// 运行中的作业才有令牌
pub fn task_auth_token(secret: &[u8], job: &UnifiedJob) -> Option<String> {
    if job.status != JobStatus::Running {
        return None;
    }
    let digest = keyed_mac(secret, job)?.finalize().into_bytes();
    Some(format!("{}-{}", job.id, hex::encode(digest)))
}

/// 签名以常量时间比较
pub fn verify_task_token(secret: &[u8], job: &UnifiedJob, presented: &str) -> bool {
    if job.status != JobStatus::Running {
        return false;
    }
    let Some((id, sig)) = presented.split_once('-') else {
        return false;
    };
    if id != job.id.to_string() {
        return false;
    }
    let (Ok(sig), Some(mac)) = (hex::decode(sig), keyed_mac(secret, job)) else {
        return false;
    };
    mac.verify_slice(&sig).is_ok()
}

impl Vault {
    /// 以加密密钥签发作业令牌
    pub fn task_token(&self, job: &UnifiedJob) -> Option<String> {
        task_auth_token(self.secret(), job)
    }

    pub fn verify_task_token(&self, job: &UnifiedJob, presented: &str) -> bool {
        verify_task_token(self.secret(), job, presented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::models::{JobDetails, JobFields};

    fn running_job() -> UnifiedJob {
        let mut job = UnifiedJob::new("deploy", Some(1), JobDetails::Job(JobFields::default()));
        job.id = 42;
        job.status = JobStatus::Running;
        job
    }

    #[test]
    fn test_token_format_and_verify() {
        let job = running_job();
        let token = task_auth_token(b"secret", &job).unwrap();
        assert!(token.starts_with("42-"));
        assert_eq!(token.len(), 3 + 64);
        assert!(verify_task_token(b"secret", &job, &token));
        assert!(!verify_task_token(b"other", &job, &token));
        assert!(!verify_task_token(b"secret", &job, "42-deadbeef"));
        assert!(!verify_task_token(b"secret", &job, "42-not-hex"));
        assert!(!verify_task_token(b"secret", &job, &token.replacen("42-", "43-", 1)));
        // 十六进制大小写不影响
        assert!(verify_task_token(b"secret", &job, &token.to_uppercase()));
    }

    #[test]
    fn test_only_running_jobs_have_tokens() {
        let mut job = running_job();
        let token = task_auth_token(b"secret", &job).unwrap();
        job.status = JobStatus::Successful;
        assert_eq!(task_auth_token(b"secret", &job), None);
        assert!(!verify_task_token(b"secret", &job, &token));
    }

    #[test]
    fn test_vault_signs_with_its_key() {
        let job = running_job();
        let vault = Vault::new("secret");
        let token = vault.task_token(&job).unwrap();
        assert_eq!(Some(token.clone()), task_auth_token(b"secret", &job));
        assert!(vault.verify_task_token(&job, &token));
    }
}
