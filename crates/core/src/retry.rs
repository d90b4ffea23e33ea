use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::ConductorResult;

/// 瞬时错误的指数退避策略
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// 基础重试间隔（毫秒）
    pub base_interval_ms: u64,
    /// 最大重试间隔（毫秒）
    pub max_interval_ms: u64,
    pub backoff_multiplier: f64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_interval_ms: 50,
            max_interval_ms: 2_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// 第 `attempt` 次重试前的等待时间（从 0 开始）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_interval_ms as f64;
        let exponential = base * self.backoff_multiplier.powi(attempt as i32);
        let capped = exponential.min(self.max_interval_ms as f64);
        let jitter = capped * self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        Duration::from_millis((capped + jitter).max(base) as u64)
    }

    /// 执行操作，仅对可重试错误进行退避重试
    pub async fn run<T, F, Fut>(&self, operation: &str, mut f: F) -> ConductorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ConductorResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "瞬时错误，退避后重试: {err}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
