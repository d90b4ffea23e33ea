//! 指标采集
//!
//! 指标通过 `metrics` 门面记录，由 Prometheus 导出器对外暴露。

use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use tracing::{debug, info};

/// 安装 Prometheus 导出器，需在 tokio 运行时内调用
pub fn init_metrics(bind_address: &str) -> Result<()> {
    let addr: SocketAddr = bind_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {bind_address}"))?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("安装 Prometheus 导出器失败: {}", e))?;

    info!("Prometheus 指标导出已启动: {}", addr);
    Ok(())
}

/// 编排核心的指标集合
pub struct MetricsCollector {
    jobs_launched_total: Counter,
    job_duration: Histogram,
    job_events_total: Counter,
    scheduler_cycle_duration: Histogram,
    scheduler_capacity_remaining: Gauge,
    running_jobs: Gauge,
    inventory_recompute_duration: Histogram,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            jobs_launched_total: counter!("conductor_jobs_launched_total"),
            job_duration: histogram!("conductor_job_duration_seconds"),
            job_events_total: counter!("conductor_job_events_total"),
            scheduler_cycle_duration: histogram!("conductor_scheduler_cycle_duration_seconds"),
            scheduler_capacity_remaining: gauge!("conductor_scheduler_capacity_remaining"),
            running_jobs: gauge!("conductor_running_jobs"),
            inventory_recompute_duration: histogram!(
                "conductor_inventory_recompute_duration_seconds"
            ),
        }
    }

    pub fn record_job_launched(&self, kind: &str) {
        self.jobs_launched_total.increment(1);
        counter!("conductor_jobs_launched_by_kind_total", "kind" => kind.to_string()).increment(1);
    }

    /// 作业进入终态
    pub fn record_job_finished(&self, kind: &str, status: &str, duration_seconds: Option<f64>) {
        counter!(
            "conductor_jobs_finished_total",
            "kind" => kind.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        if let Some(duration) = duration_seconds {
            self.job_duration.record(duration);
        }
        debug!(kind = kind, status = status, "作业结束指标已记录");
    }

    pub fn record_job_events(&self, count: u64) {
        self.job_events_total.increment(count);
    }

    pub fn record_scheduler_cycle(&self, duration_seconds: f64, capacity_remaining: i64, running: usize) {
        self.scheduler_cycle_duration.record(duration_seconds);
        self.scheduler_capacity_remaining.set(capacity_remaining as f64);
        self.running_jobs.set(running as f64);
    }

    pub fn record_inventory_recompute(&self, duration_seconds: f64) {
        self.inventory_recompute_duration.record(duration_seconds);
    }

    pub fn update_queue_depth(&self, queue: &str, depth: u32) {
        gauge!("conductor_queue_depth", "queue" => queue.to_string()).set(depth as f64);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_without_recorder() {
        // 未安装导出器时记录操作为空操作
        let metrics = MetricsCollector::new();
        metrics.record_job_launched("job");
        metrics.record_job_finished("job", "successful", Some(1.5));
        metrics.record_scheduler_cycle(0.01, 100, 2);
        metrics.update_queue_depth("jobs", 3);
    }

    #[test]
    fn test_invalid_bind_address() {
        assert!(init_metrics("not-an-address").is_err());
    }
}
