use std::sync::Arc;

use chrono::{DateTime, Utc};
use conductor_core::models::{LaunchType, Schedule};
use conductor_core::{ConductorError, ConductorResult, Repositories};
use conductor_domain::LaunchOverrides;
use conductor_infrastructure::StructuredLogger;
use rrule::{RRuleSet, Tz};
use tracing::{debug, instrument, warn};

use crate::controller::JobController;

/// 解析 `DTSTART:... RRULE:...` 规则，各部分可用空格或换行分隔
pub fn parse_rule(rule: &str) -> ConductorResult<RRuleSet> {
    let text = rule.split_whitespace().collect::<Vec<_>>().join("\n");
    if !text.contains("DTSTART") {
        return Err(ConductorError::InvalidSchedule {
            rule: rule.to_string(),
            message: "缺少 DTSTART".to_string(),
        });
    }
    text.parse::<RRuleSet>()
        .map_err(|e| ConductorError::InvalidSchedule {
            rule: rule.to_string(),
            message: e.to_string(),
        })
}

/// `after` 之后的下一次触发时间，规则已结束时返回 `None`
pub fn next_run_after(rule: &str, after: DateTime<Utc>) -> ConductorResult<Option<DateTime<Utc>>> {
    let set = parse_rule(rule)?;
    let result = set.after(after.with_timezone(&Tz::UTC)).all(1);
    Ok(result.dates.first().map(|d| d.with_timezone(&Utc)))
}

/// 定时计划
pub struct ScheduleService {
    repos: Repositories,
    controller: Arc<JobController>,
}

impl ScheduleService {
    pub fn new(repos: Repositories, controller: Arc<JobController>) -> Self {
        Self { repos, controller }
    }

    /// 校验规则并计算首次触发时间
    pub async fn create(&self, schedule: &Schedule) -> ConductorResult<Schedule> {
        if self
            .repos
            .templates
            .get_by_id(schedule.template_id)
            .await?
            .is_none()
        {
            return Err(ConductorError::not_found("模板", schedule.template_id));
        }
        let mut schedule = schedule.clone();
        schedule.next_run = next_run_after(&schedule.rrule, Utc::now())?;
        self.repos.schedules.create(&schedule).await
    }

    /// 触发到期的计划，返回新建的作业 id
    #[instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> ConductorResult<Vec<i64>> {
        let mut launched = Vec::new();
        for mut schedule in self.repos.schedules.list_enabled().await? {
            if !schedule.is_due(now) {
                continue;
            }

            match LaunchOverrides::from_value(&schedule.extra_data) {
                Ok(overrides) => match self
                    .controller
                    .launch_as(schedule.template_id, &overrides, LaunchType::Scheduled)
                    .await
                {
                    Ok(result) => launched.push(result.job_id),
                    Err(e) => warn!("计划 {} 启动失败: {}", schedule.id, e),
                },
                Err(e) => warn!("计划 {} 的启动参数无效: {}", schedule.id, e),
            }

            schedule.last_run = Some(now);
            schedule.next_run = match next_run_after(&schedule.rrule, now) {
                Ok(next) => next,
                Err(e) => {
                    warn!("计划 {} 的规则无效，停止触发: {}", schedule.id, e);
                    schedule.enabled = false;
                    None
                }
            };
            self.repos.schedules.update(&schedule).await?;
            StructuredLogger::log_schedule_fired(
                schedule.id,
                schedule.template_id,
                schedule.next_run,
            );
        }
        if !launched.is_empty() {
            debug!("计划触发了 {} 个作业", launched.len());
        }
        Ok(launched)
    }
}
