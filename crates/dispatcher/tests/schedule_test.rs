mod common;

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use conductor_core::config::DispatcherConfig;
use conductor_core::models::{queues, JobStatus, LaunchType, Message, Schedule};
use conductor_core::{ConductorError, MessageQueue};
use conductor_dispatcher::{DispatcherService, ScheduleService};
use conductor_infrastructure::MetricsCollector;
use serde_json::json;
use tokio::sync::broadcast;
use tracing_test::traced_test;

use common::fixture;

const DAILY: &str = "DTSTART:20240101T000000Z RRULE:FREQ=DAILY;INTERVAL=1";

#[tokio::test]
#[traced_test]
async fn test_due_schedule_launches_job() -> Result<()> {
    let f = fixture().await?;
    let inventory = f.inventory_with_hosts(&["web1"]).await?;
    let project = f.manual_project().await?;
    let template = f
        .job_template(
            "nightly",
            project,
            inventory.id,
            json!({ "ask_variables_on_launch": true }),
        )
        .await?;
    let service = ScheduleService::new(f.repos.clone(), f.controller.clone());

    let mut schedule = Schedule::new("daily", template, DAILY);
    schedule.extra_data = json!({ "extra_vars": { "window": "night" } });
    let created = service.create(&schedule).await?;
    let first_run = created.next_run.expect("next run computed");
    assert!(first_run > Utc::now());

    // 尚未到期
    assert!(service.tick(Utc::now()).await?.is_empty());

    let launched = service.tick(first_run).await?;
    assert_eq!(launched.len(), 1);
    let job = f.repos.jobs.get_by_id(launched[0]).await?.unwrap();
    assert_eq!(job.launch_type, LaunchType::Scheduled);
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.job_fields().unwrap().extra_vars.contains("night"));

    let stored = f.repos.schedules.get_by_id(created.id).await?.unwrap();
    assert_eq!(stored.last_run, Some(first_run));
    assert_eq!(stored.next_run, Some(first_run + Duration::days(1)));

    // 同一时刻不会重复触发
    assert!(service.tick(first_run).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_schedule_validation() -> Result<()> {
    let f = fixture().await?;
    let service = ScheduleService::new(f.repos.clone(), f.controller.clone());

    let err = service
        .create(&Schedule::new("orphan", 777, DAILY))
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::NotFound { .. }));

    let project = f.manual_project().await?;
    let err = service
        .create(&Schedule::new("bad", project, "RRULE:FREQ=DAILY"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::InvalidSchedule { .. }));
    assert_eq!(err.exit_code(), 1);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_background_requests_and_shutdown() -> Result<()> {
    let f = fixture().await?;
    let inventory = f.inventory_with_hosts(&["web1"]).await?;
    let project = f.manual_project().await?;
    let template = f
        .job_template(
            "provision",
            project,
            inventory.id,
            json!({ "host_config_key": "k" }),
        )
        .await?;

    let schedules = Arc::new(ScheduleService::new(f.repos.clone(), f.controller.clone()));
    let service = DispatcherService::new(
        DispatcherConfig {
            schedule_interval_seconds: 1,
            ..Default::default()
        },
        f.task_manager.clone(),
        schedules,
        f.controller.clone(),
        f.inventory.clone(),
        f.queue.clone(),
        Arc::new(MetricsCollector::new()),
    );

    f.queue
        .publish_message(queues::CALLBACK_TASKS, &Message::host_callback(template, "web1"))
        .await?;
    f.queue
        .publish_message(queues::DEFAULT, &Message::inventory_recompute(inventory.id))
        .await?;
    service.background_requests().await;

    let pending = f.repos.jobs.list_by_status(&[JobStatus::Pending]).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].launch_type, LaunchType::Callback);

    let (tx, rx) = broadcast::channel(1);
    let handle = tokio::spawn(async move { service.run(rx).await });
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    tx.send(())?;
    handle.await??;

    // 首个调度周期已放行回调作业
    assert_eq!(f.status_of(pending[0].id).await?, JobStatus::Running);
    Ok(())
}
