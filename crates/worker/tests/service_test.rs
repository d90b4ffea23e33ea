mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use conductor_core::models::{queues, JobDetails, JobFields, JobStatus, Message, MessageType, UnifiedJob};
use conductor_core::MessageQueue;
use conductor_worker::WorkerService;
use tokio::sync::broadcast;
use tracing_test::traced_test;

use common::fixture;

#[tokio::test]
#[traced_test]
async fn test_worker_runs_dispatched_job_and_reports() -> Result<()> {
    let f = fixture().await?;
    let runner = f.write_script("runner.sh", "echo hello from runner")?;
    let job = f.running_playbook(JobFields::default()).await?;

    let service = WorkerService::builder(
        "worker-test".to_string(),
        f.queue.clone(),
        Arc::new(f.executor(&runner)),
        f.repos.clone(),
    )
    .max_concurrent_jobs(2)
    .poll_interval_ms(50)
    .hostname("test-node".to_string())
    .build();

    f.queue
        .publish_message(queues::JOBS, &Message::job_dispatch(job.id))
        .await?;

    let (tx, rx) = broadcast::channel(1);
    let handle = {
        let service = service.clone();
        tokio::spawn(async move { service.run(rx).await })
    };

    let mut status = JobStatus::Running;
    for _ in 0..100 {
        status = f.stored(job.id).await?.status;
        if status.is_finished() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tx.send(())?;
    handle.await??;

    assert_eq!(status, JobStatus::Successful);
    let stored = f.stored(job.id).await?;
    assert_eq!(stored.execution_node.as_deref(), Some("test-node"));
    assert!(stored.finished_at.is_some());
    assert!(!stored.failed);
    assert!(stored.result_stdout.contains("hello from runner"));

    let completed: Vec<(i64, JobStatus)> = f
        .queue
        .consume_messages(queues::SCHEDULER)
        .await?
        .into_iter()
        .filter_map(|m| match m.message_type {
            MessageType::JobCompleted { job_id, status } => Some((job_id, status)),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec![(job.id, JobStatus::Successful)]);
    Ok(())
}

#[tokio::test]
async fn test_process_job_records_failure() -> Result<()> {
    let f = fixture().await?;
    let runner = f.write_script("runner.sh", "echo 'fatal: no playbook' >&2\nexit 4")?;
    let job = f.running_playbook(JobFields::default()).await?;

    let service = WorkerService::builder(
        "worker-test".to_string(),
        f.queue.clone(),
        Arc::new(f.executor(&runner)),
        f.repos.clone(),
    )
    .build();

    let status = service.process_job(job.id).await?;
    assert_eq!(status, JobStatus::Error);

    let stored = f.stored(job.id).await?;
    assert!(stored.failed);
    assert!(stored.job_explanation.contains('4'));
    assert!(stored.result_traceback.contains("fatal: no playbook"));
    assert_eq!(f.queue.get_queue_size(queues::SCHEDULER).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_process_job_skips_jobs_not_running() -> Result<()> {
    let f = fixture().await?;
    let pending = f
        .repos
        .jobs
        .create(&UnifiedJob::new(
            "queued",
            None,
            JobDetails::Job(JobFields::default()),
        ))
        .await?;

    let service = WorkerService::builder(
        "worker-test".to_string(),
        f.queue.clone(),
        Arc::new(f.executor("unused")),
        f.repos.clone(),
    )
    .build();

    f.queue.create_queue(queues::SCHEDULER).await?;
    assert_eq!(service.process_job(pending.id).await?, JobStatus::New);
    assert_eq!(f.stored(pending.id).await?.execution_node, None);
    assert_eq!(f.queue.get_queue_size(queues::SCHEDULER).await?, 0);
    Ok(())
}
