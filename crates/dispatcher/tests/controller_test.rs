mod common;

use std::collections::HashMap;

use anyhow::Result;
use conductor_core::models::{
    ContentType, Credential, CredentialKind, JobDetails, JobStatus, LaunchType, TemplateKind, User,
};
use conductor_core::ConductorError;
use conductor_domain::{launch, EventPayload, LaunchOverrides};
use serde_json::{json, Value};
use tracing_test::traced_test;

use common::fixture;

#[tokio::test]
async fn test_create_template_collects_all_errors() -> Result<()> {
    let f = fixture().await?;
    let err = f
        .controller
        .create_template(
            TemplateKind::JobTemplate,
            json!({ "name": "", "inventory_id": 999, "survey_enabled": true }),
        )
        .await
        .unwrap_err();
    match err {
        ConductorError::Validation(errors) => {
            assert!(errors.len() >= 5, "{errors:?}");
            assert!(errors.iter().any(|e| e.contains("999")));
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = f
        .controller
        .create_template(TemplateKind::Project, json!({ "name": "p", "scm_type": "git" }))
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::Validation(ref e) if e.len() == 1));

    let err = f
        .controller
        .create_template(TemplateKind::JobTemplate, json!(["not", "an", "object"]))
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 1);
    Ok(())
}

#[tokio::test]
async fn test_extra_vars_are_canonicalized() -> Result<()> {
    let f = fixture().await?;
    let inventory = f.inventory_with_hosts(&[]).await?;
    let project = f.manual_project().await?;
    let template = f
        .job_template(
            "deploy",
            project,
            inventory.id,
            json!({ "extra_vars": "env: prod\nreplicas: 3" }),
        )
        .await?;

    let launched = f.controller.launch(template, &LaunchOverrides::default()).await?;
    let job = f.repos.jobs.get_by_id(launched.job_id).await?.unwrap();
    let JobDetails::Job(fields) = &job.details else {
        panic!("expected playbook job");
    };
    let extra: Value = serde_json::from_str(&fields.extra_vars)?;
    assert_eq!(extra, json!({ "env": "prod", "replicas": 3 }));
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_survey_defaults_and_ignored_fields() -> Result<()> {
    let f = fixture().await?;
    let inventory = f.inventory_with_hosts(&["web1"]).await?;
    let project = f.manual_project().await?;
    let template = f
        .job_template(
            "survey",
            project,
            inventory.id,
            json!({
                "survey_enabled": true,
                "survey_spec": {
                    "name": "release",
                    "spec": [
                        { "variable": "version", "type": "text", "required": true, "default": "1.0" },
                        { "variable": "replicas", "type": "integer", "min": 1, "max": 5 }
                    ]
                }
            }),
        )
        .await?;

    let overrides = LaunchOverrides {
        limit: Some("web1".to_string()),
        extra_vars: Some(json!({ "replicas": 3 })),
        ..Default::default()
    };
    let launched = f.controller.launch(template, &overrides).await?;
    assert_eq!(launched.ignored_fields, vec!["limit"]);

    let job = f.repos.jobs.get_by_id(launched.job_id).await?.unwrap();
    let JobDetails::Job(fields) = &job.details else {
        panic!("expected playbook job");
    };
    let extra: Value = serde_json::from_str(&fields.extra_vars)?;
    assert_eq!(extra["version"], "1.0");
    assert_eq!(extra["replicas"], 3);

    // 超出范围的回答被拒绝
    let overrides = LaunchOverrides {
        extra_vars: Some(json!({ "replicas": 9 })),
        ..Default::default()
    };
    let err = f.controller.launch(template, &overrides).await.unwrap_err();
    assert!(matches!(err, ConductorError::Validation(_)));
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_launch_passwords_are_required_and_sealed() -> Result<()> {
    let f = fixture().await?;
    let inventory = f.inventory_with_hosts(&["web1"]).await?;
    let project = f.manual_project().await?;

    let mut credential = Credential::new("ssh", CredentialKind::Machine);
    credential.username = "deploy".to_string();
    credential.password = "ASK".to_string();
    credential.become_password = "ASK".to_string();
    let credential = f.repos.credentials.create(&credential).await?;

    let template = f
        .job_template(
            "deploy",
            project,
            inventory.id,
            json!({ "credential_id": credential.id }),
        )
        .await?;

    let err = f
        .controller
        .launch(template, &LaunchOverrides::default())
        .await
        .unwrap_err();
    match err {
        ConductorError::Validation(errors) => assert_eq!(errors.len(), 2),
        other => panic!("unexpected error: {other}"),
    }

    let mut passwords = HashMap::new();
    passwords.insert("ssh_password".to_string(), "pw1".to_string());
    passwords.insert("become_password".to_string(), "pw2".to_string());
    passwords.insert("vault_password".to_string(), "unused".to_string());
    let overrides = LaunchOverrides {
        passwords: passwords.clone(),
        ..Default::default()
    };
    let launched = f.controller.launch(template, &overrides).await?;
    assert_eq!(
        launched.prompts_needed,
        vec!["ssh_password".to_string(), "become_password".to_string()]
    );

    let job = f.repos.jobs.get_by_id(launched.job_id).await?.unwrap();
    assert!(!job.start_args.contains("pw1"));
    let opened = launch::open_start_args(&f.vault, &job)?;
    assert_eq!(opened.len(), 2);
    assert_eq!(opened["become_password"], "pw2");

    // 重新启动同样需要密码
    let err = f
        .controller
        .relaunch(launched.job_id, &HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::Validation(_)));
    let relaunched = f.controller.relaunch(launched.job_id, &passwords).await?;
    let job = f.repos.jobs.get_by_id(relaunched.job_id).await?.unwrap();
    assert_eq!(job.launch_type, LaunchType::Relaunch);
    assert_eq!(job.status, JobStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn test_inactive_template_and_missing_objects() -> Result<()> {
    let f = fixture().await?;
    let inventory = f.inventory_with_hosts(&[]).await?;
    let project = f.manual_project().await?;
    let template = f.job_template("deploy", project, inventory.id, json!({})).await?;

    let err = f
        .controller
        .launch(424242, &LaunchOverrides::default())
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 4);

    let mut stored = f.repos.templates.get_by_id(template).await?.unwrap();
    stored.set_active(false);
    f.repos.templates.update(&stored).await?;
    let err = f
        .controller
        .launch(template, &LaunchOverrides::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::Conflict(_)));

    assert!(matches!(
        f.controller.cancel(9999).await,
        Err(ConductorError::NotFound { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_launch_by_requires_execute_role() -> Result<()> {
    let f = fixture().await?;
    let inventory = f.inventory_with_hosts(&[]).await?;
    let project = f.manual_project().await?;
    let template = f.job_template("deploy", project, inventory.id, json!({})).await?;
    let user = f.repos.organizations.create_user(&User::new("dave")).await?;

    let err = f
        .controller
        .launch_by(user.id, template, &LaunchOverrides::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::Permission(_)));

    let execute = f
        .roles
        .role_for(ContentType::JobTemplate, template, "execute_role")
        .await?;
    f.roles.add_member(execute.id, user.id).await?;
    let launched = f
        .controller
        .launch_by(user.id, template, &LaunchOverrides::default())
        .await?;

    let activity = f.repos.activity.list_for_object("job", launched.job_id).await?;
    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0].actor_id, Some(user.id));
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_event_ingest_requires_task_token() -> Result<()> {
    let f = fixture().await?;
    let inventory = f.inventory_with_hosts(&["web1"]).await?;
    let project = f.manual_project().await?;
    let template = f.job_template("deploy", project, inventory.id, json!({})).await?;
    let launched = f.controller.launch(template, &LaunchOverrides::default()).await?;

    // 未运行的作业没有令牌
    let job = f.repos.jobs.get_by_id(launched.job_id).await?.unwrap();
    assert!(f.vault.task_token(&job).is_none());

    f.task_manager.run_cycle().await?;
    let job = f.repos.jobs.get_by_id(launched.job_id).await?.unwrap();
    let token = f.vault.task_token(&job).expect("running job has a token");

    let err = f
        .controller
        .ingest_event(job.id, "forged", EventPayload::verbose(1, "x\n".into(), 0, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::Permission(_)));

    let start = EventPayload {
        event: "playbook_on_start".to_string(),
        counter: Some(1),
        stdout: Some("PLAY [all]\n".to_string()),
        start_line: Some(0),
        end_line: Some(1),
        ..Default::default()
    };
    f.controller.ingest_event(job.id, &token, start).await?;
    let stats = EventPayload {
        event: "playbook_on_stats".to_string(),
        counter: Some(2),
        event_data: json!({
            "ok": {"web1": 3},
            "changed": {"web1": 1},
            "failures": {},
            "dark": {},
            "processed": {"web1": 1},
            "skipped": {}
        }),
        stdout: Some("PLAY RECAP\nweb1 : ok=3\n".to_string()),
        start_line: Some(1),
        end_line: Some(3),
        ..Default::default()
    };
    f.controller.ingest_event(job.id, &token, stats).await?;

    let report = f.controller.status(job.id).await?;
    assert_eq!(report.status, JobStatus::Running);
    assert_eq!(report.counters.ok, 3);
    assert_eq!(report.counters.changed, 1);
    assert_eq!(report.counters.processed, 1);
    assert_eq!(report.stdout_range, (0, 3));
    assert_eq!(report.next_event_counter, 3);

    // 结束后令牌失效
    f.finish_job(job.id, JobStatus::Successful).await?;
    let err = f
        .controller
        .ingest_event(job.id, &token, EventPayload::verbose(3, "late\n".into(), 3, 4))
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::Permission(_)));
    Ok(())
}
