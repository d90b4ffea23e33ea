//! 命令行入口
//!
//! `serve` 以常驻方式运行调度器与Worker，其余子命令直接操作数据库后退出。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conductor_core::models::TemplateKind;
use conductor_core::{AppConfig, ConductorError};
use conductor_domain::LaunchOverrides;
use conductor_infrastructure::init_metrics;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::app::{AppMode, Application};
use crate::shutdown::{wait_for_shutdown_signal, ShutdownManager};

/// 组件停止的最长等待时间
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(version)]
#[command(about = "多租户自动化平台作业编排核心")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 配置文件路径，缺省时按默认位置查找
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short = 'l', long, global = true, value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: Option<String>,

    /// 日志格式，覆盖配置文件
    #[arg(long, global = true, value_parser = ["json", "pretty"])]
    pub log_format: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 运行调度器和/或Worker
    Serve {
        #[arg(short, long, default_value = "all", value_parser = ["dispatcher", "worker", "all"])]
        mode: String,
        /// 覆盖配置中的Worker ID
        #[arg(long)]
        worker_id: Option<String>,
    },
    /// 启动模板
    Launch {
        template_id: i64,
        /// 额外变量，JSON 或 YAML 文本
        #[arg(short, long)]
        extra_vars: Option<String>,
        #[arg(long)]
        limit: Option<String>,
        #[arg(long)]
        job_tags: Option<String>,
        #[arg(long)]
        skip_tags: Option<String>,
        #[arg(long)]
        inventory: Option<i64>,
        #[arg(long)]
        credential: Option<i64>,
        /// 启动密码，格式 `提示名=值`，可重复
        #[arg(short, long = "password", value_parser = parse_key_value)]
        passwords: Vec<(String, String)>,
        /// 以该用户身份启动，需要执行权限
        #[arg(short, long)]
        user: Option<i64>,
    },
    /// 以原作业的冻结字段重新启动
    Relaunch {
        job_id: i64,
        #[arg(short, long = "password", value_parser = parse_key_value)]
        passwords: Vec<(String, String)>,
    },
    /// 取消作业
    Cancel { job_id: i64 },
    /// 查询作业状态
    Status { job_id: i64 },
    /// 创建模板
    CreateTemplate {
        #[arg(value_parser = ["job_template", "project", "inventory_source", "system_job_template"])]
        kind: String,
        /// 模板字段，JSON 对象
        fields: String,
    },
}

fn parse_key_value(value: &str) -> std::result::Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("需要 `名称=值` 格式: {value}"))
}

impl Cli {
    /// 加载配置并应用命令行覆盖项
    pub fn load_config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::load(self.config.as_deref())
            .map_err(|e| ConductorError::Configuration(format!("{e:#}")))?;
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.observability.log_format = format.clone();
        }
        if let Commands::Serve {
            worker_id: Some(id),
            ..
        } = &self.command
        {
            config.worker.worker_id = id.clone();
        }
        Ok(config)
    }
}

/// 错误对应的进程退出码
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ConductorError>())
        .map(ConductorError::exit_code)
        .unwrap_or(1)
}

/// 执行子命令
pub async fn execute(command: Commands, config: AppConfig) -> Result<()> {
    match command {
        Commands::Serve { mode, .. } => {
            let mode = AppMode::parse(&mode)
                .ok_or_else(|| ConductorError::validation(format!("不支持的运行模式: {mode}")))?;
            serve(config, mode).await
        }
        command => {
            let app = Application::new(config, AppMode::All).await?;
            let output = run_command(&app, command).await?;
            println!("{output}");
            Ok(())
        }
    }
}

/// 一次性命令，返回要打印的 JSON 文本
pub async fn run_command(app: &Application, command: Commands) -> Result<String> {
    let controller = app.controller();
    match command {
        Commands::Serve { .. } => Err(anyhow::anyhow!("serve 不是一次性命令")),
        Commands::Launch {
            template_id,
            extra_vars,
            limit,
            job_tags,
            skip_tags,
            inventory,
            credential,
            passwords,
            user,
        } => {
            let overrides = LaunchOverrides {
                extra_vars: extra_vars.map(Value::String),
                limit,
                job_tags,
                skip_tags,
                job_type: None,
                inventory_id: inventory,
                credential_id: credential,
                passwords: passwords.into_iter().collect::<HashMap<_, _>>(),
            };
            let result = match user {
                Some(user_id) => controller.launch_by(user_id, template_id, &overrides).await?,
                None => controller.launch(template_id, &overrides).await?,
            };
            info!("模板 {} 已创建作业 {}", template_id, result.job_id);
            to_json(&result)
        }
        Commands::Relaunch { job_id, passwords } => {
            let passwords: HashMap<_, _> = passwords.into_iter().collect();
            to_json(&controller.relaunch(job_id, &passwords).await?)
        }
        Commands::Cancel { job_id } => {
            let status = controller.cancel(job_id).await?;
            to_json(&serde_json::json!({ "job_id": job_id, "status": status }))
        }
        Commands::Status { job_id } => to_json(&controller.status(job_id).await?),
        Commands::CreateTemplate { kind, fields } => {
            let kind = TemplateKind::parse(&kind)
                .ok_or_else(|| ConductorError::validation(format!("未知的模板类型: {kind}")))?;
            let fields: Value = serde_json::from_str(&fields)
                .map_err(|e| ConductorError::validation(format!("模板字段不是有效的 JSON: {e}")))?;
            let id = controller.create_template(kind, fields).await?;
            to_json(&serde_json::json!({ "id": id, "kind": kind }))
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("序列化输出失败")
}

async fn serve(config: AppConfig, mode: AppMode) -> Result<()> {
    info!("运行模式: {:?}", mode);
    if config.observability.metrics_enabled {
        init_metrics(&config.observability.metrics_bind_address)?;
    }
    let app = Arc::new(Application::new(config, mode).await?);
    let shutdown_manager = ShutdownManager::new();

    let mut app_handle = {
        let app = Arc::clone(&app);
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
        }
        result = &mut app_handle => {
            // 组件提前退出
            return match result {
                Ok(result) => result,
                Err(e) => Err(anyhow::anyhow!("应用任务异常退出: {e}")),
            };
        }
    }

    shutdown_manager.shutdown().await;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, app_handle).await {
        Ok(Ok(Ok(()))) => info!("应用已优雅关闭"),
        Ok(Ok(Err(e))) => error!("应用关闭时发生错误: {e}"),
        Ok(Err(e)) => error!("应用任务异常退出: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_launch_arguments() {
        let cli = Cli::try_parse_from([
            "conductor",
            "launch",
            "7",
            "--extra-vars",
            "{\"a\": 1}",
            "-p",
            "ssh_password=secret",
            "--limit",
            "web",
        ])
        .unwrap();

        let Commands::Launch {
            template_id,
            extra_vars,
            passwords,
            limit,
            ..
        } = cli.command
        else {
            panic!("应解析为 launch");
        };
        assert_eq!(template_id, 7);
        assert_eq!(extra_vars.as_deref(), Some("{\"a\": 1}"));
        assert_eq!(passwords, vec![("ssh_password".to_string(), "secret".to_string())]);
        assert_eq!(limit.as_deref(), Some("web"));
    }

    #[test]
    fn test_password_requires_name_value() {
        assert!(Cli::try_parse_from(["conductor", "launch", "1", "-p", "secret"]).is_err());
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::try_parse_from(["conductor", "status", "3", "--log-format", "json"]).unwrap();
        assert_eq!(cli.log_format.as_deref(), Some("json"));
        assert!(matches!(cli.command, Commands::Status { job_id: 3 }));
    }

    #[test]
    fn test_exit_codes_follow_error_kind() {
        let not_found: anyhow::Error = ConductorError::not_found("作业", 9).into();
        assert_eq!(exit_code(&not_found), 4);

        let config = anyhow::Error::from(ConductorError::Configuration("缺少密钥".into()))
            .context("加载配置失败");
        assert_eq!(exit_code(&config), 2);

        assert_eq!(exit_code(&anyhow::anyhow!("其他错误")), 1);
    }

    #[test]
    fn test_missing_config_file_is_configuration_error() {
        let cli = Cli::try_parse_from([
            "conductor",
            "--config",
            "/nonexistent/conductor.toml",
            "status",
            "1",
        ])
        .unwrap();
        let err = cli.load_config().unwrap_err();
        assert_eq!(exit_code(&err), 2);
    }
}
