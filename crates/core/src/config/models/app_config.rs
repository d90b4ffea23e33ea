use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    database::DatabaseConfig,
    dispatcher_worker::{DispatcherConfig, WorkerConfig},
    observability::ObservabilityConfig,
    sandbox::SandboxConfig,
    security::SecurityConfig,
};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub dispatcher: DispatcherConfig,
    pub worker: WorkerConfig,
    pub sandbox: SandboxConfig,
    pub security: SecurityConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: CONDUCTOR_)
    /// 4. SECRET_KEY / SYSTEM_UUID / PROJECTS_ROOT / JOBOUTPUT_ROOT
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/conductor.toml",
                "conductor.toml",
                "/etc/conductor/config.toml",
            ];

            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("CONDUCTOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.apply_platform_env(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// 应用平台约定的环境变量
    pub fn apply_platform_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("SECRET_KEY") {
            self.security.secret_key = value;
        }
        if let Some(value) = lookup("SYSTEM_UUID") {
            self.security.system_uuid = value;
        }
        if let Some(value) = lookup("PROJECTS_ROOT") {
            self.worker.projects_root = value;
        }
        if let Some(value) = lookup("JOBOUTPUT_ROOT") {
            self.worker.joboutput_root = value;
        }
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.dispatcher
            .validate()
            .context("调度器配置验证失败")?;
        self.worker.validate().context("Worker配置验证失败")?;
        self.sandbox.validate().context("沙箱配置验证失败")?;
        self.security.validate().context("安全配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        Ok(())
    }
}
