use serde::{Deserialize, Serialize};

/// 子进程文件系统隔离配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub enabled: bool,
    /// bubblewrap 可执行文件
    pub tool: String,
    /// 平台配置目录
    pub config_dir: String,
    /// 平台状态目录
    pub state_root: String,
    pub log_root: String,
    pub temp_root: String,
    /// 执行器虚拟环境，以可写方式暴露
    pub runner_venv: Option<String>,
    /// 额外隐藏的路径
    pub hide_paths: Vec<String>,
    /// 额外暴露的路径
    pub show_paths: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tool: "bwrap".to_string(),
            config_dir: "/etc/conductor".to_string(),
            state_root: "/var/lib/conductor".to_string(),
            log_root: "/var/log/conductor".to_string(),
            temp_root: "/tmp".to_string(),
            runner_venv: None,
            hide_paths: Vec::new(),
            show_paths: Vec::new(),
        }
    }
}

impl SandboxConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.enabled && self.tool.is_empty() {
            return Err(anyhow::anyhow!("启用沙箱时必须指定隔离工具"));
        }

        for path in self.hide_paths.iter().chain(self.show_paths.iter()) {
            if !path.starts_with('/') {
                return Err(anyhow::anyhow!("沙箱路径必须是绝对路径: {}", path));
            }
        }

        Ok(())
    }
}
