//! 执行器进程的文件系统隔离
//!
//! 使用 bubblewrap 包装执行器：平台配置、状态、日志、临时目录、项目目录
//! 与作业输出目录被空目录遮盖，作业工作目录、私有数据目录、执行器虚拟
//! 环境以可写方式重新暴露。隔离工具不可用时直接执行并在输出头部给出告警。

use std::collections::BTreeSet;
use std::env;
use std::path::{Path, PathBuf};

use conductor_core::config::{SandboxConfig, WorkerConfig};
use conductor_core::{ConductorError, ConductorResult};
use conductor_infrastructure::StructuredLogger;
use tempfile::TempDir;
use tracing::debug;

/// 包装后的启动参数
///
/// 遮盖用的空目录在执行器退出前必须保持存在。
#[derive(Debug)]
pub struct SandboxedCommand {
    pub program: String,
    pub args: Vec<String>,
    /// 未能隔离时写在输出开头的告警
    pub warning: Option<String>,
    _empty_dirs: Vec<TempDir>,
}

impl SandboxedCommand {
    fn plain(command: &[String], warning: Option<String>) -> Self {
        let (program, args) = match command.split_first() {
            Some((program, args)) => (program.clone(), args.to_vec()),
            None => (String::new(), Vec::new()),
        };
        Self {
            program,
            args,
            warning,
            _empty_dirs: Vec::new(),
        }
    }
}

pub struct SandboxLauncher {
    config: SandboxConfig,
    projects_root: String,
    joboutput_root: String,
}

impl SandboxLauncher {
    pub fn new(config: SandboxConfig, worker: &WorkerConfig) -> Self {
        Self {
            config,
            projects_root: worker.projects_root.clone(),
            joboutput_root: worker.joboutput_root.clone(),
        }
    }

    /// 在 PATH 中查找隔离工具
    pub fn tool_path(&self) -> Option<PathBuf> {
        let tool = Path::new(&self.config.tool);
        if tool.components().count() > 1 {
            return tool.is_file().then(|| tool.to_path_buf());
        }
        let paths = env::var_os("PATH")?;
        env::split_paths(&paths)
            .map(|dir| dir.join(tool))
            .find(|candidate| candidate.is_file())
    }

    /// 需要遮盖的路径，已规范化且去重
    pub fn hidden_paths(&self) -> Vec<PathBuf> {
        let configured = [
            self.config.config_dir.as_str(),
            self.config.state_root.as_str(),
            self.config.log_root.as_str(),
            self.config.temp_root.as_str(),
            self.projects_root.as_str(),
            self.joboutput_root.as_str(),
        ];
        canonical_set(
            configured
                .into_iter()
                .chain(self.config.hide_paths.iter().map(String::as_str)),
        )
    }

    /// 需要以可写方式暴露的路径，已规范化且去重
    pub fn exposed_paths(&self, cwd: &Path, private_data_dir: &Path) -> Vec<PathBuf> {
        let mut paths = vec![cwd.to_path_buf(), private_data_dir.to_path_buf()];
        if let Some(venv) = &self.config.runner_venv {
            paths.push(PathBuf::from(venv));
        }
        paths.extend(self.config.show_paths.iter().map(PathBuf::from));
        canonical_set(&paths)
    }

    /// 生成 bubblewrap 参数，`empty_dir` 为每个被遮盖路径提供一个空目录
    pub fn build_args<F>(
        &self,
        command: &[String],
        cwd: &Path,
        private_data_dir: &Path,
        mut empty_dir: F,
    ) -> ConductorResult<Vec<String>>
    where
        F: FnMut(&Path) -> ConductorResult<PathBuf>,
    {
        let cwd = cwd.canonicalize().map_err(|e| {
            ConductorError::Sandbox(format!("工作目录不可用 {}: {e}", cwd.display()))
        })?;

        let mut args: Vec<String> = ["--bind", "/", "/", "--dev", "/dev", "--proc", "/proc"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        for hidden in self.hidden_paths() {
            let empty = empty_dir(&hidden)?;
            args.push("--bind".to_string());
            args.push(empty.display().to_string());
            args.push(hidden.display().to_string());
        }

        for exposed in self.exposed_paths(&cwd, private_data_dir) {
            let path = exposed.display().to_string();
            args.push("--bind".to_string());
            args.push(path.clone());
            args.push(path);
        }

        args.push("--unshare-pid".to_string());
        args.push("--chdir".to_string());
        args.push(cwd.display().to_string());
        args.push("--".to_string());
        args.extend(command.iter().cloned());
        Ok(args)
    }

    /// 包装执行器命令，无法隔离时退回直接执行并附带告警
    pub fn wrap(
        &self,
        command: &[String],
        cwd: &Path,
        private_data_dir: &Path,
    ) -> SandboxedCommand {
        if !self.config.enabled {
            return SandboxedCommand::plain(command, None);
        }

        let Some(tool) = self.tool_path() else {
            let err = ConductorError::Sandbox(format!("未找到隔离工具 {}", self.config.tool));
            return self.fallback(command, &err);
        };

        let mut empty_dirs = Vec::new();
        let built = self.build_args(command, cwd, private_data_dir, |_| {
            let dir = tempfile::Builder::new()
                .prefix("conductor_hide_")
                .tempdir()?;
            let path = dir.path().to_path_buf();
            empty_dirs.push(dir);
            Ok(path)
        });
        let args = match built {
            Ok(args) => args,
            Err(e) => return self.fallback(command, &e),
        };

        debug!("沙箱参数: {}", args.join(" "));
        SandboxedCommand {
            program: tool.display().to_string(),
            args,
            warning: None,
            _empty_dirs: empty_dirs,
        }
    }

    fn fallback(&self, command: &[String], err: &ConductorError) -> SandboxedCommand {
        StructuredLogger::log_system_error("sandbox", "wrap", err);
        let warning = format!(
            "[WARNING] 隔离工具 {} 不可用，作业未经文件系统隔离直接运行: {}",
            self.config.tool, err
        );
        SandboxedCommand::plain(command, Some(warning))
    }
}

/// 规范化存在的路径，不存在的跳过
fn canonical_set<I, P>(paths: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut seen = BTreeSet::new();
    let mut result = Vec::new();
    for path in paths {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            continue;
        }
        match path.canonicalize() {
            Ok(canonical) => {
                if seen.insert(canonical.clone()) {
                    result.push(canonical);
                }
            }
            Err(_) => debug!("跳过不存在的路径 {}", path.display()),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launcher(root: &Path) -> SandboxLauncher {
        let dir = |name: &str| {
            let path = root.join(name);
            std::fs::create_dir_all(&path).unwrap();
            path.display().to_string()
        };
        let config = SandboxConfig {
            enabled: true,
            tool: "bwrap".to_string(),
            config_dir: dir("etc"),
            state_root: dir("state"),
            log_root: dir("log"),
            temp_root: dir("tmp"),
            runner_venv: Some(dir("venv")),
            hide_paths: vec![dir("secret"), root.join("missing").display().to_string()],
            show_paths: vec![dir("shared")],
        };
        let worker = WorkerConfig {
            projects_root: dir("projects"),
            joboutput_root: dir("job_status"),
            ..Default::default()
        };
        SandboxLauncher::new(config, &worker)
    }

    #[test]
    fn test_hidden_paths_are_covered_then_exposed() {
        let root = TempDir::new().unwrap();
        let launcher = launcher(root.path());
        let cwd = root.path().join("projects/site");
        std::fs::create_dir_all(&cwd).unwrap();
        let private = root.path().join("tmp/private");
        std::fs::create_dir_all(&private).unwrap();

        let mut covered = Vec::new();
        let args = launcher
            .build_args(
                &["ansible-playbook".to_string(), "site.yml".to_string()],
                &cwd,
                &private,
                |hidden| {
                    covered.push(hidden.to_path_buf());
                    Ok(PathBuf::from(format!("/empty/{}", covered.len())))
                },
            )
            .unwrap();

        // 六个平台路径加一个管理员路径，不存在的被跳过
        assert_eq!(covered.len(), 7);
        assert_eq!(&args[..7], ["--bind", "/", "/", "--dev", "/dev", "--proc", "/proc"]);

        let canonical_root = root.path().canonicalize().unwrap();
        let projects = canonical_root.join("projects").display().to_string();
        let cwd_text = canonical_root.join("projects/site").display().to_string();
        let hide_at = args.iter().position(|a| *a == projects).unwrap();
        let show_at = args.iter().rposition(|a| *a == cwd_text).unwrap();
        assert!(hide_at < show_at);

        let tail: Vec<&str> = args.iter().rev().take(6).map(String::as_str).collect();
        assert_eq!(tail[0], "site.yml");
        assert_eq!(tail[1], "ansible-playbook");
        assert_eq!(tail[2], "--");
        assert_eq!(tail[3], cwd_text);
        assert_eq!(tail[4], "--chdir");
        assert_eq!(tail[5], "--unshare-pid");
        assert!(args.iter().any(|a| a.ends_with("/venv")));
        assert!(args.iter().any(|a| a.ends_with("/shared")));
    }

    #[test]
    fn test_missing_tool_falls_back_with_warning() {
        let root = TempDir::new().unwrap();
        let mut launcher = launcher(root.path());
        launcher.config.tool = "conductor-no-such-sandbox-tool".to_string();

        let wrapped =
            launcher.wrap(&["echo".to_string(), "hi".to_string()], root.path(), root.path());
        assert_eq!(wrapped.program, "echo");
        assert_eq!(wrapped.args, vec!["hi"]);
        assert!(wrapped.warning.unwrap().contains("conductor-no-such-sandbox-tool"));
    }

    #[test]
    fn test_disabled_sandbox_runs_plain() {
        let root = TempDir::new().unwrap();
        let mut launcher = launcher(root.path());
        launcher.config.enabled = false;

        let wrapped = launcher.wrap(&["true".to_string()], root.path(), root.path());
        assert_eq!(wrapped.program, "true");
        assert!(wrapped.args.is_empty());
        assert!(wrapped.warning.is_none());
    }

    #[test]
    fn test_missing_cwd_is_a_sandbox_error() {
        let root = TempDir::new().unwrap();
        let launcher = launcher(root.path());
        let err = launcher
            .build_args(&[], &root.path().join("nope"), root.path(), |p| Ok(p.to_path_buf()))
            .unwrap_err();
        assert!(matches!(err, ConductorError::Sandbox(_)));
    }
}
