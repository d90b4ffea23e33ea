use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use conductor::cli::{self, Cli};
use conductor_core::init_logging;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("加载配置失败: {e:#}");
            return ExitCode::from(cli::exit_code(&e) as u8);
        }
    };

    if let Err(e) = init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    ) {
        eprintln!("初始化日志失败: {e:#}");
        return ExitCode::from(2);
    }

    info!("Conductor 启动");
    match cli::execute(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("执行失败: {e:#}");
            eprintln!("{e:#}");
            ExitCode::from(cli::exit_code(&e) as u8)
        }
    }
}
