use clap::Parser;
use cli::{Cli, Command};
use commands::{ImportArgs, StatusArgs};
use tracing::info;

mod cli;
mod commands;
mod logging;
mod report;
mod settings;

/// # Summary
/// 应用启动入口，负责配置加载、日志安装与命令分发。
/// 所有具体实现 (数据源、存储、管线、调度器) 在各命令中实例化并通过 `Arc` 注入。
///
/// # Logic
/// 1. 解析命令行。
/// 2. 加载并校验配置，失败时直接退出。
/// 3. 安装日志订阅器，守卫保持到进程结束。
/// 4. 执行子命令，未指定时运行调度器。
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = settings::load(cli.config.as_deref())?;
    let _log_guard = logging::init(&config.log)?;
    info!(version = env!("CARGO_PKG_VERSION"), "qfin starting");

    match cli.command.unwrap_or(Command::Run) {
        Command::Init => commands::init(&config).await,
        Command::Run => commands::run(&config).await,
        Command::Once { force } => commands::once(&config, force).await,
        Command::Listing => commands::listing(&config).await,
        Command::Import {
            start,
            end,
            symbols,
            kinds,
            market,
            chunk_size,
        } => {
            let args = ImportArgs {
                start,
                end,
                symbols,
                kinds,
                market,
                chunk_size,
            };
            commands::import(&config, args).await
        }
        Command::Status { logs, top } => {
            commands::status(&config, StatusArgs { logs, top }).await
        }
        Command::Summary => commands::summary(&config).await,
    }
}
