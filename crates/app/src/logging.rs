use qfin_core::config::LogConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// # Summary
/// 安装全局日志订阅器。
///
/// # Logic
/// 1. 过滤级别优先取 `RUST_LOG`，否则取配置中的 `log.level`。
/// 2. 控制台输出一份，按天滚动的日志文件输出一份 (非阻塞写入)。
///
/// # Returns
/// 文件写入线程的守卫，进程退出前必须一直持有，否则尾部日志会丢失。
pub fn init(config: &LogConfig) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(&config.dir)?;
    let appender = tracing_appender::rolling::daily(&config.dir, &config.file_prefix);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()?;
    Ok(guard)
}
