use anyhow::Context;
use chrono::{Days, NaiveDate};
use qfin_core::acquire::entity::RunStatistics;
use qfin_core::common::time::{RealTimeProvider, TimeProvider};
use qfin_core::common::{DataKind, DateRange, Exchange};
use qfin_core::config::{AcquisitionConfig, AppConfig};
use qfin_core::store::port::{AuditLevel, BarRanking, MarketStore};
use qfin_feed::{build_providers, install_crypto_provider};
use qfin_pipeline::{BatchImporter, Shutdown, ShutdownSignal, build_importer};
use qfin_scheduler::{JobKind, JobReport, Scheduler};
use qfin_store::SqliteMarketStore;
use std::sync::Arc;
use tracing::{info, warn};

use crate::report::{self, Snapshot};

/// 状态报告中按日统计的天数
const STATUS_DAYS: u64 = 7;

/// 状态报告中每类审计日志与排行的条数
const STATUS_ROWS: usize = 10;

/// `status` 命令的附加输出
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusArgs {
    pub logs: bool,
    pub top: bool,
}

/// `import` 命令的参数
#[derive(Debug, Clone, Default)]
pub struct ImportArgs {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub symbols: Vec<String>,
    pub kinds: Vec<DataKind>,
    pub market: Option<Exchange>,
    pub chunk_size: Option<usize>,
}

fn today() -> NaiveDate {
    RealTimeProvider.market_now().date()
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<SqliteMarketStore>> {
    let store = SqliteMarketStore::open(&config.database.path)
        .await
        .with_context(|| format!("failed to open database {}", config.database.path))?;
    Ok(Arc::new(store))
}

/// 组装数据源链与批量导入器
fn importer(
    config: &AppConfig,
    acquisition: &AcquisitionConfig,
    store: Arc<SqliteMarketStore>,
) -> anyhow::Result<Arc<BatchImporter>> {
    install_crypto_provider();
    let providers = build_providers(&config.feed)?;
    Ok(Arc::new(build_importer(providers, store, acquisition)))
}

fn scheduler(config: &AppConfig, importer: Arc<BatchImporter>) -> anyhow::Result<Scheduler> {
    let scheduler = Scheduler::new(
        importer,
        Arc::new(RealTimeProvider),
        &config.schedule,
        config.acquisition.intraday_symbol_limit,
    )?;
    Ok(scheduler)
}

/// 收到 Ctrl-C 时触发关闭信号
fn shutdown_on_ctrl_c() -> ShutdownSignal {
    let shutdown = Shutdown::new();
    let signal = shutdown.signal();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, finishing in-flight work");
                shutdown.trigger();
            }
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });
    signal
}

fn print_stats(stats: &RunStatistics) {
    println!("run id:          {}", stats.run_id);
    println!("symbols:         {}", stats.total_symbols);
    println!(
        "units:           {}/{} (empty {})",
        stats.processed_units, stats.total_units, stats.empty_units
    );
    println!("succeeded:       {}", stats.succeeded.len());
    println!("failed:          {}", stats.failed.len());
    for kind in [DataKind::Bars, DataKind::Ticks] {
        let persisted = match stats.persisted.get(&kind) {
            Some(true) => "saved",
            Some(false) => "NOT saved",
            None => "-",
        };
        println!(
            "{:<16} {} ({})",
            format!("{}:", kind),
            stats.records_of(kind),
            persisted
        );
    }
    if stats.cancelled {
        println!("cancelled:       {} units skipped", stats.skipped_units());
    }
    if !stats.failed.is_empty() {
        let sample: Vec<&str> = stats.failed.iter().take(20).map(String::as_str).collect();
        println!("failed symbols:  {}", sample.join(" "));
    }
}

/// 创建数据库与表结构
pub async fn init(config: &AppConfig) -> anyhow::Result<()> {
    open_store(config).await?;
    println!("database ready: {}", config.database.path);
    Ok(())
}

/// 运行调度器直到 Ctrl-C
pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let importer = importer(config, &config.acquisition, store)?;
    let scheduler = scheduler(config, importer)?;
    scheduler.run(shutdown_on_ctrl_c()).await;
    Ok(())
}

/// 立即执行一次收盘采集
pub async fn once(config: &AppConfig, force: bool) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let importer = importer(config, &config.acquisition, store)?;
    let scheduler = scheduler(config, importer)?;

    match scheduler
        .run_job(JobKind::DailyClose, force, &shutdown_on_ctrl_c())
        .await?
    {
        JobReport::Skipped(reason) => println!("skipped: {:?} (use --force to override)", reason),
        JobReport::Imported(stats) => print_stats(&stats),
        JobReport::Listing(count) => println!("listing refreshed: {} symbols", count),
    }
    Ok(())
}

/// 只刷新证券列表
pub async fn listing(config: &AppConfig) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let importer = importer(config, &config.acquisition, store)?;
    let listing = importer.refresh_listing().await?;
    println!("listing refreshed: {} symbols", listing.len());
    Ok(())
}

/// # Summary
/// 按参数执行一次批量导入。
///
/// # Logic
/// 1. 结束日期缺省为今天，开始日期缺省为结束日期前 `default_lookback_days` 天。
/// 2. 未指定证券时使用已存储的全部证券 (存储为空时先拉取列表)。
/// 3. 按交易所过滤，未指定数据种类时日线与成交明细都导入。
pub async fn import(config: &AppConfig, args: ImportArgs) -> anyhow::Result<()> {
    let end = args.end.unwrap_or_else(today);
    let start = match args.start {
        Some(start) => start,
        None => end
            .checked_sub_days(Days::new(u64::from(config.acquisition.default_lookback_days)))
            .unwrap_or(end),
    };
    let range = DateRange::new(start, end)?;

    let mut acquisition = config.acquisition.clone();
    if let Some(chunk_size) = args.chunk_size {
        acquisition.chunk_size = chunk_size.max(1);
    }
    let store = open_store(config).await?;
    let importer = importer(config, &acquisition, store)?;

    let symbols: Vec<String> = if args.symbols.is_empty() {
        importer
            .universe(None)
            .await?
            .into_iter()
            .filter(|s| args.market.is_none_or(|m| s.exchange == m))
            .map(|s| s.symbol)
            .collect()
    } else {
        args.symbols
            .into_iter()
            .filter(|s| args.market.is_none_or(|m| Exchange::from_symbol(s) == m))
            .collect()
    };
    let kinds = if args.kinds.is_empty() {
        vec![DataKind::Bars, DataKind::Ticks]
    } else {
        args.kinds
    };

    info!(symbols = symbols.len(), range = %range, kinds = ?kinds, "Batch import requested");
    let stats = importer
        .run(&symbols, range, &kinds, &shutdown_on_ctrl_c())
        .await;
    print_stats(&stats);
    Ok(())
}

/// # Summary
/// 显示存储中的数据概况与质量检查结果。
///
/// # Logic
/// 1. 输出证券、日线、成交明细的总数与当日条数，以及最新交易日。
/// 2. 输出最近 7 天每日的日线与成交明细条数。
/// 3. 检查当日日线完整度、当日成交明细与最新日线是否过期。
/// 4. `--logs` 输出最近的 ERROR 与 INFO 审计日志。
/// 5. `--top` 输出成交量与成交额排行，当日无日线时取最新交易日。
pub async fn status(config: &AppConfig, args: StatusArgs) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let today = today();

    let snapshot = Snapshot {
        today,
        symbols: store.count_symbols().await?,
        bars_today: store.count_bars(Some(today)).await?,
        ticks_today: store.count_ticks(Some(today)).await?,
        latest: store.latest_trade_date().await?,
    };

    println!("database:        {}", config.database.path);
    println!("symbols:         {}", snapshot.symbols);
    println!("daily bars:      {}", store.count_bars(None).await?);
    println!("ticks:           {}", store.count_ticks(None).await?);
    println!("bars today:      {}", snapshot.bars_today);
    println!("ticks today:     {}", snapshot.ticks_today);
    match snapshot.latest {
        Some(date) => println!("latest date:     {}", date),
        None => println!("latest date:     -"),
    }

    let since = today.checked_sub_days(Days::new(STATUS_DAYS)).unwrap_or(today);
    report::print_daily_counts("recent bars:", &store.bar_counts_since(since).await?);
    report::print_daily_counts("recent ticks:", &store.tick_counts_since(since).await?);
    report::print_quality(&report::quality_issues(&snapshot));

    if args.logs {
        for (title, level) in [
            ("recent errors:", AuditLevel::Error),
            ("recent info:", AuditLevel::Info),
        ] {
            let logs = store.recent_audit_logs(Some(level), STATUS_ROWS).await?;
            report::print_audit_logs(title, &logs);
        }
    }

    if args.top {
        let date = match snapshot.latest {
            Some(latest) if snapshot.bars_today == 0 => latest,
            _ => today,
        };
        println!("top bars on {}:", date);
        for (title, by) in [
            ("by volume:", BarRanking::Volume),
            ("by amount:", BarRanking::Amount),
        ] {
            let bars = store.top_bars(date, by, STATUS_ROWS).await?;
            report::print_top_bars(title, &bars);
        }
    }
    Ok(())
}

/// 显示日线覆盖报告
pub async fn summary(config: &AppConfig) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    println!("database:        {}", config.database.path);
    report::print_coverage(&store.coverage().await?);
    Ok(())
}
