use crate::executor::FetchExecutor;
use crate::shutdown::ShutdownSignal;
use chrono::NaiveDate;
use futures::{StreamExt, future, stream};
use qfin_core::acquire::entity::{FetchOutcome, Records, RunStatistics, WorkUnit};
use qfin_core::common::calendar::TradingCalendar;
use qfin_core::common::{DataKind, DateRange};
use qfin_core::config::AcquisitionConfig;
use qfin_core::market::entity::{DailyBar, SymbolInfo, TickRecord};
use qfin_core::store::error::StoreError;
use qfin_core::store::port::{AuditLevel, MarketStore};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

const COMPONENT: &str = "importer";

/// # Summary
/// 证券列表刷新与进度查询的错误。
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Listing fetch failed after {attempts} attempts: {message}")]
    ListingFailed { message: String, attempts: u32 },
    #[error("Provider `{0}` returned an empty listing")]
    EmptyListing(String),
    #[error("Unexpected records returned for listing request")]
    UnexpectedRecords,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// # Summary
/// 批量导入的并发与分批参数。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    // 同时执行的工作单元上限
    pub concurrency: usize,
    // 每批证券数
    pub chunk_size: usize,
    // 批与批之间的停顿
    pub chunk_pause: Duration,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            chunk_size: 50,
            chunk_pause: Duration::ZERO,
        }
    }
}

impl From<&AcquisitionConfig> for ImportOptions {
    fn from(config: &AcquisitionConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            chunk_size: config.chunk_size,
            chunk_pause: config.chunk_pause(),
        }
    }
}

/// # Summary
/// 存储中的数据概况。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub symbols: i64,
    pub bars: i64,
    pub ticks: i64,
    pub latest_trade_date: Option<NaiveDate>,
}

/// 运行期间累积的待写入记录
#[derive(Default)]
struct Collected {
    bars: Vec<DailyBar>,
    ticks: BTreeMap<String, Vec<TickRecord>>,
}

impl Collected {
    fn absorb(&mut self, unit: &WorkUnit, outcome: FetchOutcome) {
        if let FetchOutcome::Data { records, .. } = outcome {
            match records {
                Records::Bars(bars) => self.bars.extend(bars),
                Records::Ticks(ticks) => self
                    .ticks
                    .entry(unit.symbol.clone())
                    .or_default()
                    .extend(ticks),
                Records::Listing(_) => {}
            }
        }
    }
}

/// # Summary
/// 批量导入器：为证券 × 日期 × 数据种类生成工作单元，并发执行并批量落库。
///
/// # Invariants
/// - 结果统计由单一消费者汇总，集合更新无竞争。
/// - 每种数据在运行结束时至多一次批量写入；写入失败不会中止运行。
/// - 关闭信号触发后不再发起新的工作单元，已在执行的单元正常完成。
pub struct BatchImporter {
    executor: Arc<FetchExecutor>,
    store: Arc<dyn MarketStore>,
    calendar: TradingCalendar,
    options: ImportOptions,
}

impl BatchImporter {
    pub fn new(
        executor: Arc<FetchExecutor>,
        store: Arc<dyn MarketStore>,
        options: ImportOptions,
    ) -> Self {
        Self {
            executor,
            store,
            calendar: TradingCalendar::default(),
            options,
        }
    }

    pub fn with_calendar(mut self, calendar: TradingCalendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn store(&self) -> &Arc<dyn MarketStore> {
        &self.store
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    /// # Summary
    /// 生成一批证券的工作单元。
    ///
    /// # Logic
    /// 日线每只证券一个单元覆盖整个区间；成交明细每只证券每个交易日一个单元。
    pub fn plan(&self, symbols: &[String], range: DateRange, kinds: &[DataKind]) -> Vec<WorkUnit> {
        let trading_days = self.calendar.trading_days(range);
        let mut units = Vec::new();
        for symbol in symbols {
            if kinds.contains(&DataKind::Bars) {
                units.push(WorkUnit::bars(symbol.clone(), range));
            }
            if kinds.contains(&DataKind::Ticks) {
                units.extend(
                    trading_days
                        .iter()
                        .map(|day| WorkUnit::ticks(symbol.clone(), *day)),
                );
            }
        }
        units
    }

    /// # Summary
    /// 执行一次批量导入。
    ///
    /// # Logic
    /// 1. 证券去重（保留首次出现顺序），统计计划单元数。
    /// 2. 按 `chunk_size` 分批；批间按 `chunk_pause` 停顿，停顿可被关闭信号打断。
    /// 3. 批内以 `concurrency` 为上限并发执行单元，逐个汇总结果。
    /// 4. 关闭信号触发后停止发起新单元，标记 `cancelled`。
    /// 5. 每种数据一次批量写入（无记录则跳过），写入失败记录日志与审计。
    ///
    /// # Arguments
    /// * `symbols`: 证券代码。
    /// * `range`: 日期范围（闭区间）。
    /// * `kinds`: 采集的数据种类。
    /// * `shutdown`: 关闭信号。
    ///
    /// # Returns
    /// 本次运行的统计，不返回错误。
    pub async fn run(
        &self,
        symbols: &[String],
        range: DateRange,
        kinds: &[DataKind],
        shutdown: &ShutdownSignal,
    ) -> RunStatistics {
        let mut seen = HashSet::new();
        let symbols: Vec<String> = symbols
            .iter()
            .filter(|s| seen.insert(s.as_str()))
            .cloned()
            .collect();

        let run_id = Uuid::new_v4().to_string();
        let mut stats = RunStatistics::new(run_id.clone(), symbols.len());
        stats.total_units = self.plan(&symbols, range, kinds).len();
        info!(
            run_id = %run_id,
            symbols = symbols.len(),
            units = stats.total_units,
            range = %range,
            kinds = ?kinds,
            "Import run started"
        );

        let concurrency = self.options.concurrency.max(1);
        let chunk_size = self.options.chunk_size.max(1);
        let chunks: Vec<&[String]> = symbols.chunks(chunk_size).collect();
        let mut collected = Collected::default();

        for (index, chunk) in chunks.iter().enumerate() {
            if index > 0 && !self.options.chunk_pause.is_zero() {
                let mut signal = shutdown.clone();
                tokio::select! {
                    _ = tokio::time::sleep(self.options.chunk_pause) => {}
                    _ = signal.triggered() => {}
                }
            }
            if shutdown.is_triggered() {
                break;
            }

            let executor = self.executor.as_ref();
            let signal = shutdown.clone();
            let mut outcomes = stream::iter(self.plan(chunk, range, kinds))
                .take_while(move |_| future::ready(!signal.is_triggered()))
                .map(move |unit| async move {
                    let outcome = executor.execute(&unit).await;
                    (unit, outcome)
                })
                .buffer_unordered(concurrency);

            while let Some((unit, outcome)) = outcomes.next().await {
                stats.record(&unit, &outcome);
                collected.absorb(&unit, outcome);
            }

            info!(
                run_id = %run_id,
                chunk = index + 1,
                chunks = chunks.len(),
                processed = stats.processed_units,
                total = stats.total_units,
                "Chunk finished"
            );
        }

        stats.cancelled = shutdown.is_triggered() && stats.skipped_units() > 0;
        if stats.cancelled {
            warn!(
                run_id = %run_id,
                skipped = stats.skipped_units(),
                "Import run cancelled by shutdown"
            );
        }

        self.persist(&mut stats, collected, kinds).await;

        info!(
            run_id = %run_id,
            succeeded = stats.succeeded.len(),
            failed = stats.failed.len(),
            empty = stats.empty_units,
            bars = stats.records_of(DataKind::Bars),
            ticks = stats.records_of(DataKind::Ticks),
            "Import run finished"
        );
        stats
    }

    /// 每种数据一次批量写入，结果记入 `persisted`
    async fn persist(&self, stats: &mut RunStatistics, collected: Collected, kinds: &[DataKind]) {
        if kinds.contains(&DataKind::Bars) && !collected.bars.is_empty() {
            let result = self.store.save_bars(&collected.bars).await;
            let ok = self.report_write(&stats.run_id, "save_bars", result).await;
            stats.persisted.insert(DataKind::Bars, ok);
        }
        if kinds.contains(&DataKind::Ticks) && collected.ticks.values().any(|t| !t.is_empty()) {
            let result = self.store.save_ticks(&collected.ticks).await;
            let ok = self.report_write(&stats.run_id, "save_ticks", result).await;
            stats.persisted.insert(DataKind::Ticks, ok);
        }
    }

    async fn report_write(
        &self,
        run_id: &str,
        operation: &str,
        result: Result<(), StoreError>,
    ) -> bool {
        let Err(e) = result else {
            return true;
        };
        let message = format!("run {}: {} failed: {}", run_id, operation, e);
        error!(run_id, operation, error = %e, "Storage write failed");
        self.audit(AuditLevel::Error, &message, operation).await;
        false
    }

    async fn audit(&self, level: AuditLevel, message: &str, operation: &str) {
        if let Err(e) = self
            .store
            .append_audit_log(level, message, COMPONENT, operation)
            .await
        {
            warn!(error = %e, "Failed to append audit log");
        }
    }

    /// # Summary
    /// 刷新证券列表并全量替换存储中的快照。
    ///
    /// # Logic
    /// 1. 通过执行器拉取列表（含重试与回退）。
    /// 2. 空列表视为错误，不覆盖已有快照。
    /// 3. 写入存储。
    ///
    /// # Returns
    /// 新的证券列表。
    pub async fn refresh_listing(&self) -> Result<Vec<SymbolInfo>, ImportError> {
        match self.executor.execute_listing().await {
            FetchOutcome::Data {
                records: Records::Listing(listing),
                provider,
            } => {
                self.store.save_listing(&listing).await?;
                info!(provider = %provider, count = listing.len(), "Listing refreshed");
                Ok(listing)
            }
            FetchOutcome::Data { .. } => Err(ImportError::UnexpectedRecords),
            FetchOutcome::Empty { provider } => {
                warn!(provider = %provider, "Provider returned an empty listing, keeping stored one");
                Err(ImportError::EmptyListing(provider))
            }
            FetchOutcome::Failed(failure) => Err(ImportError::ListingFailed {
                message: failure.message,
                attempts: failure.attempts,
            }),
        }
    }

    /// # Summary
    /// 读取存储中的证券代码，存储为空时先刷新列表。
    ///
    /// # Arguments
    /// * `limit`: 可选的条数上限，按列表顺序截取。
    pub async fn universe(&self, limit: Option<usize>) -> Result<Vec<SymbolInfo>, ImportError> {
        let stored = self.store.load_listing(limit).await?;
        if !stored.is_empty() {
            return Ok(stored);
        }
        info!("Stored listing is empty, fetching from provider");
        let mut listing = self.refresh_listing().await?;
        if let Some(limit) = limit {
            listing.truncate(limit);
        }
        Ok(listing)
    }

    /// 存储中的数据概况
    pub async fn progress(&self) -> Result<Progress, ImportError> {
        Ok(Progress {
            symbols: self.store.count_symbols().await?,
            bars: self.store.count_bars(None).await?,
            ticks: self.store.count_ticks(None).await?,
            latest_trade_date: self.store.latest_trade_date().await?,
        })
    }
}
