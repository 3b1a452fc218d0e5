use crate::job::{JobError, JobKind, JobReport, SkipReason};
use crate::trigger::{Schedule, Trigger};
use chrono::NaiveDateTime;
use qfin_core::common::time::TimeProvider;
use qfin_core::common::{DataKind, DateRange};
use qfin_core::config::{ConfigError, ScheduleConfig};
use qfin_core::market::entity::SymbolInfo;
use qfin_core::store::port::AuditLevel;
use qfin_pipeline::{BatchImporter, ShutdownSignal};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const COMPONENT: &str = "scheduler";

/// 任务执行期间持有，释放时清除在途标记
struct FlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<JobKind>>,
    kind: JobKind,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.kind);
    }
}

fn codes(listing: Vec<SymbolInfo>) -> Vec<String> {
    listing.into_iter().map(|s| s.symbol).collect()
}

/// # Summary
/// 日历感知的采集调度器。
///
/// # Invariants
/// - 单一协作式循环按固定节拍检查触发器，到期任务依次执行完毕。
/// - 交易日与交易时段一律以 `TimeProvider` 给出的市场本地时间判断。
/// - 同一任务在执行中再次到期时跳过并记录日志。
/// - 任务错误只记录日志与审计，循环不会因此退出。
pub struct Scheduler {
    importer: Arc<BatchImporter>,
    clock: Arc<dyn TimeProvider>,
    intraday_limit: usize,
    tick: Duration,
    triggers: Mutex<Vec<(JobKind, Trigger)>>,
    in_flight: Mutex<HashSet<JobKind>>,
}

impl Scheduler {
    /// # Summary
    /// 按调度配置构造调度器并初始化三个触发器。
    ///
    /// # Logic
    /// 1. 解析证券列表刷新与收盘采集的 HH:MM 时刻。
    /// 2. 以当前市场时间与单调时钟计算各触发器的首次到期时间。
    ///
    /// # Arguments
    /// * `importer`: 批量导入器。
    /// * `clock`: 时间供给器。
    /// * `schedule`: 调度配置。
    /// * `intraday_limit`: 盘中采集的证券数上限。
    ///
    /// # Returns
    /// 时刻无法解析时返回 `ConfigError`。
    pub fn new(
        importer: Arc<BatchImporter>,
        clock: Arc<dyn TimeProvider>,
        schedule: &ScheduleConfig,
        intraday_limit: usize,
    ) -> Result<Self, ConfigError> {
        let local = clock.market_now();
        let mono = Instant::now();
        let triggers = vec![
            (
                JobKind::ListingRefresh,
                Trigger::new(Schedule::DailyAt(schedule.listing_time()?), local, mono),
            ),
            (
                JobKind::Intraday,
                Trigger::new(Schedule::Every(schedule.intraday_interval()), local, mono),
            ),
            (
                JobKind::DailyClose,
                Trigger::new(Schedule::DailyAt(schedule.daily_time()?), local, mono),
            ),
        ];
        Ok(Self {
            importer,
            clock,
            intraday_limit,
            tick: schedule.tick(),
            triggers: Mutex::new(triggers),
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// 每日任务的下一次到期时间（市场本地时间）
    pub fn next_due(&self, kind: JobKind) -> Option<NaiveDateTime> {
        self.triggers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|(k, _)| *k == kind)
            .and_then(|(_, t)| t.next_wall_due())
    }

    fn begin(&self, kind: JobKind) -> Option<FlightGuard<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !in_flight.insert(kind) {
            return None;
        }
        Some(FlightGuard {
            in_flight: &self.in_flight,
            kind,
        })
    }

    /// # Summary
    /// 执行一次任务。
    ///
    /// # Logic
    /// 1. 同一任务仍在执行时直接跳过。
    /// 2. 按任务类型做交易日、交易时段检查 (`force` 时跳过检查)。
    /// 3. 执行失败时记录错误日志并写入审计日志。
    ///
    /// # Arguments
    /// * `kind`: 任务类型。
    /// * `force`: 是否忽略交易日与交易时段检查。
    /// * `shutdown`: 关闭信号，传递给导入运行。
    pub async fn run_job(
        &self,
        kind: JobKind,
        force: bool,
        shutdown: &ShutdownSignal,
    ) -> Result<JobReport, JobError> {
        let Some(_guard) = self.begin(kind) else {
            warn!(job = %kind, "Job is still running, skipping this firing");
            return Ok(JobReport::Skipped(SkipReason::InFlight));
        };

        let started = Instant::now();
        info!(job = %kind, force, "Job started");
        let result = match kind {
            JobKind::DailyClose => self.daily_close(force, shutdown).await,
            JobKind::Intraday => self.intraday(force, shutdown).await,
            JobKind::ListingRefresh => self.listing_refresh().await,
        };

        match &result {
            Ok(JobReport::Skipped(reason)) => {
                info!(job = %kind, reason = ?reason, "Job skipped");
            }
            Ok(JobReport::Listing(count)) => {
                info!(job = %kind, count, elapsed = ?started.elapsed(), "Job finished");
            }
            Ok(JobReport::Imported(stats)) => {
                info!(
                    job = %kind,
                    run_id = %stats.run_id,
                    succeeded = stats.succeeded.len(),
                    failed = stats.failed.len(),
                    cancelled = stats.cancelled,
                    elapsed = ?started.elapsed(),
                    "Job finished"
                );
            }
            Err(e) => {
                error!(job = %kind, error = %e, "Job failed");
                let message = format!("{} failed: {}", kind, e);
                self.audit(AuditLevel::Error, &message, kind).await;
            }
        }
        result
    }

    async fn audit(&self, level: AuditLevel, message: &str, kind: JobKind) {
        if let Err(e) = self
            .importer
            .store()
            .append_audit_log(level, message, COMPONENT, kind.as_str())
            .await
        {
            warn!(error = %e, "Failed to append audit log");
        }
    }

    /// 收盘采集：刷新列表后导入当日日线与成交明细
    async fn daily_close(
        &self,
        force: bool,
        shutdown: &ShutdownSignal,
    ) -> Result<JobReport, JobError> {
        let today = self.clock.market_now().date();
        if !force && !self.importer.calendar().is_trading_day(today) {
            return Ok(JobReport::Skipped(SkipReason::NotTradingDay));
        }

        // 列表刷新失败时沿用已存储的列表
        if let Err(e) = self.importer.refresh_listing().await {
            warn!(error = %e, "Listing refresh failed, using stored listing");
            let message = format!("listing refresh failed, using stored listing: {}", e);
            self.audit(AuditLevel::Warn, &message, JobKind::DailyClose).await;
        }
        let symbols = codes(self.importer.universe(None).await?);
        let stats = self
            .importer
            .run(
                &symbols,
                DateRange::single(today),
                &[DataKind::Bars, DataKind::Ticks],
                shutdown,
            )
            .await;
        Ok(JobReport::Imported(stats))
    }

    /// 盘中采集：导入列表前 `intraday_limit` 只证券的当日成交明细
    async fn intraday(
        &self,
        force: bool,
        shutdown: &ShutdownSignal,
    ) -> Result<JobReport, JobError> {
        let now = self.clock.market_now();
        let calendar = self.importer.calendar();
        if !force {
            if !calendar.is_trading_day(now.date()) {
                return Ok(JobReport::Skipped(SkipReason::NotTradingDay));
            }
            if !calendar.is_trading_time(now) {
                return Ok(JobReport::Skipped(SkipReason::OutsideSession));
            }
        }

        let symbols = codes(self.importer.universe(Some(self.intraday_limit)).await?);
        let stats = self
            .importer
            .run(
                &symbols,
                DateRange::single(now.date()),
                &[DataKind::Ticks],
                shutdown,
            )
            .await;
        Ok(JobReport::Imported(stats))
    }

    async fn listing_refresh(&self) -> Result<JobReport, JobError> {
        let listing = self.importer.refresh_listing().await?;
        Ok(JobReport::Listing(listing.len()))
    }

    /// # Summary
    /// 检查一次全部触发器，依次执行到期任务。
    ///
    /// # Logic
    /// 1. 在锁内找出到期触发器并推进其下一次到期时间。
    /// 2. 释放锁后按列表刷新、盘中、收盘的顺序执行任务。
    /// 3. 关闭信号触发后不再开始新的任务。
    ///
    /// # Returns
    /// 本次到期的任务。
    pub async fn tick(&self, shutdown: &ShutdownSignal) -> Vec<JobKind> {
        let local = self.clock.market_now();
        let mono = Instant::now();
        let due: Vec<JobKind> = self
            .triggers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter_mut()
            .filter_map(|(kind, trigger)| {
                if !trigger.is_due(local, mono) {
                    return None;
                }
                trigger.advance(local, mono);
                Some(*kind)
            })
            .collect();

        for kind in &due {
            if shutdown.is_triggered() {
                break;
            }
            match self.run_job(*kind, false, shutdown).await {
                Ok(_) => debug!(job = %kind, "Trigger handled"),
                Err(_) => debug!(job = %kind, "Trigger handled with error"),
            }
        }
        due
    }

    /// # Summary
    /// 运行调度循环直到收到关闭信号。
    ///
    /// # Logic
    /// 1. 以 `tick_seconds` 为周期的单调时钟节拍，错过的节拍顺延。
    /// 2. 每个节拍调用 `tick`，同时监听关闭信号。
    pub async fn run(&self, shutdown: ShutdownSignal) {
        let mut signal = shutdown.clone();
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            tick = ?self.tick,
            listing_refresh = ?self.next_due(JobKind::ListingRefresh),
            daily_close = ?self.next_due(JobKind::DailyClose),
            "Scheduler started"
        );
        loop {
            tokio::select! {
                biased;
                _ = signal.triggered() => break,
                _ = interval.tick() => {
                    self.tick(&shutdown).await;
                }
            }
        }
        info!("Scheduler stopped");
    }
}
