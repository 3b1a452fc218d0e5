use qfin_core::acquire::entity::RunStatistics;
use qfin_pipeline::ImportError;
use thiserror::Error;

/// # Summary
/// 调度器管理的三类任务。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobKind {
    // 收盘后采集当日日线与成交明细
    DailyClose,
    // 盘中采集当日成交明细
    Intraday,
    // 刷新证券列表
    ListingRefresh,
}

impl JobKind {
    /// 日志与审计中使用的任务名
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::DailyClose => "daily_close",
            JobKind::Intraday => "intraday",
            JobKind::ListingRefresh => "listing_refresh",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务被跳过的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotTradingDay,
    OutsideSession,
    InFlight,
}

/// # Summary
/// 一次任务执行的结果。
#[derive(Debug, Clone, PartialEq)]
pub enum JobReport {
    Skipped(SkipReason),
    // 证券列表刷新完成，携带条数
    Listing(usize),
    Imported(RunStatistics),
}

/// # Summary
/// 任务执行错误，由调度循环记录日志与审计后继续运行。
#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Import(#[from] ImportError),
}
