use super::error::StoreError;
use crate::common::Exchange;
use crate::market::entity::{DailyBar, SymbolInfo, TickRecord};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// # Summary
/// 审计日志级别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
}

impl AuditLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditLevel::Info => "INFO",
            AuditLevel::Warn => "WARN",
            AuditLevel::Error => "ERROR",
        }
    }
}

impl FromStr for AuditLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "INFO" => Ok(AuditLevel::Info),
            "WARN" | "WARNING" => Ok(AuditLevel::Warn),
            "ERROR" => Ok(AuditLevel::Error),
            _ => Err(format!("Unknown AuditLevel: {}", s)),
        }
    }
}

impl std::fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # Summary
/// 从存储中读回的一条审计日志。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    // 自增序号，越大越新
    pub id: i64,
    pub level: AuditLevel,
    pub message: String,
    pub component: String,
    pub operation: String,
    pub created_at: DateTime<Utc>,
}

/// 日线排行依据
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarRanking {
    // 成交量
    Volume,
    // 成交额
    Amount,
}

/// # Summary
/// 按交易日聚合的记录条数，用于状态报告。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub trade_date: NaiveDate,
    pub count: i64,
}

/// 某一交易所的日线覆盖情况
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeCoverage {
    pub exchange: Exchange,
    pub symbols: i64,
    pub bars: i64,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
}

/// 某一年的日线覆盖情况
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearCoverage {
    pub year: i32,
    pub symbols: i64,
    pub bars: i64,
}

/// 各价格与成交量字段为正值的日线条数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValidity {
    pub open: i64,
    pub high: i64,
    pub low: i64,
    pub close: i64,
    pub volume: i64,
}

/// # Summary
/// 日线数据的覆盖报告。
///
/// # Invariants
/// - 无日线时 `first_date` 与 `last_date` 为空，其余计数为零。
/// - `exchanges` 按交易所排序，`years` 按年份降序。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub total_bars: i64,
    pub symbols: i64,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub exchanges: Vec<ExchangeCoverage>,
    pub years: Vec<YearCoverage>,
    pub valid: FieldValidity,
}

impl CoverageReport {
    /// 首尾交易日之间的自然日数 (含首尾)
    pub fn span_days(&self) -> Option<i64> {
        match (self.first_date, self.last_date) {
            (Some(first), Some(last)) => Some((last - first).num_days() + 1),
            _ => None,
        }
    }

    /// `count` 占全部日线的百分比 (精确到 0.01)，无日线时为空
    pub fn percent(&self, count: i64) -> Option<f64> {
        if self.total_bars <= 0 {
            return None;
        }
        // 以万分比计算，保留两位小数的精度
        let basis_points = i32::try_from(count.saturating_mul(10_000) / self.total_bars).ok()?;
        Some(f64::from(basis_points) / 100.0)
    }
}

/// # Summary
/// 市场数据存储接口，负责证券列表、日线、成交明细与审计日志的持久化。
///
/// # Invariants
/// - 每次批量写入必须是原子的：同一次调用的所有行要么全部可见，要么全部不可见。
/// - 写入失败只返回错误，不做重试。
#[async_trait]
pub trait MarketStore: Send + Sync {
    /// # Summary
    /// 全量替换证券列表。
    ///
    /// # Logic
    /// 1. 在同一事务中删除旧列表。
    /// 2. 按给定顺序插入新列表。
    ///
    /// # Arguments
    /// * `listing`: 证券列表快照。
    ///
    /// # Returns
    /// 成功返回 Ok，失败返回 `StoreError`。
    async fn save_listing(&self, listing: &[SymbolInfo]) -> Result<(), StoreError>;

    /// # Summary
    /// 按入库顺序读取证券列表。
    ///
    /// # Arguments
    /// * `limit`: 可选的条数上限。
    async fn load_listing(&self, limit: Option<usize>) -> Result<Vec<SymbolInfo>, StoreError>;

    /// # Summary
    /// 批量写入日线数据，主键冲突时覆盖。
    async fn save_bars(&self, bars: &[DailyBar]) -> Result<(), StoreError>;

    /// # Summary
    /// 批量写入成交明细，主键冲突时覆盖。
    ///
    /// # Arguments
    /// * `ticks`: 证券代码到成交明细的映射。
    async fn save_ticks(&self, ticks: &BTreeMap<String, Vec<TickRecord>>)
    -> Result<(), StoreError>;

    /// 已入库日线的最新交易日
    async fn latest_trade_date(&self) -> Result<Option<NaiveDate>, StoreError>;

    /// 证券列表条数
    async fn count_symbols(&self) -> Result<i64, StoreError>;

    /// 日线条数，`date` 为空时统计全部
    async fn count_bars(&self, date: Option<NaiveDate>) -> Result<i64, StoreError>;

    /// 成交明细条数，`date` 为空时统计全部
    async fn count_ticks(&self, date: Option<NaiveDate>) -> Result<i64, StoreError>;

    /// # Summary
    /// 统计某日之后（包含）每个交易日的日线条数，按日期降序。
    async fn bar_counts_since(&self, since: NaiveDate) -> Result<Vec<DailyCount>, StoreError>;

    /// # Summary
    /// 统计某日之后（包含）每个交易日的成交明细条数，按日期降序。
    async fn tick_counts_since(&self, since: NaiveDate) -> Result<Vec<DailyCount>, StoreError>;

    /// # Summary
    /// 某交易日按成交量或成交额降序排列的前 `limit` 根日线。
    ///
    /// # Logic
    /// 排序字段为空的日线排在最后，并列时按证券代码升序。
    async fn top_bars(
        &self,
        date: NaiveDate,
        by: BarRanking,
        limit: usize,
    ) -> Result<Vec<DailyBar>, StoreError>;

    /// # Summary
    /// 统计全部日线的覆盖情况：总量、交易所分布、年度分布与字段有效率。
    ///
    /// # Logic
    /// 交易所取证券列表中的记录，列表中不存在的证券按代码前缀推断。
    async fn coverage(&self) -> Result<CoverageReport, StoreError>;

    /// # Summary
    /// 追加一条结构化审计日志。
    ///
    /// # Arguments
    /// * `level`: 日志级别。
    /// * `message`: 日志内容。
    /// * `component`: 产生日志的组件。
    /// * `operation`: 产生日志的操作。
    async fn append_audit_log(
        &self,
        level: AuditLevel,
        message: &str,
        component: &str,
        operation: &str,
    ) -> Result<(), StoreError>;

    /// # Summary
    /// 读取最新的审计日志，按写入顺序倒序。
    ///
    /// # Arguments
    /// * `level`: 只返回该级别的日志，为空时不过滤。
    /// * `limit`: 条数上限。
    async fn recent_audit_logs(
        &self,
        level: Option<AuditLevel>,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_level_round_trips_storage_text() {
        for level in [AuditLevel::Info, AuditLevel::Warn, AuditLevel::Error] {
            assert_eq!(level.as_str().parse::<AuditLevel>(), Ok(level));
        }
        assert_eq!("warning".parse::<AuditLevel>(), Ok(AuditLevel::Warn));
        assert!("DEBUG".parse::<AuditLevel>().is_err());
    }

    #[test]
    fn test_coverage_span_and_percent() {
        let empty = CoverageReport::default();
        assert_eq!(empty.span_days(), None);
        assert_eq!(empty.percent(0), None);

        let report = CoverageReport {
            total_bars: 3,
            symbols: 2,
            first_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            last_date: NaiveDate::from_ymd_opt(2024, 3, 4),
            ..Default::default()
        };
        assert_eq!(report.span_days(), Some(4));
        assert_eq!(report.percent(3), Some(100.0));
        assert_eq!(report.percent(2), Some(66.66));
    }
}
