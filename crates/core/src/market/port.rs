use crate::market::entity::{DailyBar, SymbolInfo, TickRecord};
use crate::market::error::MarketError;
use async_trait::async_trait;
use chrono::NaiveDate;

/// # Summary
/// 市场行情数据提供者接口（原始数据源）。
///
/// # Invariants
/// - 每次调用只执行一次逻辑上的数据源请求和一次字段规范化。
/// - 内部不做重试，重试由执行器负责。
/// - 数据源明确表示无数据时返回空列表；请求无法完成时返回 `MarketError`。
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// # Summary
    /// 数据源标识，用于限流分桶与日志。
    fn name(&self) -> &str;

    /// # Summary
    /// 获取沪深 A 股全量证券列表。
    ///
    /// # Logic
    /// 1. 请求数据源的证券列表接口。
    /// 2. 规范化为 `SymbolInfo`，交易所按代码前缀推断。
    ///
    /// # Returns
    /// 成功返回证券列表，失败返回 MarketError。
    async fn fetch_listing(&self) -> Result<Vec<SymbolInfo>, MarketError>;

    /// # Summary
    /// 获取单只证券在日期区间内的日线数据。
    ///
    /// # Logic
    /// 1. 构建数据源请求。
    /// 2. 执行网络请求并按列名或位置映射字段。
    ///
    /// # Arguments
    /// * `symbol`: 六位证券代码。
    /// * `start`: 开始日期（包含）。
    /// * `end`: 结束日期（包含）。
    ///
    /// # Returns
    /// 成功返回日线列表（可能为空），失败返回 MarketError。
    async fn fetch_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>, MarketError>;

    /// # Summary
    /// 获取单只证券某一交易日的成交明细。
    ///
    /// # Arguments
    /// * `symbol`: 六位证券代码。
    /// * `trade_date`: 交易日。
    ///
    /// # Returns
    /// 成功返回成交明细（可能为空），失败返回 MarketError。
    async fn fetch_ticks(
        &self,
        symbol: &str,
        trade_date: NaiveDate,
    ) -> Result<Vec<TickRecord>, MarketError>;
}
