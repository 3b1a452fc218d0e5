use crate::common::Exchange;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// # Summary
/// 证券列表中的一条记录。
///
/// # Invariants
/// - `symbol` 为六位交易代码。
/// - 列表整体按全量快照替换，不做增量比对。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    // 证券代码 (例如: 000001)
    pub symbol: String,
    // 证券简称
    pub name: String,
    // 所属交易所
    pub exchange: Exchange,
}

impl SymbolInfo {
    /// 以代码前缀推断交易所并构造记录
    pub fn new(symbol: impl Into<String>, name: impl Into<String>) -> Self {
        let symbol = symbol.into();
        let exchange = Exchange::from_symbol(&symbol);
        Self {
            symbol,
            name: name.into(),
            exchange,
        }
    }
}

/// # Summary
/// 单根日线数据。
///
/// # Invariants
/// - `(symbol, trade_date)` 唯一。
/// - 价格字段存在时必须非负；缺失值以 `None` 表示，与 0 区分。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    // 成交量 (手)
    pub volume: Option<f64>,
    // 成交额 (元)
    pub amount: Option<f64>,
    // 涨跌幅 (%)
    pub pct_change: Option<f64>,
}

/// # Summary
/// 成交方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
    Unknown,
}

impl TradeSide {
    /// 存储用的单字母编码 (B / S / N)
    pub fn code(&self) -> &'static str {
        match self {
            TradeSide::Buy => "B",
            TradeSide::Sell => "S",
            TradeSide::Unknown => "N",
        }
    }
}

impl FromStr for TradeSide {
    type Err = std::convert::Infallible;

    /// 兼容各数据源的方向标记，无法识别时归为 `Unknown`。
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "b" | "buy" | "买盘" | "买" | "2" => TradeSide::Buy,
            "s" | "sell" | "卖盘" | "卖" | "1" => TradeSide::Sell,
            _ => TradeSide::Unknown,
        })
    }
}

/// # Summary
/// 单笔成交明细。
///
/// # Invariants
/// - `(symbol, trade_date, trade_time, seq)` 唯一，`seq` 为当日数据源顺序号，
///   用于区分同一秒内的多笔成交。
/// - `trade_time` 落在交易日的成交明细窗口内。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub trade_time: NaiveTime,
    pub seq: u32,
    pub price: f64,
    // 成交量 (手)
    pub volume: f64,
    // 成交额 (元)
    pub amount: Option<f64>,
    pub side: TradeSide,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_side_aliases() {
        assert_eq!("买盘".parse::<TradeSide>().ok(), Some(TradeSide::Buy));
        assert_eq!("S".parse::<TradeSide>().ok(), Some(TradeSide::Sell));
        assert_eq!("4".parse::<TradeSide>().ok(), Some(TradeSide::Unknown));
        assert_eq!("中性盘".parse::<TradeSide>().ok(), Some(TradeSide::Unknown));
    }

    #[test]
    fn test_symbol_info_infers_exchange() {
        let info = SymbolInfo::new("601318", "中国平安");
        assert_eq!(info.exchange, Exchange::Shanghai);
    }
}
