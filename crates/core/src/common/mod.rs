use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

pub mod calendar;
pub mod time;

/// # Summary
/// 证券上市交易所枚举，由证券代码前缀推断。
///
/// # Invariants
/// - 仅覆盖沪深两市，其余代码一律归入深市。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Exchange {
    // 上海证券交易所
    Shanghai,
    // 深圳证券交易所
    Shenzhen,
}

impl Exchange {
    /// # Summary
    /// 根据证券代码前缀推断所属交易所。
    ///
    /// # Logic
    /// 1. 以 `60`、`68`、`90` 开头的代码归属上交所（主板、科创板、B 股）。
    /// 2. 其余代码归属深交所。
    ///
    /// # Arguments
    /// * `symbol`: 六位证券代码。
    ///
    /// # Returns
    /// 推断出的交易所。
    pub fn from_symbol(symbol: &str) -> Self {
        let code = symbol.trim();
        if ["60", "68", "90"].iter().any(|p| code.starts_with(p)) {
            Exchange::Shanghai
        } else {
            Exchange::Shenzhen
        }
    }

    /// 交易所的两字母简码 (SH / SZ)
    pub fn code(&self) -> &'static str {
        match self {
            Exchange::Shanghai => "SH",
            Exchange::Shenzhen => "SZ",
        }
    }
}

impl FromStr for Exchange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SH" | "SSE" | "SHANGHAI" => Ok(Exchange::Shanghai),
            "SZ" | "SZSE" | "SHENZHEN" => Ok(Exchange::Shenzhen),
            _ => Err(format!("Unknown Exchange: {}", s)),
        }
    }
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// # Summary
/// 采集数据种类。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataKind {
    // 日线
    Bars,
    // 成交明细
    Ticks,
}

impl FromStr for DataKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bars" | "daily" => Ok(DataKind::Bars),
            "ticks" | "transaction" => Ok(DataKind::Ticks),
            _ => Err(format!("Unknown DataKind: {}", s)),
        }
    }
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataKind::Bars => write!(f, "bars"),
            DataKind::Ticks => write!(f, "ticks"),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Invalid date range: {start} > {end}")]
pub struct InvalidDateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// # Summary
/// 闭区间日期范围。
///
/// # Invariants
/// - `start <= end`，由构造函数保证。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// # Summary
    /// 构造日期范围。
    ///
    /// # Arguments
    /// * `start`: 起始日期（包含）。
    /// * `end`: 结束日期（包含）。
    ///
    /// # Returns
    /// 起始晚于结束时返回 `InvalidDateRange`。
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, InvalidDateRange> {
        if start > end {
            return Err(InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// 单日范围
    pub fn single(day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// # Summary
    /// 按自然日顺序遍历区间内的所有日期。
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        std::iter::successors(Some(self.start), |d| d.checked_add_days(Days::new(1)))
            .take_while(move |d| *d <= end)
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_exchange_from_prefix() {
        assert_eq!(Exchange::from_symbol("600000"), Exchange::Shanghai);
        assert_eq!(Exchange::from_symbol("688981"), Exchange::Shanghai);
        assert_eq!(Exchange::from_symbol("900901"), Exchange::Shanghai);
        assert_eq!(Exchange::from_symbol("000001"), Exchange::Shenzhen);
        assert_eq!(Exchange::from_symbol("300750"), Exchange::Shenzhen);
        assert_eq!("sz".parse::<Exchange>(), Ok(Exchange::Shenzhen));
    }

    #[test]
    fn test_date_range_rejects_inverted() {
        assert!(DateRange::new(d(2024, 1, 5), d(2024, 1, 4)).is_err());
        let range = DateRange::new(d(2024, 1, 30), d(2024, 2, 2)).unwrap();
        let days: Vec<_> = range.days().collect();
        assert_eq!(days.len(), 4);
        assert_eq!(days[3], d(2024, 2, 2));
    }

    #[test]
    fn test_data_kind_aliases() {
        assert_eq!("daily".parse::<DataKind>(), Ok(DataKind::Bars));
        assert_eq!("transaction".parse::<DataKind>(), Ok(DataKind::Ticks));
        assert!("minute".parse::<DataKind>().is_err());
    }
}
