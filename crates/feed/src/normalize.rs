//! 数据源原始表格到领域实体的字段规范化。
//!
//! 映射顺序：按列名（中英文别名）→ 按列位置（列数与已知结构一致）→ 降级映射
//! （仅使用能按列名识别的列，其余丢弃并告警）。

use chrono::{NaiveDate, NaiveTime};
use qfin_core::common::calendar::TradingCalendar;
use qfin_core::market::entity::{DailyBar, SymbolInfo, TickRecord, TradeSide};
use qfin_core::market::error::MarketError;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// # Summary
/// 规范化后的目标字段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Symbol,
    Name,
    Date,
    Open,
    High,
    Low,
    Close,
    Volume,
    Amount,
    PctChange,
    Time,
    Price,
    Side,
    // 已知结构中存在但不需要的列
    Ignore,
}

impl Field {
    /// 该字段可识别的列名（比较时忽略大小写与首尾空白）
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            Field::Symbol => &["symbol", "code", "代码", "证券代码", "股票代码"],
            Field::Name => &["name", "名称", "证券简称", "股票简称"],
            Field::Date => &["date", "trade_date", "日期", "交易日期"],
            Field::Open => &["open", "open_price", "开盘", "开盘价"],
            Field::High => &["high", "high_price", "最高", "最高价"],
            Field::Low => &["low", "low_price", "最低", "最低价"],
            Field::Close => &["close", "close_price", "收盘", "收盘价"],
            Field::Volume => &["volume", "vol", "成交量"],
            Field::Amount => &["amount", "成交额", "成交金额"],
            Field::PctChange => &["pct_change", "pct_chg", "涨跌幅"],
            Field::Time => &["time", "trade_time", "成交时间", "时间"],
            Field::Price => &["price", "成交价格", "成交价", "价格"],
            Field::Side => &["side", "direction", "性质", "买卖方向"],
            Field::Ignore => &[],
        }
    }

    fn matches(&self, column: &str) -> bool {
        let column = column.trim();
        self.aliases().iter().any(|a| a.eq_ignore_ascii_case(column))
    }
}

/// # Summary
/// 数据源的已知表格结构。
///
/// # Invariants
/// - `layout` 为按位置映射时各列对应的字段。
/// - `key` 必然包含在 `required` 中。
#[derive(Debug)]
pub struct Shape {
    pub name: &'static str,
    pub layout: &'static [Field],
    pub required: &'static [Field],
    pub key: Field,
}

/// 证券列表：代码、名称
pub const LISTING: Shape = Shape {
    name: "listing",
    layout: &[Field::Symbol, Field::Name],
    required: &[Field::Symbol, Field::Name],
    key: Field::Symbol,
};

/// 日线：日期、开盘、收盘、最高、最低、成交量、成交额、振幅、涨跌幅、涨跌额、换手率
pub const BARS: Shape = Shape {
    name: "bars",
    layout: &[
        Field::Date,
        Field::Open,
        Field::Close,
        Field::High,
        Field::Low,
        Field::Volume,
        Field::Amount,
        Field::Ignore,
        Field::PctChange,
        Field::Ignore,
        Field::Ignore,
    ],
    required: &[
        Field::Date,
        Field::Open,
        Field::High,
        Field::Low,
        Field::Close,
        Field::Volume,
    ],
    key: Field::Date,
};

/// 成交明细：成交时间、成交价格、成交量、成交额、性质
pub const TICKS: Shape = Shape {
    name: "ticks",
    layout: &[
        Field::Time,
        Field::Price,
        Field::Volume,
        Field::Amount,
        Field::Side,
    ],
    required: &[Field::Time, Field::Price, Field::Volume],
    key: Field::Time,
};

/// 实际采用的映射方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mapping {
    Named,
    Positional,
    Degraded,
}

/// # Summary
/// 数据源返回的原始表格：列名与逐行单元格。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RawTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// # Summary
    /// 由逗号分隔的文本行构造表格，每个单元格保留为字符串。
    pub fn from_csv_lines(columns: &[&str], lines: &[String]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: lines
                .iter()
                .map(|line| {
                    line.split(',')
                        .map(|cell| Value::String(cell.trim().to_string()))
                        .collect()
                })
                .collect(),
        }
    }
}

/// # Summary
/// 字段到列下标的映射结果。
#[derive(Debug, Clone)]
pub struct ColumnMap {
    mode: Mapping,
    index: HashMap<Field, usize>,
}

impl ColumnMap {
    /// # Summary
    /// 为原始列名解析出字段映射。
    ///
    /// # Logic
    /// 1. 按别名逐列识别字段，同一字段取第一次出现的列。
    /// 2. 必需字段全部识别时采用按名映射。
    /// 3. 否则列数与已知结构一致时按位置映射。
    /// 4. 否则降级：主键列缺失则失败，其余缺失字段置空并告警。
    ///
    /// # Arguments
    /// * `shape`: 目标结构。
    /// * `columns`: 原始列名。
    ///
    /// # Returns
    /// 主键列无法定位时返回 `MarketError::Parse`。
    pub fn resolve(shape: &Shape, columns: &[String]) -> Result<Self, MarketError> {
        let mut named: HashMap<Field, usize> = HashMap::new();
        for (i, column) in columns.iter().enumerate() {
            let field = shape
                .layout
                .iter()
                .copied()
                .filter(|f| *f != Field::Ignore)
                .find(|f| f.matches(column));
            if let Some(field) = field {
                named.entry(field).or_insert(i);
            }
        }

        if shape.required.iter().all(|f| named.contains_key(f)) {
            return Ok(Self {
                mode: Mapping::Named,
                index: named,
            });
        }

        if columns.len() == shape.layout.len() {
            let index = shape
                .layout
                .iter()
                .enumerate()
                .filter(|(_, f)| **f != Field::Ignore)
                .map(|(i, f)| (*f, i))
                .collect();
            return Ok(Self {
                mode: Mapping::Positional,
                index,
            });
        }

        if !named.contains_key(&shape.key) {
            return Err(MarketError::Parse(format!(
                "{}: key column {:?} not found in {:?}",
                shape.name, shape.key, columns
            )));
        }

        let dropped: Vec<&str> = columns
            .iter()
            .enumerate()
            .filter(|(i, _)| !named.values().any(|v| v == i))
            .map(|(_, c)| c.as_str())
            .collect();
        let missing: Vec<Field> = shape
            .required
            .iter()
            .copied()
            .filter(|f| !named.contains_key(f))
            .collect();
        warn!(
            shape = shape.name,
            columns = columns.len(),
            ?dropped,
            ?missing,
            "Schema drift detected, using degraded column mapping"
        );

        Ok(Self {
            mode: Mapping::Degraded,
            index: named,
        })
    }

    pub fn mode(&self) -> Mapping {
        self.mode
    }

    /// 取一行中某字段对应的单元格
    pub fn cell<'a>(&self, row: &'a [Value], field: Field) -> Option<&'a Value> {
        self.index.get(&field).and_then(|i| row.get(*i))
    }
}

/// # Summary
/// 将单元格解析为浮点数。
///
/// # Logic
/// 数字直接取值；字符串去掉空白与百分号后解析；`-`、空串、null 以及非有限值视为缺失。
pub fn cell_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim().trim_end_matches('%');
            if s.is_empty() || s == "-" || s == "--" {
                None
            } else {
                s.parse::<f64>().ok()
            }
        }
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// 非负数值，负数视为缺失
fn non_negative(value: Option<&Value>) -> Option<f64> {
    value.and_then(cell_f64).filter(|v| *v >= 0.0)
}

/// 将单元格解析为非空字符串
pub fn cell_str(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// # Summary
/// 解析交易日期，兼容 `YYYY-MM-DD`、`YYYYMMDD`、`YYYY/MM/DD` 及带时间后缀的写法。
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let head = raw.split_whitespace().next().unwrap_or(raw);
    ["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(head, fmt).ok())
}

/// 解析成交时间，兼容 `HH:MM:SS` 与 `HH:MM`，带日期前缀时取时间部分
pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    let tail = raw.split_whitespace().last().unwrap_or(raw);
    NaiveTime::parse_from_str(tail, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(tail, "%H:%M"))
        .ok()
}

/// # Summary
/// 校验六位数字证券代码。
pub fn check_symbol(symbol: &str) -> Result<(), MarketError> {
    if symbol.len() == 6 && symbol.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(MarketError::InvalidSymbol(symbol.to_string()))
    }
}

/// # Summary
/// 规范化证券列表。
///
/// # Logic
/// 1. 解析列映射。
/// 2. 数字形式的代码左补零至六位，空代码行丢弃。
pub fn normalize_listing(table: &RawTable) -> Result<Vec<SymbolInfo>, MarketError> {
    if table.rows.is_empty() {
        return Ok(Vec::new());
    }
    let map = ColumnMap::resolve(&LISTING, &table.columns)?;

    Ok(table
        .rows
        .iter()
        .filter_map(|row| {
            let symbol = map.cell(row, Field::Symbol).and_then(cell_str)?;
            let symbol = if symbol.chars().all(|c| c.is_ascii_digit()) {
                format!("{:0>6}", symbol)
            } else {
                symbol
            };
            let name = map
                .cell(row, Field::Name)
                .and_then(cell_str)
                .unwrap_or_default();
            Some(SymbolInfo::new(symbol, name))
        })
        .collect())
}

/// # Summary
/// 规范化日线数据。
///
/// # Logic
/// 1. 解析列映射（按名 / 按位置 / 降级）。
/// 2. 日期无法解析的行丢弃并计数告警。
/// 3. 价格、成交量、成交额为负时视为缺失；涨跌幅保留符号。
///
/// # Arguments
/// * `symbol`: 证券代码，写入每根日线。
/// * `table`: 原始表格。
///
/// # Returns
/// 按原始顺序排列的日线，主键列缺失时返回 `MarketError::Parse`。
pub fn normalize_bars(symbol: &str, table: &RawTable) -> Result<Vec<DailyBar>, MarketError> {
    if table.rows.is_empty() {
        return Ok(Vec::new());
    }
    let map = ColumnMap::resolve(&BARS, &table.columns)?;

    let mut skipped = 0usize;
    let bars: Vec<DailyBar> = table
        .rows
        .iter()
        .filter_map(|row| {
            let trade_date = map
                .cell(row, Field::Date)
                .and_then(cell_str)
                .and_then(|s| parse_date(&s));
            let Some(trade_date) = trade_date else {
                skipped += 1;
                return None;
            };
            Some(DailyBar {
                symbol: symbol.to_string(),
                trade_date,
                open: non_negative(map.cell(row, Field::Open)),
                high: non_negative(map.cell(row, Field::High)),
                low: non_negative(map.cell(row, Field::Low)),
                close: non_negative(map.cell(row, Field::Close)),
                volume: non_negative(map.cell(row, Field::Volume)),
                amount: non_negative(map.cell(row, Field::Amount)),
                pct_change: map.cell(row, Field::PctChange).and_then(cell_f64),
            })
        })
        .collect();

    if skipped > 0 {
        warn!(symbol, skipped, "Dropped bar rows with unparsable trade date");
    }
    Ok(bars)
}

/// # Summary
/// 规范化单日成交明细。
///
/// # Logic
/// 1. 解析列映射。
/// 2. `seq` 取该行在数据源返回中的序号。
/// 3. 时间无法解析、价格或成交量缺失的行丢弃。
/// 4. 不在成交明细窗口内的行丢弃。
///
/// # Arguments
/// * `symbol`: 证券代码。
/// * `trade_date`: 交易日。
/// * `table`: 原始表格。
/// * `calendar`: 交易时段定义。
pub fn normalize_ticks(
    symbol: &str,
    trade_date: NaiveDate,
    table: &RawTable,
    calendar: &TradingCalendar,
) -> Result<Vec<TickRecord>, MarketError> {
    if table.rows.is_empty() {
        return Ok(Vec::new());
    }
    let map = ColumnMap::resolve(&TICKS, &table.columns)?;

    let mut out_of_window = 0usize;
    let mut malformed = 0usize;
    let mut ticks = Vec::with_capacity(table.rows.len());

    for (i, row) in table.rows.iter().enumerate() {
        let time = map
            .cell(row, Field::Time)
            .and_then(cell_str)
            .and_then(|s| parse_time(&s));
        let price = non_negative(map.cell(row, Field::Price));
        let volume = non_negative(map.cell(row, Field::Volume));
        let (Some(trade_time), Some(price), Some(volume)) = (time, price, volume) else {
            malformed += 1;
            continue;
        };
        if !calendar.is_tick_time(trade_time) {
            out_of_window += 1;
            continue;
        }
        let side = map
            .cell(row, Field::Side)
            .and_then(cell_str)
            .and_then(|s| s.parse::<TradeSide>().ok())
            .unwrap_or(TradeSide::Unknown);

        ticks.push(TickRecord {
            symbol: symbol.to_string(),
            trade_date,
            trade_time,
            seq: u32::try_from(i).unwrap_or(u32::MAX),
            price,
            volume,
            amount: non_negative(map.cell(row, Field::Amount)),
            side,
        });
    }

    if malformed > 0 {
        warn!(symbol, %trade_date, malformed, "Dropped malformed tick rows");
    }
    if out_of_window > 0 {
        debug!(symbol, %trade_date, out_of_window, "Dropped ticks outside trading window");
    }
    Ok(ticks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_named_mapping_with_chinese_columns() {
        let table = RawTable::new(
            cols(&["日期", "股票代码", "开盘", "收盘", "最高", "最低", "成交量", "成交额", "涨跌幅"]),
            vec![vec![
                json!("2024-03-04"),
                json!("000001"),
                json!(10.1),
                json!(10.3),
                json!(10.5),
                json!(10.0),
                json!(120000),
                json!("-"),
                json!(-1.25),
            ]],
        );
        let map = ColumnMap::resolve(&BARS, &table.columns).unwrap();
        assert_eq!(map.mode(), Mapping::Named);

        let bars = normalize_bars("000001", &table).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, Some(10.3));
        assert_eq!(bars[0].high, Some(10.5));
        assert_eq!(bars[0].amount, None);
        assert_eq!(bars[0].pct_change, Some(-1.25));
    }

    #[test]
    fn test_positional_mapping_for_unnamed_columns() {
        let columns: Vec<&str> = vec![
            "f51", "f52", "f53", "f54", "f55", "f56", "f57", "f58", "f59", "f60", "f61",
        ];
        let table = RawTable::from_csv_lines(
            &columns,
            &["2024-03-04,9.39,9.21,9.42,9.20,1158366,1075742252.51,2.24,-1.92,-0.18,0.60"
                .to_string()],
        );
        let map = ColumnMap::resolve(&BARS, &table.columns).unwrap();
        assert_eq!(map.mode(), Mapping::Positional);

        let bars = normalize_bars("000001", &table).unwrap();
        let bar = &bars[0];
        assert_eq!(bar.trade_date, NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert_eq!(bar.open, Some(9.39));
        assert_eq!(bar.close, Some(9.21));
        assert_eq!(bar.high, Some(9.42));
        assert_eq!(bar.low, Some(9.20));
        assert_eq!(bar.pct_change, Some(-1.92));
    }

    #[test]
    fn test_degraded_mapping_drops_unknown_columns() {
        let table = RawTable::new(
            cols(&["date", "close", "mystery", "vol"]),
            vec![vec![json!("20240304"), json!("10.2"), json!(1), json!("300")]],
        );
        let map = ColumnMap::resolve(&BARS, &table.columns).unwrap();
        assert_eq!(map.mode(), Mapping::Degraded);

        let bars = normalize_bars("600000", &table).unwrap();
        assert_eq!(bars[0].close, Some(10.2));
        assert_eq!(bars[0].volume, Some(300.0));
        assert_eq!(bars[0].open, None);
    }

    #[test]
    fn test_degraded_mapping_without_key_fails() {
        let table = RawTable::new(
            cols(&["close", "vol"]),
            vec![vec![json!(1.0), json!(2.0)]],
        );
        let err = normalize_bars("600000", &table).unwrap_err();
        assert!(matches!(err, MarketError::Parse(_)));
    }

    #[test]
    fn test_negative_price_is_absent() {
        let table = RawTable::new(
            cols(&["trade_date", "open", "high", "low", "close", "vol"]),
            vec![vec![
                json!("2024/03/04"),
                json!(-1.0),
                json!(2.0),
                json!(1.0),
                json!(1.5),
                json!(0),
            ]],
        );
        let bars = normalize_bars("600000", &table).unwrap();
        assert_eq!(bars[0].open, None);
        assert_eq!(bars[0].volume, Some(0.0));
    }

    #[test]
    fn test_ticks_window_and_sequence() {
        let table = RawTable::from_csv_lines(
            &["时间", "价格", "成交量", "笔数", "性质"],
            &[
                "09:10:00,10.00,5,1,4".to_string(),
                "09:25:00,10.01,12,3,2".to_string(),
                "09:30:03,10.02,7,2,1".to_string(),
                "09:30:03,10.03,1,1,2".to_string(),
                "12:00:00,10.04,3,1,1".to_string(),
                "14:59:59,10.05,8,1,4".to_string(),
            ],
        );
        let day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let ticks = normalize_ticks("000001", day, &table, &TradingCalendar::default()).unwrap();

        assert_eq!(ticks.len(), 4);
        assert_eq!(ticks[0].seq, 1);
        assert_eq!(ticks[0].side, TradeSide::Buy);
        assert_eq!(ticks[1].side, TradeSide::Sell);
        assert_eq!(ticks[1].trade_time, ticks[2].trade_time);
        assert_ne!(ticks[1].seq, ticks[2].seq);
        assert_eq!(ticks[3].side, TradeSide::Unknown);
        assert_eq!(ticks[3].amount, None);
    }

    #[test]
    fn test_listing_pads_numeric_codes() {
        let table = RawTable::new(
            cols(&["code", "name"]),
            vec![
                vec![json!(1), json!("平安银行")],
                vec![json!("600000"), json!("浦发银行")],
                vec![json!(null), json!("无代码")],
            ],
        );
        let listing = normalize_listing(&table).unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].symbol, "000001");
        assert_eq!(listing[1].exchange.code(), "SH");
    }

    #[test]
    fn test_symbol_check() {
        assert!(check_symbol("000001").is_ok());
        assert!(matches!(check_symbol("AAPL"), Err(MarketError::InvalidSymbol(_))));
        assert!(check_symbol("0000012").is_err());
    }
}
