use crate::http::{build_client, read_json, transport_error};
use crate::normalize::{self, RawTable};
use async_trait::async_trait;
use chrono::NaiveDate;
use qfin_core::common::Exchange;
use qfin_core::common::calendar::TradingCalendar;
use qfin_core::common::time::{RealTimeProvider, TimeProvider};
use qfin_core::market::entity::{DailyBar, SymbolInfo, TickRecord};
use qfin_core::market::error::MarketError;
use qfin_core::market::port::MarketDataProvider;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

// 沪深 A 股：深市主板、创业板，沪市主板、科创板
const A_SHARE_FILTER: &str = "m:0 t:6,m:0 t:80,m:1 t:2,m:1 t:23";
const LISTING_PAGE_SIZE: usize = 100;
const MAX_LISTING_PAGES: usize = 200;

const KLINE_COLUMNS: [&str; 11] = [
    "f51", "f52", "f53", "f54", "f55", "f56", "f57", "f58", "f59", "f60", "f61",
];
const DETAIL_COLUMNS: [&str; 5] = ["时间", "价格", "成交量", "笔数", "性质"];

/// # Summary
/// 东方财富接口地址与超时设置。
#[derive(Debug, Clone)]
pub struct EastMoneyConfig {
    pub listing_url: String,
    pub kline_url: String,
    pub details_url: String,
    pub timeout: Duration,
}

impl Default for EastMoneyConfig {
    fn default() -> Self {
        Self {
            listing_url: "https://82.push2.eastmoney.com/api/qt/clist/get".to_string(),
            kline_url: "https://push2his.eastmoney.com/api/qt/stock/kline/get".to_string(),
            details_url: "https://push2.eastmoney.com/api/qt/stock/details/get".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// # Summary
/// 东方财富行情提供者实现（akshare 日线与证券列表所用的同一数据源）。
///
/// # Invariants
/// - 使用 `reqwest` 异步客户端进行通讯，单次调用不做重试。
/// - 成交明细接口只提供当日数据，其余日期返回 `Unsupported`。
pub struct EastMoneyProvider {
    client: Client,
    config: EastMoneyConfig,
    clock: Arc<dyn TimeProvider>,
    calendar: TradingCalendar,
}

#[derive(Deserialize, Debug)]
struct EmResponse<T> {
    #[serde(default)]
    rc: i64,
    data: Option<T>,
}

#[derive(Deserialize, Debug)]
struct KlineData {
    #[serde(default)]
    klines: Vec<String>,
}

#[derive(Deserialize, Debug)]
struct DetailsData {
    #[serde(default)]
    details: Vec<String>,
}

#[derive(Deserialize, Debug)]
struct ClistData {
    #[serde(default)]
    total: usize,
    // 分页接口返回数组，部分镜像返回以序号为键的对象
    #[serde(default)]
    diff: Value,
}

impl EastMoneyProvider {
    /// # Summary
    /// 以默认接口地址创建提供者。
    ///
    /// # Arguments
    /// * `timeout`: 单次请求超时。
    ///
    /// # Returns
    /// HTTP 客户端构建失败时返回 MarketError。
    pub fn new(timeout: Duration) -> Result<Self, MarketError> {
        Self::with_config(
            EastMoneyConfig {
                timeout,
                ..Default::default()
            },
            Arc::new(RealTimeProvider),
        )
    }

    /// 以自定义接口地址与时钟创建提供者
    pub fn with_config(
        config: EastMoneyConfig,
        clock: Arc<dyn TimeProvider>,
    ) -> Result<Self, MarketError> {
        Ok(Self {
            client: build_client(config.timeout)?,
            config,
            clock,
            calendar: TradingCalendar::default(),
        })
    }

    /// 东方财富证券标识：沪市 `1.`，深市 `0.`
    fn secid(symbol: &str) -> String {
        match Exchange::from_symbol(symbol) {
            Exchange::Shanghai => format!("1.{}", symbol),
            Exchange::Shenzhen => format!("0.{}", symbol),
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<EmResponse<T>, MarketError> {
        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;
        let body: EmResponse<T> = read_json(resp).await?;
        if body.rc != 0 {
            return Err(MarketError::Api(format!("eastmoney rc={}", body.rc)));
        }
        Ok(body)
    }
}

/// 展开 clist 的 diff 字段为 (代码, 名称) 行
fn listing_rows(diff: &Value) -> Vec<Vec<Value>> {
    let items: Vec<&Value> = match diff {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => map.values().collect(),
        _ => Vec::new(),
    };
    items
        .into_iter()
        .map(|item| {
            vec![
                item.get("f12").cloned().unwrap_or(Value::Null),
                item.get("f14").cloned().unwrap_or(Value::Null),
            ]
        })
        .collect()
}

#[async_trait]
impl MarketDataProvider for EastMoneyProvider {
    fn name(&self) -> &str {
        "eastmoney"
    }

    /// # Summary
    /// 拉取沪深 A 股全量列表。
    ///
    /// # Logic
    /// 1. 按页请求 clist 接口，直到取满 `total` 或返回空页。
    /// 2. 各页合并为一张表后统一规范化，对外表现为一次逻辑调用。
    async fn fetch_listing(&self) -> Result<Vec<SymbolInfo>, MarketError> {
        let mut rows = Vec::new();
        for page in 1..=MAX_LISTING_PAGES {
            let body: EmResponse<ClistData> = self
                .get(
                    &self.config.listing_url,
                    &[
                        ("pn", page.to_string()),
                        ("pz", LISTING_PAGE_SIZE.to_string()),
                        ("po", "0".to_string()),
                        ("np", "1".to_string()),
                        ("fltt", "2".to_string()),
                        ("invt", "2".to_string()),
                        ("fid", "f12".to_string()),
                        ("fs", A_SHARE_FILTER.to_string()),
                        ("fields", "f12,f14".to_string()),
                    ],
                )
                .await?;
            let Some(data) = body.data else {
                break;
            };
            let page_rows = listing_rows(&data.diff);
            if page_rows.is_empty() {
                break;
            }
            rows.extend(page_rows);
            if rows.len() >= data.total {
                break;
            }
        }
        debug!(count = rows.len(), "EastMoney listing fetched");

        let table = RawTable::new(vec!["f12".to_string(), "f14".to_string()], rows);
        normalize::normalize_listing(&table)
    }

    /// # Summary
    /// 获取前复权日线。
    ///
    /// # Logic
    /// 1. 按代码前缀构造 secid，请求 kline 接口 (`klt=101` 日线，`fqt=1` 前复权)。
    /// 2. `data` 为空表示代码不存在；`klines` 为空表示区间内无数据。
    /// 3. 11 列逗号分隔文本按位置规范化。
    async fn fetch_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>, MarketError> {
        normalize::check_symbol(symbol)?;
        let body: EmResponse<KlineData> = self
            .get(
                &self.config.kline_url,
                &[
                    ("secid", Self::secid(symbol)),
                    ("fields1", "f1,f2,f3,f4,f5,f6".to_string()),
                    ("fields2", KLINE_COLUMNS.join(",")),
                    ("klt", "101".to_string()),
                    ("fqt", "1".to_string()),
                    ("beg", start.format("%Y%m%d").to_string()),
                    ("end", end.format("%Y%m%d").to_string()),
                ],
            )
            .await?;

        let Some(data) = body.data else {
            return Err(MarketError::InvalidSymbol(symbol.to_string()));
        };
        let table = RawTable::from_csv_lines(&KLINE_COLUMNS, &data.klines);
        normalize::normalize_bars(symbol, &table)
    }

    /// # Summary
    /// 获取当日逐笔成交明细。
    ///
    /// # Logic
    /// 1. 非当日（市场时间）请求直接返回 `Unsupported`，交由备用数据源处理。
    /// 2. 请求 details 接口，逐行按列名规范化并过滤交易时段外的记录。
    async fn fetch_ticks(
        &self,
        symbol: &str,
        trade_date: NaiveDate,
    ) -> Result<Vec<TickRecord>, MarketError> {
        normalize::check_symbol(symbol)?;
        let today = self.clock.market_now().date();
        if trade_date != today {
            return Err(MarketError::Unsupported(format!(
                "eastmoney serves intraday details for {} only, requested {}",
                today, trade_date
            )));
        }

        let body: EmResponse<DetailsData> = self
            .get(
                &self.config.details_url,
                &[
                    ("secid", Self::secid(symbol)),
                    ("fields1", "f1,f2,f3,f4".to_string()),
                    ("fields2", "f51,f52,f53,f54,f55".to_string()),
                    ("pos", "-0".to_string()),
                ],
            )
            .await?;

        let Some(data) = body.data else {
            return Err(MarketError::InvalidSymbol(symbol.to_string()));
        };
        let table = RawTable::from_csv_lines(&DETAIL_COLUMNS, &data.details);
        normalize::normalize_ticks(symbol, trade_date, &table, &self.calendar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_secid_prefix() {
        assert_eq!(EastMoneyProvider::secid("600000"), "1.600000");
        assert_eq!(EastMoneyProvider::secid("688981"), "1.688981");
        assert_eq!(EastMoneyProvider::secid("300750"), "0.300750");
    }

    #[test]
    fn test_listing_rows_accepts_array_and_object() {
        let array = json!([{"f12": "000001", "f14": "平安银行"}]);
        let object = json!({"0": {"f12": "600000", "f14": "浦发银行"}});
        assert_eq!(listing_rows(&array)[0][0], json!("000001"));
        assert_eq!(listing_rows(&object)[0][1], json!("浦发银行"));
        assert!(listing_rows(&Value::Null).is_empty());
    }

    #[test]
    fn test_kline_response_decoding() {
        let raw = r#"{"rc":0,"data":{"code":"000001","klines":[
            "2024-03-04,10.50,10.60,10.80,10.40,123456,130000000.00,3.81,0.95,0.10,0.64"
        ]}}"#;
        let body: EmResponse<KlineData> = serde_json::from_str(raw).unwrap();
        let data = body.data.unwrap();
        let table = RawTable::from_csv_lines(&KLINE_COLUMNS, &data.klines);
        let bars = normalize::normalize_bars("000001", &table).unwrap();
        assert_eq!(bars[0].close, Some(10.60));
        assert_eq!(bars[0].amount, Some(130_000_000.0));

        let missing: EmResponse<KlineData> =
            serde_json::from_str(r#"{"rc":0,"data":null}"#).unwrap();
        assert!(missing.data.is_none());
    }
}
