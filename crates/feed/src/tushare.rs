use crate::http::{build_client, read_json, transport_error};
use crate::normalize::{self, RawTable};
use async_trait::async_trait;
use chrono::NaiveDate;
use qfin_core::common::Exchange;
use qfin_core::market::entity::{DailyBar, SymbolInfo, TickRecord};
use qfin_core::market::error::MarketError;
use qfin_core::market::port::MarketDataProvider;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "http://api.tushare.pro";

// Tushare 日线成交额单位为千元
const AMOUNT_SCALE: f64 = 1000.0;

/// # Summary
/// Tushare Pro 行情提供者实现。
///
/// # Invariants
/// - 所有接口共用一个 POST 端点，以 `api_name` 区分。
/// - 不提供逐笔成交明细。
pub struct TushareProvider {
    client: Client,
    token: String,
    endpoint: String,
}

#[derive(Serialize, Debug)]
struct TushareRequest<'a> {
    api_name: &'a str,
    token: &'a str,
    params: Value,
    fields: &'a str,
}

#[derive(Deserialize, Debug)]
struct TushareResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    data: Option<TushareTable>,
}

#[derive(Deserialize, Debug, Default)]
struct TushareTable {
    #[serde(default)]
    fields: Vec<String>,
    #[serde(default)]
    items: Vec<Vec<Value>>,
}

/// # Summary
/// 将 Tushare 业务错误码映射为错误。
///
/// # Logic
/// 40203 为频次超限（瞬时）；40101 / 40001 为 token 无效或积分不足（拒绝）；其余为业务错误。
fn api_error(code: i64, msg: &str) -> MarketError {
    let detail = format!("tushare code {}: {}", code, msg);
    match code {
        40203 => MarketError::RateLimited(detail),
        40101 | 40001 => MarketError::Rejected(detail),
        _ => MarketError::Api(detail),
    }
}

/// Tushare 证券代码，形如 `000001.SZ`
fn ts_code(symbol: &str) -> String {
    format!("{}.{}", symbol, Exchange::from_symbol(symbol).code())
}

impl TushareProvider {
    /// # Summary
    /// 创建提供者。
    ///
    /// # Arguments
    /// * `token`: Tushare Pro 接口 token。
    /// * `timeout`: 单次请求超时。
    pub fn new(token: impl Into<String>, timeout: Duration) -> Result<Self, MarketError> {
        Ok(Self {
            client: build_client(timeout)?,
            token: token.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        })
    }

    /// 替换接口地址
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn query(
        &self,
        api_name: &str,
        params: Value,
        fields: &str,
    ) -> Result<RawTable, MarketError> {
        let request = TushareRequest {
            api_name,
            token: &self.token,
            params,
            fields,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;
        let body: TushareResponse = read_json(resp).await?;
        into_table(body)
    }
}

fn into_table(body: TushareResponse) -> Result<RawTable, MarketError> {
    if body.code != 0 {
        return Err(api_error(body.code, body.msg.as_deref().unwrap_or("")));
    }
    let table = body.data.unwrap_or_default();
    Ok(RawTable::new(table.fields, table.items))
}

/// 成交额换算为元，并按交易日升序排列
fn finish_bars(mut bars: Vec<DailyBar>) -> Vec<DailyBar> {
    for bar in &mut bars {
        bar.amount = bar.amount.map(|a| a * AMOUNT_SCALE);
    }
    bars.sort_by_key(|b| b.trade_date);
    bars
}

#[async_trait]
impl MarketDataProvider for TushareProvider {
    fn name(&self) -> &str {
        "tushare"
    }

    async fn fetch_listing(&self) -> Result<Vec<SymbolInfo>, MarketError> {
        let table = self
            .query(
                "stock_basic",
                json!({ "list_status": "L" }),
                "ts_code,symbol,name",
            )
            .await?;
        normalize::normalize_listing(&table)
    }

    /// # Summary
    /// 通过 `daily` 接口获取未复权日线。
    ///
    /// # Logic
    /// 1. 构造 `ts_code` 与 `YYYYMMDD` 日期参数。
    /// 2. 按列名规范化，成交额由千元换算为元。
    /// 3. 接口按日期倒序返回，结果统一转为升序。
    async fn fetch_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>, MarketError> {
        normalize::check_symbol(symbol)?;
        let table = self
            .query(
                "daily",
                json!({
                    "ts_code": ts_code(symbol),
                    "start_date": start.format("%Y%m%d").to_string(),
                    "end_date": end.format("%Y%m%d").to_string(),
                }),
                "ts_code,trade_date,open,high,low,close,pre_close,change,pct_chg,vol,amount",
            )
            .await?;
        Ok(finish_bars(normalize::normalize_bars(symbol, &table)?))
    }

    async fn fetch_ticks(
        &self,
        symbol: &str,
        trade_date: NaiveDate,
    ) -> Result<Vec<TickRecord>, MarketError> {
        Err(MarketError::Unsupported(format!(
            "tushare does not provide tick details ({} {})",
            symbol, trade_date
        )))
    }
}
