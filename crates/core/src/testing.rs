//! 测试替身：可编排的数据源与内存存储，供各 crate 的测试复用。

use crate::market::entity::{DailyBar, SymbolInfo, TickRecord};
use crate::market::error::MarketError;
use crate::market::port::MarketDataProvider;
use crate::store::error::StoreError;
use crate::common::Exchange;
use crate::store::port::{
    AuditLevel, AuditRecord, BarRanking, CoverageReport, DailyCount, ExchangeCoverage,
    FieldValidity, MarketStore, YearCoverage,
};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

type Script<T> = VecDeque<Result<Vec<T>, MarketError>>;

/// 取出下一条编排结果，队列只剩一条时重复返回该条
fn next_from<T: Clone>(queue: Option<&mut Script<T>>) -> Result<Vec<T>, MarketError> {
    match queue {
        Some(q) if q.len() > 1 => q.pop_front().unwrap_or_else(|| Ok(Vec::new())),
        Some(q) => q.front().cloned().unwrap_or_else(|| Ok(Vec::new())),
        None => Ok(Vec::new()),
    }
}

/// # Summary
/// 按证券代码编排返回值的数据源替身。
///
/// # Invariants
/// - 未编排的证券返回空结果。
/// - 记录每次调用的时刻 (tokio 时钟)，用于验证限流间隔。
pub struct ScriptedProvider {
    name: String,
    latency: Duration,
    listing: Mutex<Script<SymbolInfo>>,
    bars: DashMap<String, Script<DailyBar>>,
    ticks: DashMap<String, Script<TickRecord>>,
    calls: DashMap<String, u32>,
    call_times: Mutex<Vec<Instant>>,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latency: Duration::ZERO,
            listing: Mutex::new(VecDeque::new()),
            bars: DashMap::new(),
            ticks: DashMap::new(),
            calls: DashMap::new(),
            call_times: Mutex::new(Vec::new()),
        }
    }

    /// 每次调用前模拟的网络耗时
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push_listing(self, result: Result<Vec<SymbolInfo>, MarketError>) -> Self {
        self.listing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(result);
        self
    }

    pub fn push_bars(self, symbol: &str, result: Result<Vec<DailyBar>, MarketError>) -> Self {
        self.bars
            .entry(symbol.to_string())
            .or_default()
            .push_back(result);
        self
    }

    pub fn push_ticks(self, symbol: &str, result: Result<Vec<TickRecord>, MarketError>) -> Self {
        self.ticks
            .entry(symbol.to_string())
            .or_default()
            .push_back(result);
        self
    }

    /// 某方法对某证券的调用次数，`method` 取 `listing` / `bars` / `ticks`
    pub fn calls(&self, method: &str, symbol: &str) -> u32 {
        self.calls
            .get(&format!("{}:{}", method, symbol))
            .map(|c| *c)
            .unwrap_or(0)
    }

    /// 全部调用次数
    pub fn total_calls(&self) -> usize {
        self.call_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// 每次调用开始的时刻
    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn enter(&self, method: &str, symbol: &str) {
        *self.calls.entry(format!("{}:{}", method, symbol)).or_insert(0) += 1;
        self.call_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Instant::now());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl MarketDataProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_listing(&self) -> Result<Vec<SymbolInfo>, MarketError> {
        self.enter("listing", "").await;
        let mut queue = self.listing.lock().unwrap_or_else(|e| e.into_inner());
        next_from(Some(&mut queue))
    }

    async fn fetch_bars(
        &self,
        symbol: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<DailyBar>, MarketError> {
        self.enter("bars", symbol).await;
        next_from(self.bars.get_mut(symbol).as_deref_mut())
    }

    async fn fetch_ticks(
        &self,
        symbol: &str,
        _trade_date: NaiveDate,
    ) -> Result<Vec<TickRecord>, MarketError> {
        self.enter("ticks", symbol).await;
        next_from(self.ticks.get_mut(symbol).as_deref_mut())
    }
}

type TickKey = (String, NaiveDate, NaiveTime, u32);

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// 按交易日聚合条数，日期降序
fn daily_counts(dates: impl Iterator<Item = NaiveDate>) -> Vec<DailyCount> {
    let mut counts: BTreeMap<NaiveDate, i64> = BTreeMap::new();
    for date in dates {
        *counts.entry(date).or_default() += 1;
    }
    counts
        .into_iter()
        .rev()
        .map(|(trade_date, count)| DailyCount { trade_date, count })
        .collect()
}

fn positive(value: Option<f64>) -> i64 {
    i64::from(value.is_some_and(|v| v > 0.0))
}

/// 一条审计日志
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub level: AuditLevel,
    pub message: String,
    pub component: String,
    pub operation: String,
}

/// # Summary
/// 基于 DashMap 的内存存储替身。
///
/// # Invariants
/// - 主键语义与 SQLite 实现一致：重复写入覆盖旧值。
/// - 打开 `fail_writes` 后所有写入返回 `StoreError::Database`，且不改变数据。
#[derive(Default)]
pub struct MemMarketStore {
    listing: Mutex<Vec<SymbolInfo>>,
    bars: DashMap<(String, NaiveDate), DailyBar>,
    ticks: DashMap<TickKey, TickRecord>,
    audit: Mutex<Vec<AuditRecord>>,
    bar_writes: AtomicUsize,
    tick_writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemMarketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// `save_bars` 被调用的次数
    pub fn bar_writes(&self) -> usize {
        self.bar_writes.load(Ordering::SeqCst)
    }

    /// `save_ticks` 被调用的次数
    pub fn tick_writes(&self) -> usize {
        self.tick_writes.load(Ordering::SeqCst)
    }

    pub fn bar_len(&self) -> usize {
        self.bars.len()
    }

    pub fn tick_len(&self) -> usize {
        self.ticks.len()
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|r| AuditEntry {
                level: r.level,
                message: r.message.clone(),
                component: r.component.clone(),
                operation: r.operation.clone(),
            })
            .collect()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database("write failure injected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MarketStore for MemMarketStore {
    async fn save_listing(&self, listing: &[SymbolInfo]) -> Result<(), StoreError> {
        self.check_writable()?;
        *self.listing.lock().unwrap_or_else(|e| e.into_inner()) = listing.to_vec();
        Ok(())
    }

    async fn load_listing(&self, limit: Option<usize>) -> Result<Vec<SymbolInfo>, StoreError> {
        let listing = self.listing.lock().unwrap_or_else(|e| e.into_inner());
        let take = limit.unwrap_or(listing.len());
        Ok(listing.iter().take(take).cloned().collect())
    }

    async fn save_bars(&self, bars: &[DailyBar]) -> Result<(), StoreError> {
        self.bar_writes.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;
        for bar in bars {
            self.bars
                .insert((bar.symbol.clone(), bar.trade_date), bar.clone());
        }
        Ok(())
    }

    async fn save_ticks(
        &self,
        ticks: &BTreeMap<String, Vec<TickRecord>>,
    ) -> Result<(), StoreError> {
        self.tick_writes.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;
        for tick in ticks.values().flatten() {
            let key = (
                tick.symbol.clone(),
                tick.trade_date,
                tick.trade_time,
                tick.seq,
            );
            self.ticks.insert(key, tick.clone());
        }
        Ok(())
    }

    async fn latest_trade_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        Ok(self.bars.iter().map(|e| e.key().1).max())
    }

    async fn count_symbols(&self) -> Result<i64, StoreError> {
        let len = self.listing.lock().unwrap_or_else(|e| e.into_inner()).len();
        Ok(to_i64(len))
    }

    async fn count_bars(&self, date: Option<NaiveDate>) -> Result<i64, StoreError> {
        let n = self
            .bars
            .iter()
            .filter(|e| date.is_none_or(|d| e.key().1 == d))
            .count();
        Ok(to_i64(n))
    }

    async fn count_ticks(&self, date: Option<NaiveDate>) -> Result<i64, StoreError> {
        let n = self
            .ticks
            .iter()
            .filter(|e| date.is_none_or(|d| e.key().1 == d))
            .count();
        Ok(to_i64(n))
    }

    async fn bar_counts_since(&self, since: NaiveDate) -> Result<Vec<DailyCount>, StoreError> {
        Ok(daily_counts(
            self.bars.iter().map(|e| e.key().1).filter(|d| *d >= since),
        ))
    }

    async fn tick_counts_since(&self, since: NaiveDate) -> Result<Vec<DailyCount>, StoreError> {
        Ok(daily_counts(
            self.ticks.iter().map(|e| e.key().1).filter(|d| *d >= since),
        ))
    }

    async fn top_bars(
        &self,
        date: NaiveDate,
        by: BarRanking,
        limit: usize,
    ) -> Result<Vec<DailyBar>, StoreError> {
        let key = |bar: &DailyBar| match by {
            BarRanking::Volume => bar.volume,
            BarRanking::Amount => bar.amount,
        };
        let mut bars: Vec<DailyBar> = self
            .bars
            .iter()
            .filter(|e| e.key().1 == date)
            .map(|e| e.value().clone())
            .collect();
        bars.sort_by(|a, b| {
            match (key(a), key(b)) {
                (Some(x), Some(y)) => y.total_cmp(&x),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
            .then_with(|| a.symbol.cmp(&b.symbol))
        });
        bars.truncate(limit);
        Ok(bars)
    }

    async fn coverage(&self) -> Result<CoverageReport, StoreError> {
        let listed: BTreeMap<String, Exchange> = self
            .listing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|s| (s.symbol.clone(), s.exchange))
            .collect();

        let mut report = CoverageReport::default();
        let mut symbols = BTreeSet::new();
        let mut exchanges: BTreeMap<Exchange, (BTreeSet<String>, i64, NaiveDate, NaiveDate)> =
            BTreeMap::new();
        let mut years: BTreeMap<i32, (BTreeSet<String>, i64)> = BTreeMap::new();
        let mut valid = FieldValidity::default();

        for entry in self.bars.iter() {
            let bar = entry.value();
            let date = bar.trade_date;
            report.total_bars += 1;
            symbols.insert(bar.symbol.clone());
            report.first_date = Some(report.first_date.map_or(date, |d| d.min(date)));
            report.last_date = Some(report.last_date.map_or(date, |d| d.max(date)));

            let exchange = listed
                .get(&bar.symbol)
                .copied()
                .unwrap_or_else(|| Exchange::from_symbol(&bar.symbol));
            let slot = exchanges
                .entry(exchange)
                .or_insert_with(|| (BTreeSet::new(), 0, date, date));
            slot.0.insert(bar.symbol.clone());
            slot.1 += 1;
            slot.2 = slot.2.min(date);
            slot.3 = slot.3.max(date);

            let year = years.entry(date.year()).or_default();
            year.0.insert(bar.symbol.clone());
            year.1 += 1;

            valid.open += positive(bar.open);
            valid.high += positive(bar.high);
            valid.low += positive(bar.low);
            valid.close += positive(bar.close);
            valid.volume += positive(bar.volume);
        }

        report.symbols = to_i64(symbols.len());
        report.exchanges = exchanges
            .into_iter()
            .map(|(exchange, (symbols, bars, first_date, last_date))| ExchangeCoverage {
                exchange,
                symbols: to_i64(symbols.len()),
                bars,
                first_date,
                last_date,
            })
            .collect();
        report.years = years
            .into_iter()
            .rev()
            .map(|(year, (symbols, bars))| YearCoverage {
                year,
                symbols: to_i64(symbols.len()),
                bars,
            })
            .collect();
        report.valid = valid;
        Ok(report)
    }

    async fn append_audit_log(
        &self,
        level: AuditLevel,
        message: &str,
        component: &str,
        operation: &str,
    ) -> Result<(), StoreError> {
        let mut audit = self.audit.lock().unwrap_or_else(|e| e.into_inner());
        let id = to_i64(audit.len()) + 1;
        audit.push(AuditRecord {
            id,
            level,
            message: message.to_string(),
            component: component.to_string(),
            operation: operation.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn recent_audit_logs(
        &self,
        level: Option<AuditLevel>,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        Ok(self
            .audit
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .filter(|r| level.is_none_or(|l| r.level == l))
            .take(limit)
            .cloned()
            .collect())
    }
}
