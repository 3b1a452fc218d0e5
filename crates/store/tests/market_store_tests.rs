use anyhow::Result;
use chrono::{NaiveDate, NaiveTime};
use qfin_core::common::Exchange;
use qfin_core::market::entity::{DailyBar, SymbolInfo, TickRecord, TradeSide};
use qfin_core::store::port::{AuditLevel, BarRanking, MarketStore};
use qfin_store::SqliteMarketStore;
use std::collections::BTreeMap;
use tempfile::{TempDir, tempdir};

async fn open_store() -> Result<(TempDir, SqliteMarketStore)> {
    let dir = tempdir()?;
    let store = SqliteMarketStore::open(dir.path().join("data").join("market.db")).await?;
    Ok((dir, store))
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

fn bar(symbol: &str, date: NaiveDate, close: f64) -> DailyBar {
    DailyBar {
        symbol: symbol.to_string(),
        trade_date: date,
        open: Some(close - 0.1),
        high: Some(close + 0.2),
        low: Some(close - 0.3),
        close: Some(close),
        volume: Some(1200.0),
        amount: None,
        pct_change: Some(0.5),
    }
}

fn tick(symbol: &str, time: (u32, u32, u32), seq: u32) -> TickRecord {
    TickRecord {
        symbol: symbol.to_string(),
        trade_date: day(4),
        trade_time: NaiveTime::from_hms_opt(time.0, time.1, time.2).unwrap(),
        seq,
        price: 10.5,
        volume: 3.0,
        amount: Some(3150.0),
        side: TradeSide::Buy,
    }
}

#[tokio::test]
async fn test_listing_replace_is_idempotent() -> Result<()> {
    let (_dir, store) = open_store().await?;
    let listing = vec![
        SymbolInfo::new("600000", "浦发银行"),
        SymbolInfo::new("000001", "平安银行"),
        SymbolInfo::new("300750", "宁德时代"),
    ];

    store.save_listing(&listing).await?;
    store.save_listing(&listing).await?;
    assert_eq!(store.count_symbols().await?, 3);

    // 读取顺序与写入顺序一致
    let loaded = store.load_listing(None).await?;
    assert_eq!(loaded, listing);
    assert_eq!(loaded[0].exchange, Exchange::Shanghai);

    let first_two = store.load_listing(Some(2)).await?;
    assert_eq!(first_two.len(), 2);
    assert_eq!(first_two[1].symbol, "000001");

    // 新快照完全替换旧列表
    store
        .save_listing(&[SymbolInfo::new("688981", "中芯国际")])
        .await?;
    assert_eq!(store.count_symbols().await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_bars_upsert_and_counts() -> Result<()> {
    let (_dir, store) = open_store().await?;
    assert_eq!(store.latest_trade_date().await?, None);

    store
        .save_bars(&[
            bar("600000", day(4), 10.0),
            bar("000001", day(4), 11.0),
            bar("600000", day(5), 10.5),
        ])
        .await?;
    // 相同主键覆盖旧值
    store.save_bars(&[bar("600000", day(5), 12.0)]).await?;

    assert_eq!(store.count_bars(None).await?, 3);
    assert_eq!(store.count_bars(Some(day(4))).await?, 2);
    assert_eq!(store.latest_trade_date().await?, Some(day(5)));

    let bars = store.load_bars("600000", day(1), day(31)).await?;
    assert_eq!(bars.len(), 2);
    assert_eq!(bars[1].close, Some(12.0));
    assert_eq!(bars[0].amount, None);

    let per_day = store.bar_counts_since(day(1)).await?;
    assert_eq!(per_day.len(), 2);
    assert_eq!(per_day[0].trade_date, day(5));
    assert_eq!(per_day[0].count, 1);
    assert_eq!(per_day[1].count, 2);
    Ok(())
}

#[tokio::test]
async fn test_ticks_keep_same_second_trades() -> Result<()> {
    let (_dir, store) = open_store().await?;
    let mut ticks = BTreeMap::new();
    ticks.insert(
        "600000".to_string(),
        vec![tick("600000", (9, 30, 3), 0), tick("600000", (9, 30, 3), 1)],
    );
    ticks.insert("000001".to_string(), vec![tick("000001", (14, 59, 57), 0)]);

    store.save_ticks(&ticks).await?;
    store.save_ticks(&ticks).await?;

    assert_eq!(store.count_ticks(None).await?, 3);
    assert_eq!(store.count_ticks(Some(day(4))).await?, 3);
    assert_eq!(store.count_ticks(Some(day(5))).await?, 0);

    let loaded = store.load_ticks("600000", day(4)).await?;
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[1].seq, 1);
    assert_eq!(loaded[0].side, TradeSide::Buy);
    Ok(())
}

#[tokio::test]
async fn test_tick_counts_per_day() -> Result<()> {
    let (_dir, store) = open_store().await?;
    let mut later = tick("600000", (10, 0, 0), 0);
    later.trade_date = day(6);
    let mut older = tick("600000", (10, 0, 0), 0);
    older.trade_date = NaiveDate::from_ymd_opt(2024, 2, 28).unwrap();

    let mut ticks = BTreeMap::new();
    ticks.insert(
        "600000".to_string(),
        vec![tick("600000", (9, 30, 3), 0), later, older],
    );
    ticks.insert("000001".to_string(), vec![tick("000001", (9, 31, 0), 0)]);
    store.save_ticks(&ticks).await?;

    let per_day = store.tick_counts_since(day(1)).await?;
    assert_eq!(per_day.len(), 2);
    assert_eq!((per_day[0].trade_date, per_day[0].count), (day(6), 1));
    assert_eq!((per_day[1].trade_date, per_day[1].count), (day(4), 2));
    assert!(store.tick_counts_since(day(7)).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_top_bars_rank_by_volume_and_amount() -> Result<()> {
    let (_dir, store) = open_store().await?;
    let ranked = |symbol: &str, volume: Option<f64>, amount: Option<f64>| DailyBar {
        volume,
        amount,
        ..bar(symbol, day(4), 10.0)
    };
    store
        .save_bars(&[
            ranked("600000", Some(500.0), Some(9_000.0)),
            ranked("000001", Some(900.0), Some(1_000.0)),
            ranked("300750", None, Some(5_000.0)),
            ranked("688981", Some(100.0), None),
            bar("600000", day(5), 10.0),
        ])
        .await?;

    let by_volume = store.top_bars(day(4), BarRanking::Volume, 3).await?;
    let codes: Vec<&str> = by_volume.iter().map(|b| b.symbol.as_str()).collect();
    assert_eq!(codes, ["000001", "600000", "688981"]);

    // 排序字段为空的日线排在最后
    let by_amount = store.top_bars(day(4), BarRanking::Amount, 10).await?;
    let codes: Vec<&str> = by_amount.iter().map(|b| b.symbol.as_str()).collect();
    assert_eq!(codes, ["600000", "300750", "000001", "688981"]);
    assert_eq!(by_amount[0].trade_date, day(4));

    assert!(store.top_bars(day(6), BarRanking::Volume, 10).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_coverage_report() -> Result<()> {
    let (_dir, store) = open_store().await?;
    let empty = store.coverage().await?;
    assert_eq!(empty.total_bars, 0);
    assert_eq!(empty.first_date, None);
    assert!(empty.exchanges.is_empty());

    store
        .save_listing(&[
            SymbolInfo::new("600000", "浦发银行"),
            SymbolInfo::new("000001", "平安银行"),
        ])
        .await?;
    let last_year = NaiveDate::from_ymd_opt(2023, 12, 29).unwrap();
    let mut suspended = bar("000001", day(5), 11.0);
    suspended.volume = Some(0.0);
    suspended.open = None;
    store
        .save_bars(&[
            bar("600000", last_year, 9.8),
            bar("600000", day(4), 10.0),
            bar("000001", day(4), 11.0),
            suspended,
            // 不在证券列表中，按代码前缀归入上交所
            bar("688981", day(5), 50.0),
        ])
        .await?;

    let report = store.coverage().await?;
    assert_eq!(report.total_bars, 5);
    assert_eq!(report.symbols, 3);
    assert_eq!(report.first_date, Some(last_year));
    assert_eq!(report.last_date, Some(day(5)));

    assert_eq!(report.exchanges.len(), 2);
    let sh = &report.exchanges[0];
    assert_eq!(sh.exchange, Exchange::Shanghai);
    assert_eq!((sh.symbols, sh.bars), (2, 3));
    assert_eq!((sh.first_date, sh.last_date), (last_year, day(5)));
    let sz = &report.exchanges[1];
    assert_eq!(sz.exchange, Exchange::Shenzhen);
    assert_eq!((sz.symbols, sz.bars), (1, 2));

    assert_eq!(report.years.len(), 2);
    assert_eq!((report.years[0].year, report.years[0].bars), (2024, 4));
    assert_eq!((report.years[1].year, report.years[1].symbols), (2023, 1));

    assert_eq!(report.valid.open, 4);
    assert_eq!(report.valid.close, 5);
    assert_eq!(report.valid.volume, 4);
    assert_eq!(report.percent(report.valid.volume), Some(80.0));
    Ok(())
}

#[tokio::test]
async fn test_audit_log_and_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("market.db");
    {
        let store = SqliteMarketStore::open(&path).await?;
        store
            .append_audit_log(AuditLevel::Error, "import failed", "scheduler", "daily_close")
            .await?;
        store.save_bars(&[bar("600000", day(4), 10.0)]).await?;
    }

    // 重复打开不会破坏已有数据
    let store = SqliteMarketStore::open(&path).await?;
    store.init_schema().await?;
    assert_eq!(store.count_bars(None).await?, 1);

    store
        .append_audit_log(AuditLevel::Info, "run finished", "importer", "run")
        .await?;
    store
        .append_audit_log(AuditLevel::Error, "write failed", "importer", "save_bars")
        .await?;

    let errors = store.recent_audit_logs(Some(AuditLevel::Error), 10).await?;
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].message, "write failed");
    assert_eq!(errors[0].operation, "save_bars");
    assert_eq!(errors[1].component, "scheduler");
    assert!(errors[0].id > errors[1].id);

    let info = store.recent_audit_logs(Some(AuditLevel::Info), 10).await?;
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].level, AuditLevel::Info);

    let latest = store.recent_audit_logs(None, 2).await?;
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[1].message, "run finished");
    Ok(())
}
