use chrono::NaiveDate;
use qfin_core::acquire::entity::{FetchOutcome, Records, WorkUnit};
use qfin_core::common::{DataKind, DateRange};
use qfin_core::market::entity::{DailyBar, SymbolInfo, TickRecord, TradeSide};
use qfin_core::market::error::{ErrorClass, MarketError};
use qfin_core::market::port::MarketDataProvider;
use qfin_core::store::port::{AuditLevel, MarketStore};
use qfin_core::testing::{MemMarketStore, ScriptedProvider};
use qfin_pipeline::{
    BatchImporter, FallbackResolver, FetchExecutor, ImportError, ImportOptions, RateLimiter,
    RetryPolicy, Shutdown, ShutdownSignal,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

fn bar(symbol: &str, date: NaiveDate) -> DailyBar {
    DailyBar {
        symbol: symbol.to_string(),
        trade_date: date,
        open: Some(10.0),
        high: Some(10.5),
        low: Some(9.8),
        close: Some(10.2),
        volume: Some(1000.0),
        amount: Some(1_020_000.0),
        pct_change: Some(2.0),
    }
}

fn tick(symbol: &str, date: NaiveDate) -> TickRecord {
    TickRecord {
        symbol: symbol.to_string(),
        trade_date: date,
        trade_time: chrono::NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
        seq: 0,
        price: 10.0,
        volume: 5.0,
        amount: None,
        side: TradeSide::Buy,
    }
}

fn symbols(codes: &[&str]) -> Vec<String> {
    codes.iter().map(|s| s.to_string()).collect()
}

fn executor(
    providers: &[&Arc<ScriptedProvider>],
    policy: RetryPolicy,
    interval: Duration,
) -> Arc<FetchExecutor> {
    let providers: Vec<Arc<dyn MarketDataProvider>> = providers
        .iter()
        .map(|p| Arc::clone(p) as Arc<dyn MarketDataProvider>)
        .collect();
    let resolver = FallbackResolver::new(providers, Arc::new(RateLimiter::new(interval)));
    Arc::new(FetchExecutor::new(resolver, policy))
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_secs(1),
    }
}

fn importer(
    executor: Arc<FetchExecutor>,
    store: &Arc<MemMarketStore>,
    options: ImportOptions,
) -> BatchImporter {
    BatchImporter::new(executor, store.clone(), options)
}

#[tokio::test(start_paused = true)]
async fn test_execute_yields_exactly_one_outcome() {
    let provider = Arc::new(
        ScriptedProvider::new("a")
            .push_bars("000001", Ok(vec![bar("000001", day(4))]))
            .push_bars("000003", Err(MarketError::InvalidSymbol("000003".into())))
            .push_bars("000004", Err(MarketError::Timeout("slow".into()))),
    );
    let exec = executor(&[&provider], fast_policy(), Duration::ZERO);
    let range = DateRange::single(day(4));

    let data = exec.execute(&WorkUnit::bars("000001", range)).await;
    assert!(matches!(data, FetchOutcome::Data { ref provider, .. } if provider == "a"));

    let empty = exec.execute(&WorkUnit::bars("000002", range)).await;
    assert_eq!(empty, FetchOutcome::Empty { provider: "a".into() });

    let FetchOutcome::Failed(permanent) = exec.execute(&WorkUnit::bars("000003", range)).await
    else {
        panic!("expected failure");
    };
    assert_eq!(permanent.class, ErrorClass::Permanent);
    assert_eq!(permanent.attempts, 1);
    assert_eq!(provider.calls("bars", "000003"), 1);

    let FetchOutcome::Failed(transient) = exec.execute(&WorkUnit::bars("000004", range)).await
    else {
        panic!("expected failure");
    };
    assert_eq!(transient.class, ErrorClass::Transient);
    assert_eq!(transient.attempts, 3);
    assert_eq!(transient.providers, vec!["a".to_string()]);
    assert_eq!(provider.calls("bars", "000004"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_back_off_exponentially() {
    let provider = Arc::new(
        ScriptedProvider::new("a")
            .push_bars("000001", Err(MarketError::Timeout("1".into())))
            .push_bars("000001", Err(MarketError::Upstream { status: 502 }))
            .push_bars("000001", Ok(vec![bar("000001", day(4))])),
    );
    let exec = executor(&[&provider], fast_policy(), Duration::ZERO);

    let outcome = exec
        .execute(&WorkUnit::bars("000001", DateRange::single(day(4))))
        .await;
    assert!(outcome.is_success());
    assert_eq!(provider.calls("bars", "000001"), 3);

    let times = provider.call_times();
    assert_eq!(times[1] - times[0], Duration::from_secs(1));
    assert_eq!(times[2] - times[1], Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_permanently_failed_provider_not_retried() {
    let rejecting = Arc::new(
        ScriptedProvider::new("a").push_bars("000001", Err(MarketError::Rejected("quota".into()))),
    );
    let flaky = Arc::new(
        ScriptedProvider::new("b").push_bars("000001", Err(MarketError::Timeout("slow".into()))),
    );
    let exec = executor(&[&rejecting, &flaky], fast_policy(), Duration::ZERO);

    let FetchOutcome::Failed(failure) = exec
        .execute(&WorkUnit::bars("000001", DateRange::single(day(4))))
        .await
    else {
        panic!("expected failure");
    };
    assert_eq!(failure.class, ErrorClass::Transient);
    assert_eq!(failure.attempts, 3);
    assert_eq!(failure.providers, vec!["a".to_string(), "b".to_string()]);
    assert!(failure.message.contains("skipped after permanent failure: a"));

    // 永久失败的数据源只调用一次，瞬时失败的数据源用满重试次数
    assert_eq!(rejecting.calls("bars", "000001"), 1);
    assert_eq!(flaky.calls("bars", "000001"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_recovers_on_fallback_retry() {
    let rejecting = Arc::new(
        ScriptedProvider::new("a").push_bars("000001", Err(MarketError::Rejected("quota".into()))),
    );
    let flaky = Arc::new(
        ScriptedProvider::new("b")
            .push_bars("000001", Err(MarketError::Network("reset".into())))
            .push_bars("000001", Ok(vec![bar("000001", day(4))])),
    );
    let exec = executor(&[&rejecting, &flaky], fast_policy(), Duration::ZERO);

    let outcome = exec
        .execute(&WorkUnit::bars("000001", DateRange::single(day(4))))
        .await;
    assert!(matches!(outcome, FetchOutcome::Data { ref provider, .. } if provider == "b"));
    assert_eq!(rejecting.calls("bars", "000001"), 1);
    assert_eq!(flaky.calls("bars", "000001"), 2);

    // 下一个工作单元重新尝试全部数据源
    let next = exec
        .execute(&WorkUnit::bars("000002", DateRange::single(day(4))))
        .await;
    assert_eq!(next, FetchOutcome::Empty { provider: "a".into() });
}

#[tokio::test(start_paused = true)]
async fn test_fallback_and_empty_short_circuit() {
    let a = Arc::new(
        ScriptedProvider::new("a")
            .push_bars("000001", Err(MarketError::Network("reset".into())))
            .push_ticks("000001", Ok(vec![])),
    );
    let b = Arc::new(
        ScriptedProvider::new("b")
            .push_bars("000001", Ok(vec![bar("000001", day(4))]))
            .push_ticks("000001", Ok(vec![tick("000001", day(4))])),
    );
    let exec = executor(&[&a, &b], fast_policy(), Duration::ZERO);

    let outcome = exec
        .execute(&WorkUnit::bars("000001", DateRange::single(day(4))))
        .await;
    assert_eq!(outcome.provider(), Some("b"));
    assert!(matches!(
        outcome,
        FetchOutcome::Data { records: Records::Bars(ref v), .. } if v.len() == 1
    ));

    let outcome = exec.execute(&WorkUnit::ticks("000001", day(4))).await;
    assert_eq!(outcome, FetchOutcome::Empty { provider: "a".into() });
    assert_eq!(b.calls("ticks", "000001"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_holds_across_workers() {
    let provider = Arc::new(ScriptedProvider::new("a"));
    let exec = executor(&[&provider], fast_policy(), Duration::from_secs(1));
    let store = Arc::new(MemMarketStore::new());
    let importer = importer(
        exec,
        &store,
        ImportOptions {
            concurrency: 4,
            ..Default::default()
        },
    );

    importer
        .run(
            &symbols(&["000001", "000002", "000003", "000004"]),
            DateRange::single(day(4)),
            &[DataKind::Bars],
            &ShutdownSignal::never(),
        )
        .await;

    let mut times = provider.call_times();
    times.sort();
    assert_eq!(times.len(), 4);
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(1));
    }
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_three_symbols_one_day() {
    let a = Arc::new(
        ScriptedProvider::new("a")
            .push_bars("000001", Ok(vec![bar("000001", day(4))]))
            .push_bars("000002", Ok(vec![bar("000002", day(4))]))
            .push_bars("000003", Err(MarketError::Timeout("slow".into()))),
    );
    let b = Arc::new(
        ScriptedProvider::new("b").push_bars("000003", Ok(vec![bar("000003", day(4))])),
    );
    let store = Arc::new(MemMarketStore::new());
    let importer = importer(
        executor(&[&a, &b], RetryPolicy::default(), Duration::from_secs(1)),
        &store,
        ImportOptions::default(),
    );

    let stats = importer
        .run(
            &symbols(&["000001", "000002", "000003"]),
            DateRange::single(day(4)),
            &[DataKind::Bars],
            &ShutdownSignal::never(),
        )
        .await;

    let expected: BTreeSet<String> = symbols(&["000001", "000002", "000003"])
        .into_iter()
        .collect();
    assert_eq!(stats.succeeded, expected);
    assert!(stats.failed.is_empty());
    assert_eq!(stats.records_of(DataKind::Bars), 3);
    assert_eq!(stats.persisted.get(&DataKind::Bars), Some(&true));
    assert!(!stats.cancelled);

    assert_eq!(store.bar_writes(), 1);
    assert_eq!(store.bar_len(), 3);
    assert_eq!(b.calls("bars", "000001"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_success_and_failure_sets() {
    let provider = Arc::new(
        ScriptedProvider::new("a")
            .push_bars("000001", Ok(vec![bar("000001", day(4))]))
            .push_ticks("000001", Err(MarketError::Unsupported("ticks".into())))
            .push_bars("000002", Err(MarketError::InvalidSymbol("000002".into())))
            .push_ticks("000002", Err(MarketError::InvalidSymbol("000002".into()))),
    );
    let store = Arc::new(MemMarketStore::new());
    let importer = importer(
        executor(&[&provider], fast_policy(), Duration::ZERO),
        &store,
        ImportOptions::default(),
    );

    let stats = importer
        .run(
            &symbols(&["000001", "000002", "000003", "000001"]),
            DateRange::single(day(4)),
            &[DataKind::Bars, DataKind::Ticks],
            &ShutdownSignal::never(),
        )
        .await;

    assert_eq!(stats.total_symbols, 3);
    assert_eq!(stats.total_units, 6);
    assert!(stats.succeeded.contains("000001") && stats.failed.contains("000001"));
    assert!(!stats.succeeded.contains("000002") && stats.failed.contains("000002"));
    // 空结果计为成功
    assert!(stats.succeeded.contains("000003") && !stats.failed.contains("000003"));
    assert_eq!(stats.empty_units, 2);
    // 没有成交明细记录时不写入
    assert_eq!(store.tick_writes(), 0);
    assert_eq!(stats.persisted.get(&DataKind::Ticks), None);
}

#[tokio::test(start_paused = true)]
async fn test_empty_universe() {
    let provider = Arc::new(ScriptedProvider::new("a"));
    let store = Arc::new(MemMarketStore::new());
    let importer = importer(
        executor(&[&provider], fast_policy(), Duration::ZERO),
        &store,
        ImportOptions::default(),
    );

    let stats = importer
        .run(
            &[],
            DateRange::single(day(4)),
            &[DataKind::Bars, DataKind::Ticks],
            &ShutdownSignal::never(),
        )
        .await;
    assert!(stats.succeeded.is_empty());
    assert!(stats.failed.is_empty());
    assert_eq!(stats.total_units, 0);
    assert_eq!(provider.total_calls(), 0);
    assert_eq!(store.bar_writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_ticks_planned_per_trading_day() {
    let provider = Arc::new(ScriptedProvider::new("a"));
    let store = Arc::new(MemMarketStore::new());
    let importer = importer(
        executor(&[&provider], fast_policy(), Duration::ZERO),
        &store,
        ImportOptions::default(),
    );
    // 2024-03-08 周五 至 2024-03-11 周一
    let range = DateRange::new(day(8), day(11)).unwrap();
    let units = importer.plan(
        &symbols(&["000001", "600000"]),
        range,
        &[DataKind::Bars, DataKind::Ticks],
    );

    assert_eq!(units.len(), 6);
    let tick_days: Vec<NaiveDate> = units
        .iter()
        .filter(|u| u.kind == DataKind::Ticks && u.symbol == "000001")
        .map(|u| u.range.start())
        .collect();
    assert_eq!(tick_days, vec![day(8), day(11)]);
}

#[tokio::test(start_paused = true)]
async fn test_storage_failure_does_not_abort_run() {
    let provider = Arc::new(
        ScriptedProvider::new("a")
            .push_bars("000001", Ok(vec![bar("000001", day(4))]))
            .push_ticks("000001", Ok(vec![tick("000001", day(4))])),
    );
    let store = Arc::new(MemMarketStore::new());
    store.set_fail_writes(true);
    let importer = importer(
        executor(&[&provider], fast_policy(), Duration::ZERO),
        &store,
        ImportOptions::default(),
    );

    let stats = importer
        .run(
            &symbols(&["000001"]),
            DateRange::single(day(4)),
            &[DataKind::Bars, DataKind::Ticks],
            &ShutdownSignal::never(),
        )
        .await;

    assert_eq!(stats.records_of(DataKind::Bars), 1);
    assert_eq!(stats.records_of(DataKind::Ticks), 1);
    assert_eq!(stats.persisted.get(&DataKind::Bars), Some(&false));
    assert_eq!(stats.persisted.get(&DataKind::Ticks), Some(&false));
    assert_eq!(store.bar_writes(), 1);
    assert_eq!(store.tick_writes(), 1);

    let audit = store.audit_entries();
    assert_eq!(audit.len(), 2);
    assert!(audit.iter().all(|e| e.level == AuditLevel::Error && e.component == "importer"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_new_units() {
    let provider = Arc::new(ScriptedProvider::new("a").with_latency(Duration::from_secs(1)));
    let store = Arc::new(MemMarketStore::new());
    let importer = importer(
        executor(&[&provider], fast_policy(), Duration::ZERO),
        &store,
        ImportOptions::default(),
    );
    let shutdown = Shutdown::new();
    let signal = shutdown.signal();

    let syms = symbols(&["000001", "000002", "000003", "000004", "000005"]);
    let run = importer.run(
        &syms,
        DateRange::single(day(4)),
        &[DataKind::Bars],
        &signal,
    );
    let stop = async {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        shutdown.trigger();
    };
    let (stats, ()) = tokio::join!(run, stop);

    assert!(stats.cancelled);
    assert_eq!(stats.processed_units, 2);
    assert_eq!(stats.skipped_units(), 3);
    assert_eq!(provider.total_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_chunk_pause_between_chunks() {
    let provider = Arc::new(ScriptedProvider::new("a"));
    let store = Arc::new(MemMarketStore::new());
    let importer = importer(
        executor(&[&provider], fast_policy(), Duration::ZERO),
        &store,
        ImportOptions {
            concurrency: 2,
            chunk_size: 2,
            chunk_pause: Duration::from_secs(10),
        },
    );

    let start = Instant::now();
    let stats = importer
        .run(
            &symbols(&["000001", "000002", "000003", "000004", "000005"]),
            DateRange::single(day(4)),
            &[DataKind::Bars],
            &ShutdownSignal::never(),
        )
        .await;

    assert_eq!(stats.processed_units, 5);
    assert_eq!(Instant::now() - start, Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_listing_replaces_snapshot() {
    let listing = vec![
        SymbolInfo::new("600000", "浦发银行"),
        SymbolInfo::new("000001", "平安银行"),
    ];
    let provider = Arc::new(ScriptedProvider::new("a").push_listing(Ok(listing.clone())));
    let store = Arc::new(MemMarketStore::new());
    let importer = importer(
        executor(&[&provider], fast_policy(), Duration::ZERO),
        &store,
        ImportOptions::default(),
    );

    let refreshed = importer.refresh_listing().await.unwrap();
    assert_eq!(refreshed, listing);
    assert_eq!(store.count_symbols().await.unwrap(), 2);

    let universe = importer.universe(Some(1)).await.unwrap();
    assert_eq!(universe.len(), 1);
    assert_eq!(universe[0].symbol, "600000");

    let progress = importer.progress().await.unwrap();
    assert_eq!(progress.symbols, 2);
    assert_eq!(progress.latest_trade_date, None);
}

#[tokio::test(start_paused = true)]
async fn test_empty_listing_keeps_stored_snapshot() {
    let provider = Arc::new(ScriptedProvider::new("a").push_listing(Ok(vec![])));
    let store = Arc::new(MemMarketStore::new());
    store
        .save_listing(&[SymbolInfo::new("000001", "平安银行")])
        .await
        .unwrap();
    let importer = importer(
        executor(&[&provider], fast_policy(), Duration::ZERO),
        &store,
        ImportOptions::default(),
    );

    let result = importer.refresh_listing().await;
    assert!(matches!(result, Err(ImportError::EmptyListing(ref p)) if p == "a"));
    assert_eq!(store.count_symbols().await.unwrap(), 1);
}
