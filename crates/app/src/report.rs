//! `status` 与 `summary` 命令的检查规则和输出格式。

use chrono::NaiveDate;
use qfin_core::market::entity::DailyBar;
use qfin_core::store::port::{AuditRecord, CoverageReport, DailyCount};

/// 当日日线条数低于证券数的该百分比时视为不完整
const MIN_DAILY_COVERAGE_PERCENT: i64 = 80;

/// 最新日线距今超过该天数时视为过期
const MAX_STALE_DAYS: i64 = 1;

/// 覆盖报告中列出的年份数
const SUMMARY_YEARS: usize = 10;

/// 质量检查所需的存储概况
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub today: NaiveDate,
    pub symbols: i64,
    pub bars_today: i64,
    pub ticks_today: i64,
    pub latest: Option<NaiveDate>,
}

/// # Summary
/// 数据质量检查发现的问题。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualityIssue {
    NoBarsToday,
    IncompleteBars { bars: i64, symbols: i64 },
    NoTicksToday,
    StaleBars { days: i64 },
}

impl std::fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityIssue::NoBarsToday => write!(f, "no daily bars for today"),
            QualityIssue::IncompleteBars { bars, symbols } => {
                write!(f, "daily bars for today incomplete: {}/{}", bars, symbols)
            }
            QualityIssue::NoTicksToday => write!(f, "no ticks for today"),
            QualityIssue::StaleBars { days } => {
                write!(f, "latest daily bars are {} days old", days)
            }
        }
    }
}

/// # Summary
/// 对存储概况做数据质量检查。
///
/// # Logic
/// 1. 当日没有日线，或日线条数低于证券数的 80%，视为当日日线不完整。
/// 2. 当日没有成交明细。
/// 3. 最新日线距今超过 1 个自然日视为过期；没有任何日线时不做该项检查。
///
/// # Returns
/// 发现的问题，全部正常时为空。
pub fn quality_issues(snapshot: &Snapshot) -> Vec<QualityIssue> {
    let mut issues = Vec::new();

    if snapshot.bars_today == 0 {
        issues.push(QualityIssue::NoBarsToday);
    } else if snapshot.bars_today.saturating_mul(100)
        < snapshot.symbols.saturating_mul(MIN_DAILY_COVERAGE_PERCENT)
    {
        issues.push(QualityIssue::IncompleteBars {
            bars: snapshot.bars_today,
            symbols: snapshot.symbols,
        });
    }

    if snapshot.ticks_today == 0 {
        issues.push(QualityIssue::NoTicksToday);
    }

    if let Some(latest) = snapshot.latest {
        let days = (snapshot.today - latest).num_days();
        if days > MAX_STALE_DAYS {
            issues.push(QualityIssue::StaleBars { days });
        }
    }
    issues
}

pub fn print_daily_counts(title: &str, counts: &[DailyCount]) {
    if counts.is_empty() {
        return;
    }
    println!("{}", title);
    for count in counts {
        println!("  {}  {}", count.trade_date, count.count);
    }
}

pub fn print_quality(issues: &[QualityIssue]) {
    println!("quality:");
    if issues.is_empty() {
        println!("  ok");
    }
    for issue in issues {
        println!("  ! {}", issue);
    }
}

pub fn print_audit_logs(title: &str, logs: &[AuditRecord]) {
    println!("{}", title);
    if logs.is_empty() {
        println!("  (none)");
    }
    for log in logs {
        println!(
            "  {} [{}] {}/{}: {}",
            log.created_at.format("%Y-%m-%d %H:%M:%S"),
            log.level,
            log.component,
            log.operation,
            log.message
        );
    }
}

fn or_dash(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{:.*}", precision, v))
        .unwrap_or_else(|| "-".to_string())
}

pub fn print_top_bars(title: &str, bars: &[DailyBar]) {
    println!("{}", title);
    if bars.is_empty() {
        println!("  (none)");
    }
    for (rank, bar) in bars.iter().enumerate() {
        println!(
            "  {:>2}. {}  volume {:>14}  amount {:>18}",
            rank + 1,
            bar.symbol,
            or_dash(bar.volume, 0),
            or_dash(bar.amount, 2)
        );
    }
}

fn percent(report: &CoverageReport, count: i64) -> String {
    report
        .percent(count)
        .map(|p| format!("{:.2}%", p))
        .unwrap_or_else(|| "-".to_string())
}

/// # Summary
/// 输出日线覆盖报告：总体、交易所、最近年份与字段有效率。
pub fn print_coverage(report: &CoverageReport) {
    println!("daily bars:      {}", report.total_bars);
    println!("symbols:         {}", report.symbols);
    match (report.first_date, report.last_date, report.span_days()) {
        (Some(first), Some(last), Some(days)) => {
            println!("date span:       {} .. {} ({} days)", first, last, days)
        }
        _ => {
            println!("date span:       -");
            return;
        }
    }

    println!("by exchange:");
    for exchange in &report.exchanges {
        println!(
            "  {}  {} symbols, {} bars, {} .. {}",
            exchange.exchange,
            exchange.symbols,
            exchange.bars,
            exchange.first_date,
            exchange.last_date
        );
    }

    println!("by year:");
    for year in report.years.iter().take(SUMMARY_YEARS) {
        println!("  {}  {} symbols, {} bars", year.year, year.symbols, year.bars);
    }

    let valid = &report.valid;
    println!("valid fields:");
    for (field, count) in [
        ("open", valid.open),
        ("high", valid.high),
        ("low", valid.low),
        ("close", valid.close),
        ("volume", valid.volume),
    ] {
        println!("  {:<8}{} ({})", field, count, percent(report, count));
    }
}
