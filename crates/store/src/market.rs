use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use qfin_core::common::Exchange;
use qfin_core::market::entity::{DailyBar, SymbolInfo, TickRecord, TradeSide};
use qfin_core::store::error::StoreError;
use qfin_core::store::port::{
    AuditLevel, AuditRecord, BarRanking, CoverageReport, DailyCount, ExchangeCoverage,
    FieldValidity, MarketStore, YearCoverage,
};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stock_info (
    symbol TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    exchange TEXT NOT NULL,
    updated_at DATETIME NOT NULL
);

CREATE TABLE IF NOT EXISTS stock_daily_data (
    symbol TEXT NOT NULL,
    trade_date TEXT NOT NULL,
    open REAL,
    high REAL,
    low REAL,
    close REAL,
    volume REAL,
    amount REAL,
    pct_change REAL,
    PRIMARY KEY (symbol, trade_date)
);

CREATE TABLE IF NOT EXISTS stock_transaction_detail (
    symbol TEXT NOT NULL,
    trade_date TEXT NOT NULL,
    trade_time TEXT NOT NULL,
    seq INTEGER NOT NULL,
    price REAL NOT NULL,
    volume REAL NOT NULL,
    amount REAL,
    side TEXT NOT NULL,
    PRIMARY KEY (symbol, trade_date, trade_time, seq)
);

CREATE TABLE IF NOT EXISTS system_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    level TEXT NOT NULL,
    message TEXT NOT NULL,
    module TEXT NOT NULL,
    function TEXT NOT NULL,
    created_at DATETIME NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_daily_trade_date ON stock_daily_data (trade_date);
CREATE INDEX IF NOT EXISTS idx_detail_trade_date ON stock_transaction_detail (trade_date);
CREATE INDEX IF NOT EXISTS idx_log_level ON system_log (level);
"#;

// 证券列表中不存在的代码按前缀推断交易所，与 `Exchange::from_symbol` 一致
const EXCHANGE_OF_BAR: &str = r#"
COALESCE(
    s.exchange,
    CASE WHEN substr(d.symbol, 1, 2) IN ('60', '68', '90') THEN 'SH' ELSE 'SZ' END
)
"#;

type BarRow = (
    NaiveDate,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
);

fn bar_from_row(symbol: String, r: BarRow) -> DailyBar {
    DailyBar {
        symbol,
        trade_date: r.0,
        open: r.1,
        high: r.2,
        low: r.3,
        close: r.4,
        volume: r.5,
        amount: r.6,
        pct_change: r.7,
    }
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

/// MarketStore 的 SQLite 实现。
///
/// # Summary
/// 在单个 SQLite 文件中保存证券列表、日线、成交明细与系统审计日志。
///
/// # Invariants
/// * 表结构在 `open` 时初始化，可重复执行。
/// * 每次批量写入在一个事务内完成。
pub struct SqliteMarketStore {
    pool: SqlitePool,
}

impl SqliteMarketStore {
    /// 打开（必要时创建）数据库文件并初始化表结构。
    ///
    /// # Logic
    /// 1. 确保数据库文件所在目录存在。
    /// 2. 配置 SQLite 连接选项，开启 `create_if_missing`。
    /// 3. 建立连接池并执行建表 DDL。
    ///
    /// # Arguments
    /// * `path` - 数据库文件路径。
    ///
    /// # Returns
    /// * `Result<Self, StoreError>` - 存储实例或初始化错误。
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::InitError(e.to_string()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| StoreError::InitError(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        info!(path = %path.display(), "Market store opened");
        Ok(store)
    }

    /// 执行建表 DDL，表已存在时不做任何修改
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::InitError(e.to_string()))?;
        Ok(())
    }

    async fn count(&self, sql: &str, date: Option<NaiveDate>) -> Result<i64, StoreError> {
        let query = sqlx::query_scalar::<_, i64>(sql);
        let query = match date {
            Some(d) => query.bind(d),
            None => query,
        };
        query.fetch_one(&self.pool).await.map_err(db_err)
    }

    async fn daily_counts(
        &self,
        sql: &str,
        since: NaiveDate,
    ) -> Result<Vec<DailyCount>, StoreError> {
        let rows = sqlx::query_as::<_, (NaiveDate, i64)>(sql)
            .bind(since)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(trade_date, count)| DailyCount { trade_date, count })
            .collect())
    }
}

#[async_trait]
impl MarketStore for SqliteMarketStore {
    /// # Summary
    /// 全量替换证券列表。
    ///
    /// # Logic
    /// 1. 开启事务，清空 `stock_info`。
    /// 2. 按顺序插入新快照，重复代码以后出现者为准。
    /// 3. 提交事务。
    async fn save_listing(&self, listing: &[SymbolInfo]) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("DELETE FROM stock_info")
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        for info in listing {
            sqlx::query(
                "INSERT OR REPLACE INTO stock_info (symbol, name, exchange, updated_at) VALUES (?, ?, ?, ?)",
            )
            .bind(&info.symbol)
            .bind(&info.name)
            .bind(info.exchange.code())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        debug!(count = listing.len(), "Listing replaced");
        Ok(())
    }

    async fn load_listing(&self, limit: Option<usize>) -> Result<Vec<SymbolInfo>, StoreError> {
        // SQLite 中 LIMIT -1 表示不限制
        let limit = limit
            .map(|n| i64::try_from(n).unwrap_or(i64::MAX))
            .unwrap_or(-1);

        let rows = sqlx::query_as::<_, (String, String, String)>(
            "SELECT symbol, name, exchange FROM stock_info ORDER BY rowid ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|(symbol, name, exchange)| {
                let exchange: Exchange = exchange.parse().map_err(StoreError::Corrupt)?;
                Ok(SymbolInfo {
                    symbol,
                    name,
                    exchange,
                })
            })
            .collect()
    }

    /// # Summary
    /// 批量写入日线数据。
    ///
    /// # Logic
    /// 在一个事务内对每根日线执行 `INSERT OR REPLACE`，空列表直接返回。
    async fn save_bars(&self, bars: &[DailyBar]) -> Result<(), StoreError> {
        if bars.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        for bar in bars {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO stock_daily_data
                    (symbol, trade_date, open, high, low, close, volume, amount, pct_change)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&bar.symbol)
            .bind(bar.trade_date)
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.volume)
            .bind(bar.amount)
            .bind(bar.pct_change)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        debug!(count = bars.len(), "Daily bars saved");
        Ok(())
    }

    /// # Summary
    /// 批量写入成交明细，所有证券在同一事务内提交。
    async fn save_ticks(
        &self,
        ticks: &BTreeMap<String, Vec<TickRecord>>,
    ) -> Result<(), StoreError> {
        if ticks.values().all(Vec::is_empty) {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut written = 0usize;
        for tick in ticks.values().flatten() {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO stock_transaction_detail
                    (symbol, trade_date, trade_time, seq, price, volume, amount, side)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&tick.symbol)
            .bind(tick.trade_date)
            .bind(tick.trade_time)
            .bind(i64::from(tick.seq))
            .bind(tick.price)
            .bind(tick.volume)
            .bind(tick.amount)
            .bind(tick.side.code())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            written += 1;
        }

        tx.commit().await.map_err(db_err)?;
        debug!(symbols = ticks.len(), count = written, "Ticks saved");
        Ok(())
    }

    async fn latest_trade_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        sqlx::query_scalar::<_, NaiveDate>(
            "SELECT trade_date FROM stock_daily_data ORDER BY trade_date DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn count_symbols(&self) -> Result<i64, StoreError> {
        self.count("SELECT COUNT(*) FROM stock_info", None).await
    }

    async fn count_bars(&self, date: Option<NaiveDate>) -> Result<i64, StoreError> {
        match date {
            Some(_) => {
                self.count(
                    "SELECT COUNT(*) FROM stock_daily_data WHERE trade_date = ?",
                    date,
                )
                .await
            }
            None => self.count("SELECT COUNT(*) FROM stock_daily_data", None).await,
        }
    }

    async fn count_ticks(&self, date: Option<NaiveDate>) -> Result<i64, StoreError> {
        match date {
            Some(_) => {
                self.count(
                    "SELECT COUNT(*) FROM stock_transaction_detail WHERE trade_date = ?",
                    date,
                )
                .await
            }
            None => {
                self.count("SELECT COUNT(*) FROM stock_transaction_detail", None)
                    .await
            }
        }
    }

    async fn bar_counts_since(&self, since: NaiveDate) -> Result<Vec<DailyCount>, StoreError> {
        self.daily_counts(
            r#"
            SELECT trade_date, COUNT(*) FROM stock_daily_data
            WHERE trade_date >= ?
            GROUP BY trade_date
            ORDER BY trade_date DESC
            "#,
            since,
        )
        .await
    }

    async fn tick_counts_since(&self, since: NaiveDate) -> Result<Vec<DailyCount>, StoreError> {
        self.daily_counts(
            r#"
            SELECT trade_date, COUNT(*) FROM stock_transaction_detail
            WHERE trade_date >= ?
            GROUP BY trade_date
            ORDER BY trade_date DESC
            "#,
            since,
        )
        .await
    }

    /// # Summary
    /// 某交易日的活跃证券排行。
    ///
    /// # Logic
    /// SQLite 降序排序时 NULL 排在最后，并列时按证券代码升序。
    async fn top_bars(
        &self,
        date: NaiveDate,
        by: BarRanking,
        limit: usize,
    ) -> Result<Vec<DailyBar>, StoreError> {
        let sql = match by {
            BarRanking::Volume => {
                r#"
                SELECT symbol, trade_date, open, high, low, close, volume, amount, pct_change
                FROM stock_daily_data
                WHERE trade_date = ?
                ORDER BY volume DESC, symbol ASC
                LIMIT ?
                "#
            }
            BarRanking::Amount => {
                r#"
                SELECT symbol, trade_date, open, high, low, close, volume, amount, pct_change
                FROM stock_daily_data
                WHERE trade_date = ?
                ORDER BY amount DESC, symbol ASC
                LIMIT ?
                "#
            }
        };
        type RankedRow = (
            String,
            NaiveDate,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
        );
        let rows = sqlx::query_as::<_, RankedRow>(sql)
            .bind(date)
            .bind(to_limit(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|r| bar_from_row(r.0, (r.1, r.2, r.3, r.4, r.5, r.6, r.7, r.8)))
            .collect())
    }

    /// # Summary
    /// 汇总日线覆盖报告。
    ///
    /// # Logic
    /// 1. 总条数、证券数、首尾交易日与各字段有效条数在一次扫描内完成。
    /// 2. 交易所分布关联证券列表，列表缺失的代码按前缀推断。
    /// 3. 年度分布按 `trade_date` 的年份分组，降序。
    async fn coverage(&self) -> Result<CoverageReport, StoreError> {
        type TotalsRow = (
            i64,
            i64,
            Option<NaiveDate>,
            Option<NaiveDate>,
            i64,
            i64,
            i64,
            i64,
            i64,
        );
        let totals = sqlx::query_as::<_, TotalsRow>(
            r#"
            SELECT
                COUNT(*),
                COUNT(DISTINCT symbol),
                MIN(trade_date),
                MAX(trade_date),
                COUNT(CASE WHEN open > 0 THEN 1 END),
                COUNT(CASE WHEN high > 0 THEN 1 END),
                COUNT(CASE WHEN low > 0 THEN 1 END),
                COUNT(CASE WHEN close > 0 THEN 1 END),
                COUNT(CASE WHEN volume > 0 THEN 1 END)
            FROM stock_daily_data
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let exchange_sql = format!(
            r#"
            SELECT {exchange} AS market, COUNT(DISTINCT d.symbol), COUNT(*),
                MIN(d.trade_date), MAX(d.trade_date)
            FROM stock_daily_data d
            LEFT JOIN stock_info s ON d.symbol = s.symbol
            GROUP BY market
            ORDER BY market ASC
            "#,
            exchange = EXCHANGE_OF_BAR
        );
        let exchange_rows =
            sqlx::query_as::<_, (String, i64, i64, NaiveDate, NaiveDate)>(&exchange_sql)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        let exchanges = exchange_rows
            .into_iter()
            .map(|(exchange, symbols, bars, first_date, last_date)| {
                Ok(ExchangeCoverage {
                    exchange: exchange.parse::<Exchange>().map_err(StoreError::Corrupt)?,
                    symbols,
                    bars,
                    first_date,
                    last_date,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let year_rows = sqlx::query_as::<_, (i64, i64, i64)>(
            r#"
            SELECT CAST(strftime('%Y', trade_date) AS INTEGER) AS year,
                COUNT(DISTINCT symbol), COUNT(*)
            FROM stock_daily_data
            GROUP BY year
            ORDER BY year DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let years = year_rows
            .into_iter()
            .map(|(year, symbols, bars)| {
                let year = i32::try_from(year)
                    .map_err(|_| StoreError::Corrupt(format!("year out of range: {}", year)))?;
                Ok(YearCoverage {
                    year,
                    symbols,
                    bars,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(CoverageReport {
            total_bars: totals.0,
            symbols: totals.1,
            first_date: totals.2,
            last_date: totals.3,
            exchanges,
            years,
            valid: FieldValidity {
                open: totals.4,
                high: totals.5,
                low: totals.6,
                close: totals.7,
                volume: totals.8,
            },
        })
    }

    async fn append_audit_log(
        &self,
        level: AuditLevel,
        message: &str,
        component: &str,
        operation: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO system_log (level, message, module, function, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(level.as_str())
        .bind(message)
        .bind(component)
        .bind(operation)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn recent_audit_logs(
        &self,
        level: Option<AuditLevel>,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        type LogRow = (i64, String, String, String, String, DateTime<Utc>);
        let query = match level {
            Some(level) => sqlx::query_as::<_, LogRow>(
                r#"
                SELECT id, level, message, module, function, created_at
                FROM system_log
                WHERE level = ?
                ORDER BY id DESC
                LIMIT ?
                "#,
            )
            .bind(level.as_str()),
            None => sqlx::query_as::<_, LogRow>(
                r#"
                SELECT id, level, message, module, function, created_at
                FROM system_log
                ORDER BY id DESC
                LIMIT ?
                "#,
            ),
        };
        let rows = query
            .bind(to_limit(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter()
            .map(|(id, level, message, component, operation, created_at)| {
                Ok(AuditRecord {
                    id,
                    level: level.parse().map_err(StoreError::Corrupt)?,
                    message,
                    component,
                    operation,
                    created_at,
                })
            })
            .collect()
    }
}

impl SqliteMarketStore {
    /// # Summary
    /// 读取某证券某日的成交明细，按成交时间与序号排序。
    pub async fn load_ticks(
        &self,
        symbol: &str,
        trade_date: NaiveDate,
    ) -> Result<Vec<TickRecord>, StoreError> {
        let rows = sqlx::query_as::<_, (NaiveTime, i64, f64, f64, Option<f64>, String)>(
            r#"
            SELECT trade_time, seq, price, volume, amount, side
            FROM stock_transaction_detail
            WHERE symbol = ? AND trade_date = ?
            ORDER BY trade_time ASC, seq ASC
            "#,
        )
        .bind(symbol)
        .bind(trade_date)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|(trade_time, seq, price, volume, amount, side)| {
                let seq = u32::try_from(seq)
                    .map_err(|_| StoreError::Corrupt(format!("tick seq out of range: {}", seq)))?;
                let side = side.parse::<TradeSide>().unwrap_or(TradeSide::Unknown);
                Ok(TickRecord {
                    symbol: symbol.to_string(),
                    trade_date,
                    trade_time,
                    seq,
                    price,
                    volume,
                    amount,
                    side,
                })
            })
            .collect()
    }

    /// # Summary
    /// 读取某证券在日期区间内的日线，按日期升序。
    pub async fn load_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>, StoreError> {
        let rows = sqlx::query_as::<_, BarRow>(
            r#"
            SELECT trade_date, open, high, low, close, volume, amount, pct_change
            FROM stock_daily_data
            WHERE symbol = ? AND trade_date >= ? AND trade_date <= ?
            ORDER BY trade_date ASC
            "#,
        )
        .bind(symbol)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|r| bar_from_row(symbol.to_string(), r))
            .collect())
    }
}
