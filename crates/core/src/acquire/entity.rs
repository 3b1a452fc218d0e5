use crate::common::{DataKind, DateRange};
use crate::market::entity::{DailyBar, SymbolInfo, TickRecord};
use crate::market::error::ErrorClass;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// # Summary
/// 一个采集工作单元：一只证券 × 一个日期范围 × 一种数据。
///
/// # Invariants
/// - 成交明细单元的 `range` 恰为单个交易日。
/// - 每次导入运行中只被消费一次，不持久化。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub symbol: String,
    pub kind: DataKind,
    pub range: DateRange,
}

impl WorkUnit {
    /// 日线单元，覆盖整个日期范围
    pub fn bars(symbol: impl Into<String>, range: DateRange) -> Self {
        Self {
            symbol: symbol.into(),
            kind: DataKind::Bars,
            range,
        }
    }

    /// 成交明细单元，覆盖单个交易日
    pub fn ticks(symbol: impl Into<String>, trade_date: chrono::NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            kind: DataKind::Ticks,
            range: DateRange::single(trade_date),
        }
    }
}

/// # Summary
/// 规范化后的记录集合。
#[derive(Debug, Clone, PartialEq)]
pub enum Records {
    Listing(Vec<SymbolInfo>),
    Bars(Vec<DailyBar>),
    Ticks(Vec<TickRecord>),
}

impl Records {
    pub fn len(&self) -> usize {
        match self {
            Records::Listing(v) => v.len(),
            Records::Bars(v) => v.len(),
            Records::Ticks(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// # Summary
/// 一次采集失败的完整上下文。
#[derive(Debug, Clone, PartialEq)]
pub struct FetchFailure {
    // 错误分类
    pub class: ErrorClass,
    // 最后一次失败的描述
    pub message: String,
    // 实际尝试次数
    pub attempts: u32,
    // 最后一轮中依次尝试过的数据源
    pub providers: Vec<String>,
}

/// # Summary
/// 工作单元的执行结果，三选一的标签变体。
///
/// # Invariants
/// - `Data` 中的记录集合非空，空集合一律表达为 `Empty`。
/// - 调用方按标签分支，不依赖捕获特定错误类型。
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    // 成功且有数据
    Data { records: Records, provider: String },
    // 数据源明确表示无数据
    Empty { provider: String },
    // 失败
    Failed(FetchFailure),
}

impl FetchOutcome {
    /// # Summary
    /// 由数据源返回的记录构造结果，空集合归为 `Empty`。
    pub fn from_records(records: Records, provider: impl Into<String>) -> Self {
        let provider = provider.into();
        if records.is_empty() {
            FetchOutcome::Empty { provider }
        } else {
            FetchOutcome::Data { records, provider }
        }
    }

    /// 是否为成功（含空结果）
    pub fn is_success(&self) -> bool {
        !matches!(self, FetchOutcome::Failed(_))
    }

    /// 应答的数据源名称，失败时为空
    pub fn provider(&self) -> Option<&str> {
        match self {
            FetchOutcome::Data { provider, .. } | FetchOutcome::Empty { provider } => {
                Some(provider)
            }
            FetchOutcome::Failed(_) => None,
        }
    }
}

/// # Summary
/// 一次批量导入运行的统计。
///
/// # Invariants
/// - 成功、失败集合自动去重；同一证券可以同时出现在两个集合中。
/// - 只在运行期间增量构建，运行结束时作为返回值交出，不抛出。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    // 运行标识
    pub run_id: String,
    // 参与运行的证券数
    pub total_symbols: usize,
    // 计划执行的工作单元数
    pub total_units: usize,
    // 实际执行完成的工作单元数
    pub processed_units: usize,
    // 成功但无数据的单元数
    pub empty_units: usize,
    // 至少有一个单元成功的证券
    pub succeeded: BTreeSet<String>,
    // 至少有一个单元失败的证券
    pub failed: BTreeSet<String>,
    // 每种数据获取到的记录条数
    pub records: BTreeMap<DataKind, usize>,
    // 每种数据是否已成功落库
    pub persisted: BTreeMap<DataKind, bool>,
    // 运行是否被中途取消
    pub cancelled: bool,
}

impl RunStatistics {
    pub fn new(run_id: impl Into<String>, total_symbols: usize) -> Self {
        Self {
            run_id: run_id.into(),
            total_symbols,
            ..Default::default()
        }
    }

    /// # Summary
    /// 将一个单元的执行结果并入统计。
    ///
    /// # Logic
    /// 1. 已处理单元数加一。
    /// 2. 成功（含空结果）计入成功集合，有数据时累加记录条数。
    /// 3. 失败计入失败集合。
    pub fn record(&mut self, unit: &WorkUnit, outcome: &FetchOutcome) {
        self.processed_units += 1;
        match outcome {
            FetchOutcome::Data { records, .. } => {
                self.succeeded.insert(unit.symbol.clone());
                *self.records.entry(unit.kind).or_default() += records.len();
            }
            FetchOutcome::Empty { .. } => {
                self.succeeded.insert(unit.symbol.clone());
                self.empty_units += 1;
            }
            FetchOutcome::Failed(_) => {
                self.failed.insert(unit.symbol.clone());
            }
        }
    }

    /// 某种数据获取到的记录条数
    pub fn records_of(&self, kind: DataKind) -> usize {
        self.records.get(&kind).copied().unwrap_or(0)
    }

    /// 未执行（因取消而跳过）的单元数
    pub fn skipped_units(&self) -> usize {
        self.total_units.saturating_sub(self.processed_units)
    }
}
