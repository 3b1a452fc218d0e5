use crate::limiter::RateLimiter;
use qfin_core::acquire::entity::{Records, WorkUnit};
use qfin_core::common::DataKind;
use qfin_core::market::error::{ErrorClass, MarketError};
use qfin_core::market::port::MarketDataProvider;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// # Summary
/// 一次逻辑请求：证券列表或一个工作单元。
#[derive(Debug, Clone, Copy)]
pub enum FetchRequest<'a> {
    Listing,
    Unit(&'a WorkUnit),
}

impl FetchRequest<'_> {
    /// 日志中使用的请求标识
    pub fn label(&self) -> String {
        match self {
            FetchRequest::Listing => "listing".to_string(),
            FetchRequest::Unit(unit) => format!("{} {} {}", unit.kind, unit.symbol, unit.range),
        }
    }
}

/// # Summary
/// 所有数据源均失败时的汇总错误。
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveError {
    // 任一数据源为瞬时故障时为 Transient
    pub class: ErrorClass,
    pub message: String,
    // 按尝试顺序排列
    pub providers: Vec<String>,
    // 本轮以永久故障失败的数据源
    pub rejected: Vec<String>,
}

/// # Summary
/// 按配置顺序依次尝试数据源的回退解析器。
///
/// # Invariants
/// - 第一个返回 `Ok`（包括空结果）的数据源即为应答者，后续数据源不再调用。
/// - 每次数据源调用前先获取该数据源的限流时隙。
pub struct FallbackResolver {
    providers: Vec<Arc<dyn MarketDataProvider>>,
    limiter: Arc<RateLimiter>,
}

impl FallbackResolver {
    pub fn new(providers: Vec<Arc<dyn MarketDataProvider>>, limiter: Arc<RateLimiter>) -> Self {
        Self { providers, limiter }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    async fn call(
        provider: &dyn MarketDataProvider,
        request: FetchRequest<'_>,
    ) -> Result<Records, MarketError> {
        match request {
            FetchRequest::Listing => provider.fetch_listing().await.map(Records::Listing),
            FetchRequest::Unit(unit) => match unit.kind {
                DataKind::Bars => provider
                    .fetch_bars(&unit.symbol, unit.range.start(), unit.range.end())
                    .await
                    .map(Records::Bars),
                DataKind::Ticks => provider
                    .fetch_ticks(&unit.symbol, unit.range.start())
                    .await
                    .map(Records::Ticks),
            },
        }
    }

    /// # Summary
    /// 依次向各数据源发起请求，返回第一个成功的结果。
    ///
    /// # Logic
    /// 1. 按顺序取数据源，等待其限流时隙后调用。
    /// 2. 成功（含空结果）立即返回记录与数据源名称。
    /// 3. 失败则记录错误并尝试下一个数据源。
    /// 4. 全部失败时汇总：任一失败为瞬时故障则整体为瞬时故障。
    ///
    /// # Arguments
    /// * `request`: 逻辑请求。
    ///
    /// # Returns
    /// 成功返回 `(记录, 数据源名称)`，全部失败返回 `ResolveError`。
    pub async fn resolve(
        &self,
        request: FetchRequest<'_>,
    ) -> Result<(Records, String), ResolveError> {
        self.resolve_excluding(request, &HashSet::new()).await
    }

    /// # Summary
    /// 与 `resolve` 相同，但跳过 `excluded` 中的数据源。
    ///
    /// # Logic
    /// 被跳过的数据源不占用限流时隙，也不计入 `providers`。
    /// 全部数据源都被跳过时按无可用数据源处理，返回永久故障。
    pub async fn resolve_excluding(
        &self,
        request: FetchRequest<'_>,
        excluded: &HashSet<String>,
    ) -> Result<(Records, String), ResolveError> {
        let mut tried = Vec::with_capacity(self.providers.len());
        let mut rejected = Vec::new();
        let mut errors = Vec::with_capacity(self.providers.len());
        let mut any_transient = false;

        for provider in &self.providers {
            let name = provider.name();
            if excluded.contains(name) {
                debug!(provider = name, request = %request.label(), "Provider skipped");
                continue;
            }
            self.limiter.acquire(name).await;
            tried.push(name.to_string());

            match Self::call(provider.as_ref(), request).await {
                Ok(records) => {
                    debug!(
                        provider = name,
                        request = %request.label(),
                        count = records.len(),
                        "Provider answered"
                    );
                    return Ok((records, name.to_string()));
                }
                Err(e) => {
                    warn!(
                        provider = name,
                        request = %request.label(),
                        error = %e,
                        "Provider failed"
                    );
                    if e.is_transient() {
                        any_transient = true;
                    } else {
                        rejected.push(name.to_string());
                    }
                    errors.push(format!("{}: {}", name, e));
                }
            }
        }

        if tried.is_empty() {
            return Err(ResolveError {
                class: ErrorClass::Permanent,
                message: "no providers available".to_string(),
                providers: tried,
                rejected,
            });
        }

        Err(ResolveError {
            class: if any_transient {
                ErrorClass::Transient
            } else {
                ErrorClass::Permanent
            },
            message: errors.join("; "),
            providers: tried,
            rejected,
        })
    }
}
