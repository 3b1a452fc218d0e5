//! 采集管线：限流器、回退解析器、重试执行器与批量导入器。

pub mod executor;
pub mod importer;
pub mod limiter;
pub mod resolver;
pub mod shutdown;

pub use executor::{FetchExecutor, RetryPolicy};
pub use importer::{BatchImporter, ImportError, ImportOptions, Progress};
pub use limiter::RateLimiter;
pub use resolver::{FallbackResolver, FetchRequest, ResolveError};
pub use shutdown::{Shutdown, ShutdownSignal};

use qfin_core::config::AcquisitionConfig;
use qfin_core::market::port::MarketDataProvider;
use qfin_core::store::port::MarketStore;
use std::sync::Arc;

/// # Summary
/// 按采集配置组装完整管线。
///
/// # Logic
/// 1. 以 `request_delay` 构造共享限流器。
/// 2. 数据源链 → 回退解析器 → 重试执行器 → 批量导入器。
///
/// # Arguments
/// * `providers`: 按尝试顺序排列的数据源。
/// * `store`: 存储实现。
/// * `config`: 采集配置。
pub fn build_importer(
    providers: Vec<Arc<dyn MarketDataProvider>>,
    store: Arc<dyn MarketStore>,
    config: &AcquisitionConfig,
) -> BatchImporter {
    let limiter = Arc::new(RateLimiter::new(config.request_delay()));
    let resolver = FallbackResolver::new(providers, limiter);
    let executor = Arc::new(FetchExecutor::new(resolver, RetryPolicy::from(config)));
    BatchImporter::new(executor, store, ImportOptions::from(config))
}
