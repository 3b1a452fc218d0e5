use crate::resolver::{FallbackResolver, FetchRequest};
use qfin_core::acquire::entity::{FetchFailure, FetchOutcome, WorkUnit};
use qfin_core::config::AcquisitionConfig;
use qfin_core::market::error::ErrorClass;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{error, warn};

/// # Summary
/// 重试策略：最大尝试次数与指数退避基数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl From<&AcquisitionConfig> for RetryPolicy {
    fn from(config: &AcquisitionConfig) -> Self {
        Self {
            max_attempts: config.max_retry_count,
            base_delay: config.backoff_base(),
        }
    }
}

impl RetryPolicy {
    /// # Summary
    /// 第 `retry` 次重试 (从 1 开始) 之前的等待时长：`base × 2^(retry-1)`。
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exp)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// # Summary
/// 带重试的采集执行器。
///
/// # Invariants
/// - 每次执行恰好产出一个 `FetchOutcome`，从不返回错误或 panic。
/// - 只有瞬时故障会重试，永久故障立即失败。
/// - 同一请求内，以永久故障失败的数据源在后续重试中不再调用。
pub struct FetchExecutor {
    resolver: FallbackResolver,
    policy: RetryPolicy,
}

impl FetchExecutor {
    pub fn new(resolver: FallbackResolver, policy: RetryPolicy) -> Self {
        Self { resolver, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// # Summary
    /// 执行一个工作单元。
    ///
    /// # Arguments
    /// * `unit`: 工作单元。
    ///
    /// # Returns
    /// `Data` / `Empty` / `Failed` 三者之一。
    pub async fn execute(&self, unit: &WorkUnit) -> FetchOutcome {
        self.run(FetchRequest::Unit(unit)).await
    }

    /// 拉取证券列表
    pub async fn execute_listing(&self) -> FetchOutcome {
        self.run(FetchRequest::Listing).await
    }

    /// # Summary
    /// 重试循环。
    ///
    /// # Logic
    /// 1. 通过回退解析器发起一轮请求，跳过此前已永久失败的数据源。
    /// 2. 成功时按记录是否为空产出 `Data` 或 `Empty`。
    /// 3. 瞬时失败且未用尽次数时记下本轮永久失败的数据源，按指数退避等待后重试。
    /// 4. 否则产出 `Failed`，携带分类、尝试次数与所有尝试过的数据源。
    async fn run(&self, request: FetchRequest<'_>) -> FetchOutcome {
        let max_attempts = self.policy.attempts();
        let mut excluded: HashSet<String> = HashSet::new();
        let mut providers: Vec<String> = Vec::new();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.resolver.resolve_excluding(request, &excluded).await {
                Ok((records, provider)) => return FetchOutcome::from_records(records, provider),
                Err(err) => {
                    for name in err.providers {
                        if !providers.contains(&name) {
                            providers.push(name);
                        }
                    }
                    if err.class == ErrorClass::Transient && attempt < max_attempts {
                        let delay = self.policy.backoff_for(attempt);
                        warn!(
                            request = %request.label(),
                            attempt,
                            max_attempts,
                            delay_ms = delay.as_millis(),
                            rejected = ?err.rejected,
                            error = %err.message,
                            "Transient failure, retrying"
                        );
                        excluded.extend(err.rejected);
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    let mut message = err.message;
                    if !excluded.is_empty() {
                        let mut skipped: Vec<&str> = excluded.iter().map(String::as_str).collect();
                        skipped.sort_unstable();
                        message = format!(
                            "{}; skipped after permanent failure: {}",
                            message,
                            skipped.join(", ")
                        );
                    }
                    error!(
                        request = %request.label(),
                        providers = ?providers,
                        attempts = attempt,
                        class = ?err.class,
                        error = %message,
                        "Fetch failed"
                    );
                    return FetchOutcome::Failed(FetchFailure {
                        class: err.class,
                        message,
                        attempts: attempt,
                        providers,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(4), Duration::from_secs(4));
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            base_delay: Duration::ZERO,
        };
        assert_eq!(policy.attempts(), 1);
    }
}
