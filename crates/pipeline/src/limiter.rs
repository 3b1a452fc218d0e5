use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// # Summary
/// 按数据源分桶的请求间隔限流器。
///
/// # Invariants
/// - 同一数据源相邻两次调用的开始时间间隔不小于 `min_interval`，
///   无论调用来自哪个并发任务。
/// - 不同数据源互不阻塞。
pub struct RateLimiter {
    min_interval: Duration,
    // 每个数据源下一次允许调用的时刻
    next_slot: DashMap<String, Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: DashMap::new(),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// # Summary
    /// 为数据源预约一个调用时隙并等待其到来。
    ///
    /// # Logic
    /// 1. 在分片锁内读取该数据源的下一个时隙，取其与当前时刻的较晚者作为本次时隙。
    /// 2. 将下一个时隙推后 `min_interval`，随即释放锁。
    /// 3. 在锁外睡眠至本次时隙。
    ///
    /// # Arguments
    /// * `provider`: 数据源名称。
    pub async fn acquire(&self, provider: &str) {
        if self.min_interval.is_zero() {
            return;
        }
        let now = Instant::now();
        let slot = {
            let mut next = self.next_slot.entry(provider.to_string()).or_insert(now);
            let slot = (*next).max(now);
            *next = slot + self.min_interval;
            slot
        };
        if slot > now {
            trace!(provider, wait_ms = (slot - now).as_millis(), "Waiting for rate limit slot");
            tokio::time::sleep_until(slot).await;
        }
    }
}
