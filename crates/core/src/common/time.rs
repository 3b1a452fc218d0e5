use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, Utc};
use std::sync::RwLock;

/// 沪深市场所在时区相对 UTC 的偏移秒数 (UTC+8，无夏令时)
const MARKET_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// 返回沪深市场的本地时区偏移。
pub fn market_offset() -> FixedOffset {
    FixedOffset::east_opt(MARKET_UTC_OFFSET_SECS).unwrap_or(Utc.fix())
}

/// # Summary
/// 时间供给器接口，用于隔离物理系统时钟。
/// 调度器的交易日与交易时段判断必须通过此接口获取当前时间。
pub trait TimeProvider: Send + Sync {
    /// 获取当前 UTC 时间
    fn now(&self) -> DateTime<Utc>;

    /// # Summary
    /// 获取市场本地时间（不带时区的墙上时间）。
    ///
    /// # Logic
    /// 1. 读取当前 UTC 时间。
    /// 2. 转换到 UTC+8 并去掉时区信息。
    fn market_now(&self) -> NaiveDateTime {
        self.now().with_timezone(&market_offset()).naive_local()
    }
}

/// # Summary
/// 针对实盘运行的真实时钟，直接返回操作系统当前时间。
pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// # Summary
/// 测试专用虚拟时钟，允许主动拨快或回退时间。
///
/// # Invariants
/// - 并发安全：内部利用 `RwLock` 提供多线程安全的读写。
pub struct FakeClockProvider {
    current_time: RwLock<DateTime<Utc>>,
}

impl FakeClockProvider {
    /// 使用指定的初始时间创建虚拟时钟
    pub fn new(initial_time: DateTime<Utc>) -> Self {
        Self {
            current_time: RwLock::new(initial_time),
        }
    }

    /// # Summary
    /// 以市场本地墙上时间创建虚拟时钟。
    ///
    /// # Arguments
    /// * `local`: UTC+8 下的本地时间。
    pub fn at_market_time(local: NaiveDateTime) -> Self {
        Self::new(local.and_utc() - chrono::Duration::seconds(i64::from(MARKET_UTC_OFFSET_SECS)))
    }

    /// 强制修改时钟的当前时间
    pub fn set_time(&self, new_time: DateTime<Utc>) {
        let mut time = self.current_time.write().unwrap_or_else(|e| e.into_inner());
        *time = new_time;
    }

    /// 将时钟向前拨动指定时长
    pub fn advance(&self, delta: chrono::Duration) {
        let mut time = self.current_time.write().unwrap_or_else(|e| e.into_inner());
        *time += delta;
    }
}

impl TimeProvider for FakeClockProvider {
    fn now(&self) -> DateTime<Utc> {
        *self.current_time.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_fake_clock_market_time_round_trip() {
        let local = NaiveDate::from_ymd_opt(2024, 3, 8)
            .and_then(|d| d.and_hms_opt(9, 30, 0))
            .unwrap();
        let clock = FakeClockProvider::at_market_time(local);
        assert_eq!(clock.market_now(), local);
        assert_eq!(clock.now().format("%H:%M").to_string(), "01:30");

        clock.advance(chrono::Duration::minutes(90));
        assert_eq!(clock.market_now().format("%H:%M").to_string(), "11:00");
    }
}
