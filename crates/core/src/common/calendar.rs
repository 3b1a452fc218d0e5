use super::DateRange;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};

/// # Summary
/// 沪深交易日历与交易时段。
///
/// # Invariants
/// - 交易日仅按周一至周五判断，不含节假日表。
/// - 连续竞价时段分上午、下午两段，均为闭区间。
/// - 成交明细的有效时间窗口从开盘集合竞价 (`auction_open`) 开始。
#[derive(Debug, Clone)]
pub struct TradingCalendar {
    // 开盘集合竞价开始时间
    pub auction_open: NaiveTime,
    // 上午连续竞价时段
    pub morning: (NaiveTime, NaiveTime),
    // 下午连续竞价时段
    pub afternoon: (NaiveTime, NaiveTime),
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self {
            auction_open: hm(9, 15),
            morning: (hm(9, 30), hm(11, 30)),
            afternoon: (hm(13, 0), hm(15, 0)),
        }
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

impl TradingCalendar {
    /// # Summary
    /// 判断是否为交易日。
    ///
    /// # Logic
    /// 1. 周六、周日不是交易日。
    /// 2. 其余日期一律视为交易日（节假日未纳入）。
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// # Summary
    /// 判断市场本地时间是否处于连续竞价时段内。
    ///
    /// # Logic
    /// 1. 非交易日直接返回 false。
    /// 2. 时间落在上午或下午时段（含端点）返回 true。
    ///
    /// # Arguments
    /// * `local`: 市场本地墙上时间。
    pub fn is_trading_time(&self, local: NaiveDateTime) -> bool {
        if !self.is_trading_day(local.date()) {
            return false;
        }
        let t = local.time();
        (self.morning.0 <= t && t <= self.morning.1)
            || (self.afternoon.0 <= t && t <= self.afternoon.1)
    }

    /// # Summary
    /// 判断成交时间是否落在成交明细的有效窗口内。
    ///
    /// # Logic
    /// 窗口为 [集合竞价开始, 上午收盘] 与 [下午开盘, 下午收盘]。
    pub fn is_tick_time(&self, time: NaiveTime) -> bool {
        (self.auction_open <= time && time <= self.morning.1)
            || (self.afternoon.0 <= time && time <= self.afternoon.1)
    }

    /// # Summary
    /// 枚举日期范围内的所有交易日。
    ///
    /// # Returns
    /// 升序排列的交易日列表。
    pub fn trading_days(&self, range: DateRange) -> Vec<NaiveDate> {
        range.days().filter(|d| self.is_trading_day(*d)).collect()
    }
}
