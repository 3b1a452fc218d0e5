use chrono::{Days, NaiveDateTime, NaiveTime};
use std::time::Duration;
use tokio::time::Instant;

/// # Summary
/// 触发规则。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    // 每天在市场本地时间的某一时刻触发
    DailyAt(NaiveTime),
    // 按单调时钟固定间隔触发
    Every(Duration),
}

/// 下一次到期的时间点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Due {
    Wall(NaiveDateTime),
    Mono(Instant),
}

/// # Summary
/// 单个触发器的到期状态机。
///
/// # Invariants
/// - 每日触发器在到期时刻之后的第一次检查时触发，每天至多一次。
/// - 进程启动时已过当天时刻，首次触发顺延到次日。
/// - 间隔触发器只依赖单调时钟，不受墙上时间跳变影响。
#[derive(Debug, Clone)]
pub struct Trigger {
    schedule: Schedule,
    due: Due,
}

/// `now` 之后的下一个 `at` 时刻，`inclusive` 时恰好等于 `now` 也算当天
fn next_wall(at: NaiveTime, now: NaiveDateTime, inclusive: bool) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now || (inclusive && today == now) {
        return today;
    }
    now.date()
        .checked_add_days(Days::new(1))
        .map(|d| d.and_time(at))
        .unwrap_or(today)
}

impl Trigger {
    /// # Summary
    /// 以当前时刻初始化触发器。
    ///
    /// # Arguments
    /// * `schedule`: 触发规则。
    /// * `local`: 市场本地墙上时间。
    /// * `mono`: 单调时钟当前值。
    pub fn new(schedule: Schedule, local: NaiveDateTime, mono: Instant) -> Self {
        let due = match schedule {
            Schedule::DailyAt(at) => Due::Wall(next_wall(at, local, true)),
            Schedule::Every(period) => Due::Mono(mono + period),
        };
        Self { schedule, due }
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    /// 每日触发器的下一次到期时间，间隔触发器返回 None
    pub fn next_wall_due(&self) -> Option<NaiveDateTime> {
        match self.due {
            Due::Wall(at) => Some(at),
            Due::Mono(_) => None,
        }
    }

    pub fn is_due(&self, local: NaiveDateTime, mono: Instant) -> bool {
        match self.due {
            Due::Wall(at) => local >= at,
            Due::Mono(at) => mono >= at,
        }
    }

    /// # Summary
    /// 触发后推进到下一次到期时间。
    ///
    /// # Logic
    /// 1. 每日触发器：推进到严格晚于当前时间的下一个时刻，错过的天数不补发。
    /// 2. 间隔触发器：从当前单调时间起再加一个周期。
    pub fn advance(&mut self, local: NaiveDateTime, mono: Instant) {
        self.due = match self.schedule {
            Schedule::DailyAt(at) => Due::Wall(next_wall(at, local, false)),
            Schedule::Every(period) => Due::Mono(mono + period),
        };
    }
}
