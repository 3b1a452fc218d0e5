//! 日历感知的采集调度：触发器状态机、任务处理与协作式节拍循环。

pub mod job;
pub mod scheduler;
pub mod trigger;

pub use job::{JobError, JobKind, JobReport, SkipReason};
pub use scheduler::Scheduler;
pub use trigger::{Schedule, Trigger};
