//! 行情采集系统的领域核心：实体、错误、端口 (Trait) 与配置模型。
//!
//! 本 crate 不包含任何 IO 实现，具体的数据源、存储与调度分别位于
//! `qfin-feed`、`qfin-store`、`qfin-pipeline` 与 `qfin-scheduler`。

pub mod common;
pub mod config;

pub mod market {
    pub mod entity;
    pub mod error;
    pub mod port;
}

pub mod store {
    pub mod error;
    pub mod port;
}

pub mod acquire {
    pub mod entity;
}

#[cfg(feature = "test-utils")]
pub mod testing;
