use serde::{Deserialize, Serialize};
use thiserror::Error;

/// # Summary
/// 错误分类，决定执行器是否重试。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    // 瞬时故障：网络、超时、限流、上游 5xx，可退避重试
    Transient,
    // 永久故障：非法代码、非法请求、鉴权拒绝、不支持、报文损坏，不重试
    Permanent,
}

/// # Summary
/// 行情数据源错误枚举，处理网络、解析及请求非法等问题。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
/// - "无数据" 不属于错误，数据源以空列表表达。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketError {
    // 网络层错误，包含底层 HTTP 客户端错误信息
    #[error("Network error: {0}")]
    Network(String),
    // 请求超时
    #[error("Request timed out: {0}")]
    Timeout(String),
    // 被数据源限流
    #[error("Rate limited: {0}")]
    RateLimited(String),
    // 上游服务端错误 (5xx)
    #[error("Upstream error: HTTP {status}")]
    Upstream { status: u16 },
    // 非法证券代码
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),
    // 非法请求参数
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    // 鉴权或配额拒绝
    #[error("Rejected by provider: {0}")]
    Rejected(String),
    // 数据源不支持该请求
    #[error("Unsupported request: {0}")]
    Unsupported(String),
    // 报文解析错误
    #[error("Parse error: {0}")]
    Parse(String),
    // 数据源返回的业务错误
    #[error("Provider API error: {0}")]
    Api(String),
}

impl MarketError {
    /// # Summary
    /// 返回错误分类。
    ///
    /// # Logic
    /// 网络、超时、限流与上游 5xx 为瞬时故障，其余为永久故障。
    pub fn class(&self) -> ErrorClass {
        match self {
            MarketError::Network(_)
            | MarketError::Timeout(_)
            | MarketError::RateLimited(_)
            | MarketError::Upstream { .. } => ErrorClass::Transient,
            MarketError::InvalidSymbol(_)
            | MarketError::InvalidRequest(_)
            | MarketError::Rejected(_)
            | MarketError::Unsupported(_)
            | MarketError::Parse(_)
            | MarketError::Api(_) => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}
