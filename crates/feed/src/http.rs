use qfin_core::market::error::MarketError;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// # Summary
/// 安装进程级 rustls 加密后端 (ring)。
///
/// # Logic
/// reqwest 以 `rustls-no-provider` 方式编译，构建客户端前必须存在默认后端；
/// 已安装时保持不变。
pub fn install_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_some() {
        return;
    }
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("Crypto provider was installed concurrently");
    }
}

/// 构建带超时与浏览器 UA 的 HTTP 客户端
pub(crate) fn build_client(timeout: Duration) -> Result<Client, MarketError> {
    install_crypto_provider();
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| MarketError::Network(format!("failed to build HTTP client: {}", e)))
}

/// # Summary
/// 将 HTTP 状态码映射为错误。
///
/// # Logic
/// 429 → 限流；5xx → 上游故障；401/403 → 拒绝；其余 4xx → 非法请求；
/// 其他非 2xx 状态按网络错误处理。
pub(crate) fn status_error(status: StatusCode) -> Option<MarketError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::TOO_MANY_REQUESTS => MarketError::RateLimited(format!("HTTP {}", status)),
        s if s.is_server_error() => MarketError::Upstream { status: s.as_u16() },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            MarketError::Rejected(format!("HTTP {}", status))
        }
        s if s.is_client_error() => MarketError::InvalidRequest(format!("HTTP {}", s)),
        s => MarketError::Network(format!("unexpected HTTP {}", s)),
    })
}

/// # Summary
/// 将 reqwest 传输层错误映射为错误。
pub(crate) fn transport_error(e: reqwest::Error) -> MarketError {
    if e.is_timeout() {
        MarketError::Timeout(e.to_string())
    } else if e.is_decode() {
        MarketError::Parse(e.to_string())
    } else if let Some(mapped) = e.status().and_then(status_error) {
        mapped
    } else {
        MarketError::Network(e.to_string())
    }
}

/// 校验状态码后将响应体解析为 JSON
pub(crate) async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, MarketError> {
    if let Some(err) = status_error(resp.status()) {
        return Err(err);
    }
    resp.json::<T>().await.map_err(transport_error)
}
