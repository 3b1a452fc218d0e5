//! 行情数据源实现：东方财富与 Tushare，以及字段规范化。

pub mod eastmoney;
mod http;
pub mod normalize;
pub mod tushare;

pub use http::install_crypto_provider;

use eastmoney::EastMoneyProvider;
use qfin_core::config::{DataSource, FeedConfig};
use qfin_core::market::error::MarketError;
use qfin_core::market::port::MarketDataProvider;
use std::sync::Arc;
use tracing::info;
use tushare::TushareProvider;

/// # Summary
/// 按配置的数据源顺序构造提供者链。
///
/// # Logic
/// 1. 首选数据源在前，备用数据源按配置顺序追加，重复项只保留一次。
/// 2. Tushare 需要 token，缺失时返回错误。
///
/// # Arguments
/// * `config`: 数据源配置。
///
/// # Returns
/// 按尝试顺序排列的提供者列表。
pub fn build_providers(
    config: &FeedConfig,
) -> Result<Vec<Arc<dyn MarketDataProvider>>, MarketError> {
    let mut providers: Vec<Arc<dyn MarketDataProvider>> = Vec::new();
    for source in config.provider_chain() {
        let provider: Arc<dyn MarketDataProvider> = match source {
            DataSource::EastMoney => Arc::new(EastMoneyProvider::new(config.timeout())?),
            DataSource::Tushare => {
                let token = config
                    .tushare_token
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| {
                        MarketError::InvalidRequest("feed.tushare_token is required".to_string())
                    })?;
                Arc::new(TushareProvider::new(token, config.timeout())?)
            }
        };
        providers.push(provider);
    }
    info!(
        providers = ?providers.iter().map(|p| p.name().to_string()).collect::<Vec<_>>(),
        "Provider chain ready"
    );
    Ok(providers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qfin_core::config::AppConfig;

    #[test]
    fn test_build_chain_in_order() {
        let mut feed = AppConfig::default().feed;
        feed.fallback = vec![DataSource::Tushare, DataSource::EastMoney];
        feed.tushare_token = Some("token".to_string());

        let providers = build_providers(&feed).unwrap();
        let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["eastmoney", "tushare"]);
    }

    #[test]
    fn test_tushare_without_token_fails() {
        let mut feed = AppConfig::default().feed;
        feed.source = DataSource::Tushare;
        assert!(matches!(
            build_providers(&feed),
            Err(MarketError::InvalidRequest(_))
        ));
    }
}
