use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// # Summary
/// 配置错误，启动阶段致命，进程不得继续运行。
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("Missing required value `{0}`")]
    Missing(&'static str),
}

/// # Summary
/// 可选的行情数据源。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    // 东方财富行情接口（akshare 默认数据源）
    #[serde(alias = "akshare")]
    EastMoney,
    // Tushare Pro，需要 token
    Tushare,
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSource::EastMoney => write!(f, "eastmoney"),
            DataSource::Tushare => write!(f, "tushare"),
        }
    }
}

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub feed: FeedConfig,
    pub acquisition: AcquisitionConfig,
    pub schedule: ScheduleConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    // 首选数据源
    pub source: DataSource,
    // 按顺序尝试的备用数据源
    #[serde(default)]
    pub fallback: Vec<DataSource>,
    pub tushare_token: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    pub max_retry_count: u32,
    pub request_delay_ms: u64,
    pub backoff_base_ms: u64,
    pub concurrency: usize,
    pub chunk_size: usize,
    pub chunk_pause_secs: u64,
    pub intraday_symbol_limit: usize,
    pub default_lookback_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    // 收盘后采集时间 (HH:MM，市场本地时间)
    pub daily_task_time: String,
    // 证券列表刷新时间 (HH:MM，市场本地时间)
    pub listing_refresh_time: String,
    pub intraday_interval_minutes: u64,
    pub tick_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub dir: String,
    pub file_prefix: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: "data/quantitative_finance.db".to_string(),
            },
            feed: FeedConfig {
                source: DataSource::EastMoney,
                fallback: Vec::new(),
                tushare_token: None,
                timeout_secs: 10,
            },
            acquisition: AcquisitionConfig {
                max_retry_count: 3,
                request_delay_ms: 1000,
                backoff_base_ms: 1000,
                concurrency: 1,
                chunk_size: 50,
                chunk_pause_secs: 0,
                intraday_symbol_limit: 100,
                default_lookback_days: 30,
            },
            schedule: ScheduleConfig {
                daily_task_time: "15:30".to_string(),
                listing_refresh_time: "09:00".to_string(),
                intraday_interval_minutes: 30,
                tick_seconds: 60,
            },
            log: LogConfig {
                level: "info".to_string(),
                dir: "logs".to_string(),
                file_prefix: "quantitative_finance.log".to_string(),
            },
        }
    }
}

/// 解析 `HH:MM` 或 `HH:MM:SS` 格式的时间
fn parse_clock(key: &'static str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value.trim(), "%H:%M:%S"))
        .map_err(|e| ConfigError::Invalid {
            key,
            reason: format!("`{}` is not HH:MM ({})", value, e),
        })
}

fn non_zero<T: PartialEq + Default>(key: &'static str, value: T) -> Result<(), ConfigError> {
    if value == T::default() {
        return Err(ConfigError::Invalid {
            key,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

impl FeedConfig {
    /// # Summary
    /// 返回去重后的数据源尝试顺序，首选数据源排在最前。
    pub fn provider_chain(&self) -> Vec<DataSource> {
        let mut chain = vec![self.source];
        for source in &self.fallback {
            if !chain.contains(source) {
                chain.push(*source);
            }
        }
        chain
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AcquisitionConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn chunk_pause(&self) -> Duration {
        Duration::from_secs(self.chunk_pause_secs)
    }
}

impl ScheduleConfig {
    pub fn daily_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_clock("schedule.daily_task_time", &self.daily_task_time)
    }

    pub fn listing_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_clock("schedule.listing_refresh_time", &self.listing_refresh_time)
    }

    pub fn intraday_interval(&self) -> Duration {
        Duration::from_secs(self.intraday_interval_minutes.saturating_mul(60))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_seconds)
    }
}

impl AppConfig {
    /// # Summary
    /// 启动时校验全部配置项。
    ///
    /// # Logic
    /// 1. 数据源链中包含 tushare 时必须提供非空 token。
    /// 2. 重试次数、间隔、批大小、并发度等必须大于零。
    /// 3. 定时任务时间必须能解析为 HH:MM。
    /// 4. 数据库路径与日志级别不得为空。
    ///
    /// # Returns
    /// 第一个不合法的配置项对应的 `ConfigError`。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::Missing("database.path"));
        }
        if self.log.level.trim().is_empty() {
            return Err(ConfigError::Missing("log.level"));
        }

        let needs_token = self.feed.provider_chain().contains(&DataSource::Tushare);
        let has_token = self
            .feed
            .tushare_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        if needs_token && !has_token {
            return Err(ConfigError::Missing("feed.tushare_token"));
        }
        non_zero("feed.timeout_secs", self.feed.timeout_secs)?;

        let acq = &self.acquisition;
        non_zero("acquisition.max_retry_count", acq.max_retry_count)?;
        non_zero("acquisition.concurrency", acq.concurrency)?;
        non_zero("acquisition.chunk_size", acq.chunk_size)?;
        non_zero("acquisition.intraday_symbol_limit", acq.intraday_symbol_limit)?;

        let sch = &self.schedule;
        sch.daily_time()?;
        sch.listing_time()?;
        non_zero("schedule.intraday_interval_minutes", sch.intraday_interval_minutes)?;
        non_zero("schedule.tick_seconds", sch.tick_seconds)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_token() -> AppConfig {
        let mut config = AppConfig::default();
        config.feed.tushare_token = Some("token".to_string());
        config
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.feed.source, DataSource::EastMoney);
        assert_eq!(config.acquisition.max_retry_count, 3);
        assert_eq!(config.schedule.daily_task_time, "15:30");
        assert_eq!(config.schedule.intraday_interval_minutes, 30);
        assert_eq!(config.acquisition.intraday_symbol_limit, 100);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(AppConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_tushare_fallback_requires_token() {
        let mut config = AppConfig::default();
        config.feed.fallback = vec![DataSource::Tushare];
        assert_eq!(
            config.validate(),
            Err(ConfigError::Missing("feed.tushare_token"))
        );
        config.feed.tushare_token = Some("  ".to_string());
        assert!(config.validate().is_err());
        config.feed.tushare_token = Some("token".to_string());
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_invalid_clock_is_rejected() {
        let mut config = with_token();
        config.schedule.daily_task_time = "25:99".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "schedule.daily_task_time", .. })
        ));
    }

    #[test]
    fn test_zero_retry_is_rejected() {
        let mut config = with_token();
        config.acquisition.max_retry_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_provider_chain_dedup() {
        let mut config = with_token();
        config.feed.fallback = vec![DataSource::EastMoney, DataSource::Tushare];
        assert_eq!(
            config.feed.provider_chain(),
            vec![DataSource::EastMoney, DataSource::Tushare]
        );
    }

    #[test]
    fn test_akshare_alias() {
        let source: DataSource = serde_json::from_str("\"akshare\"").unwrap();
        assert_eq!(source, DataSource::EastMoney);
    }
}
