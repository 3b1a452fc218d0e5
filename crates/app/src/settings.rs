use anyhow::Context;
use config::{Config, Environment, File};
use qfin_core::config::AppConfig;
use std::path::Path;

/// 缺省配置文件 (扩展名由 `config` 自动识别)
const DEFAULT_CONFIG: &str = "config/qfin";
/// 环境变量前缀，例如 `QFIN__FEED__TUSHARE_TOKEN`
const ENV_PREFIX: &str = "QFIN";

/// # Summary
/// 加载并校验应用配置。
///
/// # Logic
/// 1. 读取当前目录下的 `.env` (不存在时忽略)。
/// 2. 依次叠加内置缺省值、配置文件与 `QFIN__` 前缀的环境变量。
/// 3. 执行 `AppConfig::validate`，失败时中止启动。
///
/// # Arguments
/// * `path`: 命令行指定的配置文件，指定时必须存在。
pub fn load(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(e) if e.not_found() => {}
        Err(e) => return Err(e).context("failed to read .env"),
    }
    let config = from_sources(path)?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// 叠加各配置来源，不做校验
fn from_sources(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let defaults = Config::try_from(&AppConfig::default())?;
    let file = match path {
        Some(p) => File::from(p).required(true),
        None => File::with_name(DEFAULT_CONFIG).required(false),
    };
    let env = Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("feed.fallback");

    Config::builder()
        .add_source(defaults)
        .add_source(file)
        .add_source(env)
        .build()
        .context("failed to load configuration")?
        .try_deserialize::<AppConfig>()
        .context("failed to parse configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use qfin_core::config::DataSource;

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qfin.toml");
        std::fs::write(
            &path,
            r#"
[feed]
fallback = ["tushare"]
tushare_token = "secret"

[acquisition]
concurrency = 4

[schedule]
daily_task_time = "16:05"
"#,
        )
        .unwrap();

        let config = from_sources(Some(&path)).unwrap();
        assert_eq!(config.acquisition.concurrency, 4);
        assert_eq!(config.acquisition.max_retry_count, 3);
        assert_eq!(config.schedule.daily_task_time, "16:05");
        assert_eq!(
            config.feed.provider_chain(),
            vec![DataSource::EastMoney, DataSource::Tushare]
        );
        assert_eq!(config.feed.tushare_token.as_deref(), Some("secret"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qfin.toml");
        std::fs::write(&path, "[feed]\nsource = \"tushare\"\n").unwrap();

        let config = from_sources(Some(&path)).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(from_sources(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
