use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use qfin_core::common::{DataKind, Exchange};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "qfin")]
#[command(about = "A 股日线与成交明细采集服务", long_about = None)]
#[command(version)]
pub struct Cli {
    /// 配置文件路径，缺省读取 config/qfin.toml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// 初始化数据库表结构
    Init,

    /// 启动定时调度器 (缺省命令)
    Run,

    /// 立即执行一次收盘采集
    Once {
        /// 忽略交易日检查
        #[arg(long)]
        force: bool,
    },

    /// 只刷新证券列表
    Listing,

    /// 批量导入历史数据
    Import {
        /// 开始日期 (YYYYMMDD)，缺省为结束日期前 default_lookback_days 天
        #[arg(long, value_parser = parse_date)]
        start: Option<NaiveDate>,

        /// 结束日期 (YYYYMMDD)，缺省为今天
        #[arg(long, value_parser = parse_date)]
        end: Option<NaiveDate>,

        /// 证券代码列表，缺省为已存储的全部证券
        #[arg(long, num_args = 1..)]
        symbols: Vec<String>,

        /// 数据种类 (bars / ticks)，缺省两者都导入
        #[arg(long, num_args = 1..)]
        kinds: Vec<DataKind>,

        /// 只导入某一交易所 (SH / SZ) 的证券
        #[arg(long)]
        market: Option<Exchange>,

        /// 每批证券数
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// 显示数据概况与质量检查结果
    Status {
        /// 同时显示最近的错误与信息审计日志
        #[arg(long)]
        logs: bool,

        /// 同时显示成交量与成交额排行
        #[arg(long)]
        top: bool,
    },

    /// 显示日线覆盖报告 (交易所、年份与字段有效率)
    Summary,
}

/// 解析 `YYYYMMDD` 或 `YYYY-MM-DD` 格式的日期
fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .map_err(|e| format!("invalid date `{}`: {}", value, e))
}
