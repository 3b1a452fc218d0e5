//! `MarketStore` 的 SQLite 实现。

pub mod market;

pub use market::SqliteMarketStore;
