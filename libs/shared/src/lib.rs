//! # Shared — 横断ユーティリティ層
//!
//! 設定とプロセス健全性監視。ドメインロジックは `trendkit-core` に置く。

pub mod config;
pub mod health;
