//! # Infrastructure — 収集実装層
//!
//! `trendkit-core` で定義されたバックエンド契約の具体実装を提供する。
//! 3 系統の収集経路とエージェントツール束ねを担当。

pub mod daily_feed;
pub mod explore_api;
pub mod tools;
pub mod trend_table;
mod util;

use shared::config::TrendkitConfig;
use std::sync::Arc;
use trendkit_core::traits::TrendBackend;

/// 既定の 3 バックエンド構成 (fast / bulk / analysis) を組む
pub fn default_backends(config: &TrendkitConfig) -> Vec<Arc<dyn TrendBackend>> {
    vec![
        Arc::new(daily_feed::DailyFeedBackend::new(config)),
        Arc::new(trend_table::TrendTableBackend::new(config)),
        Arc::new(explore_api::ExploreApiBackend::new(config)),
    ]
}
