//! # バックエンド契約
//!
//! 3 系統の収集経路 (fast / bulk / analysis) を単一のトレイトに揃える。
//! 具体実装は `libs/infrastructure` に配置する (依存性逆転の原則)。
//! 宣言していない操作は `Unsupported` で即時失敗し、Dispatcher は
//! リトライせず次候補へ進める。

use crate::contracts::{
    CompareScores, Days, InterestSeries, Operation, Platform, TimeWindow, TrendRecord,
};
use crate::error::TrendkitError;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// バックエンドのレイテンシ/容量クラス
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendClass {
    /// 低レイテンシ・少数件 (フィード 1 発)
    Fast,
    /// ページ繰りで大量件数
    Bulk,
    /// 比較・時系列などの分析系
    Analysis,
}

/// バルク収集の途中経過を受けるシンク。
/// Resilience Wrapper がタイムアウト時にここから部分結果を回収する。
#[derive(Clone, Default)]
pub struct PartialSink {
    collected: Arc<Mutex<Vec<TrendRecord>>>,
}

impl PartialSink {
    /// 完了したページ分を積む
    pub fn extend(&self, page: Vec<TrendRecord>) {
        let mut guard = self.collected.lock().unwrap_or_else(|e| e.into_inner());
        guard.extend(page);
    }

    /// ここまでの収集分を取り出す
    pub fn drain(&self) -> Vec<TrendRecord> {
        let mut guard = self.collected.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *guard)
    }

    pub fn len(&self) -> usize {
        self.collected.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 収集バックエンドの能力契約。
/// 各実装は `supports` で対応操作を宣言し、未対応メソッドは
/// 既定実装の `Unsupported` に任せる。
#[async_trait]
pub trait TrendBackend: Send + Sync {
    /// サーキットブレーカのキーにもなる一意名
    fn name(&self) -> &'static str;

    fn class(&self) -> BackendClass;

    fn supports(&self, operation: Operation) -> bool;

    /// トレンドキーワードの取得。bulk 実装はページ完了ごとに `sink` へ積むこと。
    async fn fetch_trending(
        &self,
        region: &str,
        limit: usize,
        window: TimeWindow,
        sink: &PartialSink,
    ) -> Result<Vec<TrendRecord>, TrendkitError> {
        let _ = (region, limit, window, sink);
        Err(TrendkitError::Unsupported { backend: self.name(), operation: Operation::Trending })
    }

    /// 関連検索語の取得
    async fn fetch_related(
        &self,
        keyword: &str,
        region: &str,
        limit: usize,
    ) -> Result<Vec<String>, TrendkitError> {
        let _ = (keyword, region, limit);
        Err(TrendkitError::Unsupported { backend: self.name(), operation: Operation::Related })
    }

    /// 関心度時系列の取得
    async fn fetch_interest(
        &self,
        keywords: &[String],
        region: &str,
        days: Days,
        platform: Platform,
    ) -> Result<InterestSeries, TrendkitError> {
        let _ = (keywords, region, days, platform);
        Err(TrendkitError::Unsupported { backend: self.name(), operation: Operation::Interest })
    }

    /// 平均関心度の比較
    async fn fetch_compare(
        &self,
        keywords: &[String],
        region: &str,
        days: Days,
        platform: Platform,
    ) -> Result<CompareScores, TrendkitError> {
        let _ = (keywords, region, days, platform);
        Err(TrendkitError::Unsupported { backend: self.name(), operation: Operation::Compare })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DeclaredOnly;

    #[async_trait]
    impl TrendBackend for DeclaredOnly {
        fn name(&self) -> &'static str {
            "declared_only"
        }

        fn class(&self) -> BackendClass {
            BackendClass::Fast
        }

        fn supports(&self, operation: Operation) -> bool {
            operation == Operation::Trending
        }
    }

    #[tokio::test]
    async fn test_undeclared_operation_fails_with_unsupported() {
        let backend = DeclaredOnly;
        let err = backend.fetch_related("BTS", "KR", 10).await.unwrap_err();
        match err {
            TrendkitError::Unsupported { backend, operation } => {
                assert_eq!(backend, "declared_only");
                assert_eq!(operation, Operation::Related);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_partial_sink_accumulates_pages() {
        let sink = PartialSink::default();
        sink.extend(vec![TrendRecord::new("환율", "20만+")]);
        sink.extend(vec![TrendRecord::new("날씨", "5만+")]);
        assert_eq!(sink.len(), 2);
        let drained = sink.drain();
        assert_eq!(drained[0].keyword, "환율");
        assert!(sink.is_empty());
    }
}
