//! # ディスパッチャ
//!
//! 論理クエリを最も安価に満たせるバックエンド列へ写像する。
//! fast が天井内なら fast 優先、超過または enrichment 要求で bulk、
//! compare/interest は analysis 固定。サーキット開放中の候補は
//! 代替が残っている限り黙ってスキップする。
//! 「成功したが空」は正当な結果であり、次候補へは進まない。

use crate::contracts::{CachedPayload, Operation, TrendQuery, TrendRecord};
use crate::error::TrendkitError;
use crate::resilience::{HealthRegistry, ResilientCaller};
use crate::traits::{BackendClass, PartialSink, TrendBackend};
use std::collections::HashMap;
use std::sync::Arc;

/// enrichment で 1 キーワードに付与する関連語の上限
const ENRICH_RELATED_CAP: usize = 5;

pub struct Dispatcher {
    backends: Vec<Arc<dyn TrendBackend>>,
    caller: ResilientCaller,
    health: Arc<HealthRegistry>,
    /// fast バックエンドに任せられる limit の天井 (設定値)
    fast_ceiling: usize,
}

impl Dispatcher {
    pub fn new(
        backends: Vec<Arc<dyn TrendBackend>>,
        caller: ResilientCaller,
        fast_ceiling: usize,
    ) -> Self {
        let health = Arc::clone(caller.health());
        Self { backends, caller, health, fast_ceiling }
    }

    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    /// 操作と volume ヒントから優先クラス列を決める
    fn preferred_classes(&self, query: &TrendQuery) -> Vec<BackendClass> {
        match query.operation {
            Operation::Trending => {
                if query.enrich || query.limit > self.fast_ceiling {
                    vec![BackendClass::Bulk]
                } else {
                    vec![BackendClass::Fast, BackendClass::Bulk]
                }
            }
            Operation::BulkTrending => vec![BackendClass::Bulk],
            Operation::Related => {
                if query.limit <= self.fast_ceiling {
                    vec![BackendClass::Fast, BackendClass::Analysis]
                } else {
                    vec![BackendClass::Analysis]
                }
            }
            Operation::Compare | Operation::Interest => vec![BackendClass::Analysis],
        }
    }

    /// 優先順に並んだ、当該操作を宣言しているバックエンド列
    fn candidates(&self, query: &TrendQuery) -> Vec<Arc<dyn TrendBackend>> {
        let mut ordered = Vec::new();
        for class in self.preferred_classes(query) {
            for backend in &self.backends {
                if backend.class() == class && backend.supports(query.operation) {
                    ordered.push(Arc::clone(backend));
                }
            }
        }
        ordered
    }

    /// クエリを実行する。候補を順に試し、Unavailable / Unsupported のみ
    /// 次候補へフォールバックする (それ以外は Wrapper がリトライ済みの
    /// 確定失敗なのでそのまま伝搬)。
    pub async fn dispatch(&self, query: &TrendQuery) -> Result<CachedPayload, TrendkitError> {
        let candidates = self.candidates(query);
        if candidates.is_empty() {
            return Err(TrendkitError::Unavailable {
                backend: query.operation.as_str().to_string(),
                hint: "この操作を宣言するバックエンドが構成されていない".into(),
            });
        }

        let any_closed = candidates.iter().any(|b| !self.health.is_open(b.name()));
        let mut last_err: Option<TrendkitError> = None;

        for backend in &candidates {
            // 開放中の候補は、閉じている代替が残っている限り黙って飛ばす
            if self.health.is_open(backend.name()) && any_closed {
                tracing::debug!(
                    "skipping backend '{}' (circuit open) for {}",
                    backend.name(),
                    query.operation
                );
                continue;
            }

            match self.call_backend(backend, query).await {
                Ok(payload) => return Ok(payload),
                Err(err @ (TrendkitError::Unavailable { .. } | TrendkitError::Unsupported { .. })) => {
                    tracing::debug!(
                        "backend '{}' unavailable for {}, trying next candidate",
                        backend.name(),
                        query.operation
                    );
                    last_err = Some(err);
                    continue;
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err.unwrap_or_else(|| TrendkitError::Unavailable {
            backend: query.operation.as_str().to_string(),
            hint: "利用可能なバックエンドが残っていない".into(),
        }))
    }

    async fn call_backend(
        &self,
        backend: &Arc<dyn TrendBackend>,
        query: &TrendQuery,
    ) -> Result<CachedPayload, TrendkitError> {
        let name = backend.name();
        match query.operation {
            Operation::Trending | Operation::BulkTrending => {
                let sink = PartialSink::default();
                let result = self
                    .caller
                    .invoke(name, || {
                        let backend = Arc::clone(backend);
                        let query = query.clone();
                        let sink = sink.clone();
                        async move {
                            backend
                                .fetch_trending(&query.region, query.limit, query.window, &sink)
                                .await
                        }
                    })
                    .await;
                match result {
                    Ok(items) => Ok(CachedPayload::records(items)),
                    // デッドライン到達: シンクに積まれたページを部分結果として添付
                    Err(TrendkitError::Timeout { timeout_secs, .. }) => {
                        Err(TrendkitError::Timeout { timeout_secs, partial: sink.drain() })
                    }
                    Err(err) => Err(err),
                }
            }
            Operation::Related => {
                let keyword = query.keywords.first().cloned().unwrap_or_default();
                let items = self
                    .caller
                    .invoke(name, || {
                        let backend = Arc::clone(backend);
                        let keyword = keyword.clone();
                        let region = query.region.clone();
                        let limit = query.limit;
                        async move { backend.fetch_related(&keyword, &region, limit).await }
                    })
                    .await?;
                Ok(CachedPayload::related(items))
            }
            Operation::Compare => {
                let scores = self
                    .caller
                    .invoke(name, || {
                        let backend = Arc::clone(backend);
                        let query = query.clone();
                        async move {
                            backend
                                .fetch_compare(
                                    &query.keywords,
                                    &query.region,
                                    query.days,
                                    query.platform,
                                )
                                .await
                        }
                    })
                    .await?;
                Ok(CachedPayload::scores(scores))
            }
            Operation::Interest => {
                let series = self
                    .caller
                    .invoke(name, || {
                        let backend = Arc::clone(backend);
                        let query = query.clone();
                        async move {
                            backend
                                .fetch_interest(
                                    &query.keywords,
                                    &query.region,
                                    query.days,
                                    query.platform,
                                )
                                .await
                        }
                    })
                    .await?;
                Ok(CachedPayload::series(series))
            }
        }
    }

    /// バルク行に fast のフルレコードと関連語を突合する (soft-fail)。
    /// 個別キーワードの失敗は行をそのまま残して警告のみ。
    pub async fn enrich(&self, records: Vec<TrendRecord>, region: &str) -> Vec<TrendRecord> {
        let mut records = records;

        // fast フィードのフルレコードで image / news / explore_link を補完
        let feed_query = TrendQuery::trending(region, self.fast_ceiling, crate::contracts::Format::Full);
        let feed: Vec<TrendRecord> = match self.dispatch(&feed_query).await {
            Ok(payload) => match payload.into_records() {
                Ok(items) => items.as_ref().clone(),
                Err(_) => Vec::new(),
            },
            Err(err) => {
                tracing::warn!("enrichment feed fetch failed ({}), joining skipped", err.kind());
                Vec::new()
            }
        };
        let by_keyword: HashMap<&str, &TrendRecord> =
            feed.iter().map(|r| (r.keyword.as_str(), r)).collect();

        for record in &mut records {
            if let Some(full) = by_keyword.get(record.keyword.as_str()) {
                record.image = full.image.clone();
                record.news = full.news.clone();
                record.explore_link = full.explore_link.clone();
            }

            let related_query =
                TrendQuery::related(&record.keyword, region, ENRICH_RELATED_CAP);
            match self.dispatch(&related_query).await {
                Ok(payload) => {
                    if let Ok(terms) = payload.into_related() {
                        record.related = terms.as_ref().clone();
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        "related enrichment failed for '{}': {}",
                        record.keyword,
                        err.kind()
                    );
                }
            }
        }

        records
    }
}
