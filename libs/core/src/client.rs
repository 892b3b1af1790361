//! # 公開 API
//!
//! 5 つの操作 (trending / trending_bulk / related / compare / interest) を
//! Cache → Dispatcher → Resilience Wrapper の順に合成する。
//! 各呼び出しは VALIDATE → CACHE_LOOKUP → {HIT: PROJECT;
//! MISS: DISPATCH → RESILIENT_FETCH → CACHE_STORE → PROJECT} → RETURN
//! の状態機械をたどる。フロントエンド (CLI / server / tool) はこの層だけを呼ぶ。

use crate::cache::{CacheStats, TrendCache};
use crate::contracts::{
    CachedPayload, CompareScores, Days, Format, InterestSeries, Platform, QueryLimits,
    TimeWindow, TrendQuery, TrendRecord, SUPPORTED_REGIONS,
};
use crate::dispatcher::Dispatcher;
use crate::error::TrendkitError;
use crate::projector::{self, ExportPayload, Projection, TrendEnvelope};
use crate::resilience::{CircuitPolicy, HealthRegistry, HealthReport, ResilientCaller, RetryPolicy};
use crate::traits::TrendBackend;
use shared::config::TrendkitConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// メモ化の opt-in ノブ
#[derive(Debug, Clone)]
pub struct CacheControl {
    pub enabled: bool,
    /// None なら設定の既定 TTL
    pub ttl: Option<Duration>,
}

impl Default for CacheControl {
    fn default() -> Self {
        Self { enabled: true, ttl: None }
    }
}

impl CacheControl {
    pub fn disabled() -> Self {
        Self { enabled: false, ttl: None }
    }

    pub fn with_ttl(ttl_secs: u64) -> Self {
        Self { enabled: true, ttl: Some(Duration::from_secs(ttl_secs)) }
    }
}

/// realtime trending のリクエスト
#[derive(Debug, Clone, Default)]
pub struct TrendingRequest {
    /// None なら設定の default_region
    pub region: Option<String>,
    /// None なら 10
    pub limit: Option<usize>,
    pub format: Format,
    pub cache: CacheControl,
}

/// bulk trending のリクエスト
#[derive(Debug, Clone)]
pub struct BulkRequest {
    pub region: Option<String>,
    pub window: TimeWindow,
    /// None なら設定の bulk_limit_max
    pub limit: Option<usize>,
    pub enrich: bool,
    /// 拡張子駆動 (.csv / .json) のファイル出力先
    pub output: Option<PathBuf>,
    pub cache: CacheControl,
}

impl Default for BulkRequest {
    fn default() -> Self {
        Self {
            region: None,
            window: TimeWindow::H168,
            limit: None,
            enrich: false,
            output: None,
            cache: CacheControl::default(),
        }
    }
}

/// related のリクエスト
#[derive(Debug, Clone, Default)]
pub struct RelatedRequest {
    pub region: Option<String>,
    pub limit: Option<usize>,
    pub cache: CacheControl,
}

/// compare のリクエスト
#[derive(Debug, Clone)]
pub struct CompareRequest {
    pub region: Option<String>,
    pub days: Days,
    pub platform: Platform,
    pub cache: CacheControl,
}

impl Default for CompareRequest {
    fn default() -> Self {
        Self {
            region: None,
            days: Days::D90,
            platform: Platform::Web,
            cache: CacheControl::default(),
        }
    }
}

/// interest のリクエスト
#[derive(Debug, Clone)]
pub struct InterestRequest {
    pub region: Option<String>,
    pub days: Days,
    pub platform: Platform,
    pub cache: CacheControl,
}

impl Default for InterestRequest {
    fn default() -> Self {
        Self {
            region: None,
            days: Days::D7,
            platform: Platform::Web,
            cache: CacheControl::default(),
        }
    }
}

/// bulk 収集の結果
#[derive(Debug)]
pub struct BulkReport {
    pub trends: Arc<Vec<TrendRecord>>,
    /// enrich=true のときのみ
    pub envelope: Option<TrendEnvelope>,
    /// 書き出しに成功したファイル
    pub written: Option<PathBuf>,
}

/// トレンド集約クライアント
pub struct TrendClient {
    dispatcher: Arc<Dispatcher>,
    cache: Arc<TrendCache>,
    limits: QueryLimits,
    default_region: String,
}

impl TrendClient {
    pub fn new(backends: Vec<Arc<dyn TrendBackend>>, config: &TrendkitConfig) -> Self {
        let health = Arc::new(HealthRegistry::new(
            backends.iter().map(|b| b.name()).collect::<Vec<_>>(),
            CircuitPolicy {
                failure_threshold: config.circuit_failure_threshold,
                cooldown: Duration::from_secs(config.circuit_cooldown_secs),
            },
        ));
        let caller = ResilientCaller::new(
            health,
            RetryPolicy {
                max_retries: config.max_retries,
                base_delay: Duration::from_secs(config.backoff_base_secs),
                max_delay: Duration::from_secs(60),
            },
            Duration::from_secs(config.request_timeout_secs),
        );
        Self {
            dispatcher: Arc::new(Dispatcher::new(backends, caller, config.fast_limit_ceiling)),
            cache: Arc::new(TrendCache::new(
                config.cache_max_entries,
                Duration::from_secs(config.cache_ttl_secs),
            )),
            limits: QueryLimits {
                bulk_limit_max: config.bulk_limit_max,
                compare_keywords_max: config.compare_keywords_max,
            },
            default_region: config.default_region.clone(),
        }
    }

    /// realtime trending キーワードを取得する
    pub async fn trending(&self, req: TrendingRequest) -> Result<Projection, TrendkitError> {
        let region = self.region_or_default(req.region);
        let query = TrendQuery::trending(&region, req.limit.unwrap_or(10), req.format);
        let payload = self.run(query, &req.cache).await?;
        let records = payload.into_records()?;
        Ok(projector::project(&records, req.format))
    }

    /// bulk trending を取得し、必要なら enrichment とファイル出力を行う
    pub async fn trending_bulk(&self, req: BulkRequest) -> Result<BulkReport, TrendkitError> {
        let region = self.region_or_default(req.region);
        let limit = req.limit.unwrap_or(self.limits.bulk_limit_max);

        // 出力先の拡張子検証はネットワークに出る前に済ませる
        if let Some(path) = &req.output {
            projector::validate_output_path(path, req.enrich)?;
        }

        let query = TrendQuery::bulk(&region, req.window, limit, req.enrich);
        let payload = self.run(query, &req.cache).await?;
        let trends = payload.into_records()?;

        let envelope = req
            .enrich
            .then(|| projector::wrap_with_metadata(&trends, &region, req.window, limit));

        // structured-text (.json) は常に metadata 封筒で包む。
        // delimited-text (.csv) は固定列のみ (enriched は事前に拒否済み)。
        let written = if let Some(path) = &req.output {
            let json_output = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("json"))
                .unwrap_or(false);
            if json_output {
                let envelope = envelope.clone().unwrap_or_else(|| {
                    projector::wrap_with_metadata(&trends, &region, req.window, limit)
                });
                projector::save_to_file(path, ExportPayload::Envelope(&envelope))?;
            } else {
                projector::save_to_file(path, ExportPayload::Records(&trends))?;
            }
            Some(path.clone())
        } else {
            None
        };

        Ok(BulkReport { trends, envelope, written })
    }

    /// 関連検索語を取得する
    pub async fn related(
        &self,
        keyword: &str,
        req: RelatedRequest,
    ) -> Result<Vec<String>, TrendkitError> {
        let region = self.region_or_default(req.region);
        let query = TrendQuery::related(keyword, &region, req.limit.unwrap_or(10));
        let payload = self.run(query, &req.cache).await?;
        Ok(payload.into_related()?.as_ref().clone())
    }

    /// 平均関心度でキーワードを比較する
    pub async fn compare(
        &self,
        keywords: &[String],
        req: CompareRequest,
    ) -> Result<CompareScores, TrendkitError> {
        let region = self.region_or_default(req.region);
        let query = TrendQuery::compare(keywords, &region, req.days, req.platform);
        let payload = self.run(query, &req.cache).await?;
        Ok(payload.into_scores()?.as_ref().clone())
    }

    /// 関心度の時系列を取得する
    pub async fn interest(
        &self,
        keywords: &[String],
        req: InterestRequest,
    ) -> Result<InterestSeries, TrendkitError> {
        let region = self.region_or_default(req.region);
        let query = TrendQuery::interest(keywords, &region, req.days, req.platform);
        let payload = self.run(query, &req.cache).await?;
        Ok(payload.into_series()?.as_ref().clone())
    }

    /// 対応地域コードの一覧
    pub fn supported_regions() -> &'static [&'static str] {
        &SUPPORTED_REGIONS
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// キャッシュ全消去。戻り値は破棄件数。
    pub fn invalidate_cache(&self) -> usize {
        self.cache.invalidate(None)
    }

    /// バックエンド健全性のスナップショット (監視用)
    pub fn backend_health(&self) -> Vec<HealthReport> {
        self.dispatcher.health().snapshot()
    }

    fn region_or_default(&self, region: Option<String>) -> String {
        region.unwrap_or_else(|| self.default_region.clone())
    }

    /// 状態機械の本体。検証はどのバックエンドにも触れる前に完了する。
    async fn run(
        &self,
        query: TrendQuery,
        cache: &CacheControl,
    ) -> Result<CachedPayload, TrendkitError> {
        query.validate(&self.limits)?;

        if !cache.enabled {
            return dispatch_and_enrich(Arc::clone(&self.dispatcher), query).await;
        }

        let key = query.cache_key();
        let dispatcher = Arc::clone(&self.dispatcher);
        self.cache
            .get_or_fetch(key, cache.ttl, move || dispatch_and_enrich(dispatcher, query))
            .await
    }
}

/// ミス時の取得本体。enrichment はキャッシュ保存前に済ませるので、
/// 同一キーのヒットは常に enrichment 済みの値を共有する。
async fn dispatch_and_enrich(
    dispatcher: Arc<Dispatcher>,
    query: TrendQuery,
) -> Result<CachedPayload, TrendkitError> {
    let payload = dispatcher.dispatch(&query).await?;
    if query.enrich {
        if let CachedPayload::Records(records) = &payload {
            let enriched = dispatcher.enrich(records.as_ref().clone(), &query.region).await;
            return Ok(CachedPayload::records(enriched));
        }
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{NewsItem, Operation};
    use crate::traits::{BackendClass, PartialSink};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// クラスごとに 1 本立てるスタブ。ネットワーク接触回数は共有カウンタで数える。
    struct StubBackend {
        name: &'static str,
        class: BackendClass,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl TrendBackend for StubBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        fn class(&self) -> BackendClass {
            self.class
        }

        fn supports(&self, operation: Operation) -> bool {
            match self.class {
                BackendClass::Fast => operation == Operation::Trending,
                BackendClass::Bulk => {
                    matches!(operation, Operation::Trending | Operation::BulkTrending)
                }
                BackendClass::Analysis => matches!(
                    operation,
                    Operation::Related | Operation::Compare | Operation::Interest
                ),
            }
        }

        async fn fetch_trending(
            &self,
            _region: &str,
            limit: usize,
            _window: TimeWindow,
            _sink: &PartialSink,
        ) -> Result<Vec<TrendRecord>, TrendkitError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let keywords = ["환율", "신한카드", "국민신문고", "국가장학금", "흑백요리사2"];
            Ok(keywords
                .iter()
                .take(limit)
                .enumerate()
                .map(|(i, kw)| {
                    let mut record = TrendRecord::new(*kw, "20만+").with_rank(i as u32 + 1);
                    record.news = vec![NewsItem {
                        headline: format!("{kw} 관련 뉴스"),
                        url: "https://news.example".into(),
                        source: "연합뉴스".into(),
                    }];
                    record
                })
                .collect())
        }

        async fn fetch_related(
            &self,
            keyword: &str,
            _region: &str,
            limit: usize,
        ) -> Result<Vec<String>, TrendkitError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((0..limit.min(3)).map(|i| format!("{keyword} {i}")).collect())
        }

        async fn fetch_interest(
            &self,
            keywords: &[String],
            _region: &str,
            days: Days,
            _platform: Platform,
        ) -> Result<InterestSeries, TrendkitError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let start = NaiveDate::from_ymd_opt(2024, 12, 16).unwrap();
            let dates: Vec<NaiveDate> =
                (0..days.as_u32() as i64).map(|i| start + chrono::Duration::days(i)).collect();
            let values: HashMap<String, Vec<u32>> = keywords
                .iter()
                .map(|k| (k.clone(), (0..dates.len() as u32).map(|i| 40 + i).collect()))
                .collect();
            InterestSeries::new(dates, values)
        }

        async fn fetch_compare(
            &self,
            keywords: &[String],
            _region: &str,
            _days: Days,
            _platform: Platform,
        ) -> Result<CompareScores, TrendkitError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(keywords
                .iter()
                .enumerate()
                .map(|(i, k)| (k.clone(), 45.6 - i as f64 * 10.0))
                .collect())
        }
    }

    /// fast / bulk / analysis の 3 本構成でクライアントを組む
    fn test_client() -> (TrendClient, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let backends: Vec<Arc<dyn TrendBackend>> = vec![
            Arc::new(StubBackend {
                name: "stub_fast",
                class: BackendClass::Fast,
                calls: Arc::clone(&calls),
            }),
            Arc::new(StubBackend {
                name: "stub_bulk",
                class: BackendClass::Bulk,
                calls: Arc::clone(&calls),
            }),
            Arc::new(StubBackend {
                name: "stub_analysis",
                class: BackendClass::Analysis,
                calls: Arc::clone(&calls),
            }),
        ];
        (TrendClient::new(backends, &TrendkitConfig::default()), calls)
    }

    #[tokio::test]
    async fn test_scenario_a_trending_five_unique_in_rank_order() {
        let (client, _calls) = test_client();

        let result = client
            .trending(TrendingRequest { limit: Some(5), ..TrendingRequest::default() })
            .await
            .unwrap();

        let keywords = result.keywords();
        assert_eq!(keywords.len(), 5);
        let unique: std::collections::HashSet<_> = keywords.iter().collect();
        assert_eq!(unique.len(), 5, "no duplicates");
        assert_eq!(keywords[0], "환율");
        assert_eq!(keywords[4], "흑백요리사2");
    }

    #[tokio::test]
    async fn test_scenario_b_compare_returns_requested_keys_in_range() {
        let (client, _calls) = test_client();

        let keywords = vec!["삼성".to_string(), "애플".to_string()];
        let scores = client.compare(&keywords, CompareRequest::default()).await.unwrap();

        assert_eq!(scores.len(), 2);
        for keyword in &keywords {
            let score = scores[keyword];
            assert!((0.0..=100.0).contains(&score), "{keyword}: {score}");
        }
    }

    #[tokio::test]
    async fn test_scenario_c_interest_dates_and_values_aligned() {
        let (client, _calls) = test_client();

        let keywords = vec!["BTS".to_string()];
        let series = client.interest(&keywords, InterestRequest::default()).await.unwrap();

        assert_eq!(series.dates.len(), 7);
        assert_eq!(series.values["BTS"].len(), 7);
    }

    #[tokio::test]
    async fn test_scenario_d_invalid_region_fails_before_any_backend_contact() {
        let (client, calls) = test_client();

        let err = client
            .trending(TrendingRequest {
                region: Some("ZZ".into()),
                ..TrendingRequest::default()
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "validation");
        assert_eq!(calls.load(Ordering::SeqCst), 0, "no network activity");
    }

    #[tokio::test]
    async fn test_scenario_e_bulk_csv_export() {
        let (client, _calls) = test_client();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("trends.csv");

        let report = client
            .trending_bulk(BulkRequest {
                limit: Some(5),
                output: Some(path.clone()),
                ..BulkRequest::default()
            })
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next().unwrap(), "keyword,rank,traffic");
        assert_eq!(lines.count(), report.trends.len());
        assert_eq!(report.written.as_deref(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn test_bulk_json_export_always_carries_envelope() {
        let (client, _calls) = test_client();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("trends.json");

        client
            .trending_bulk(BulkRequest {
                limit: Some(3),
                output: Some(path.clone()),
                ..BulkRequest::default()
            })
            .await
            .unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["metadata"]["source"], "google_trends");
        assert_eq!(value["metadata"]["total_items"], 3);
        assert_eq!(value["trends"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_format_variants_share_one_backend_fetch() {
        let (client, calls) = test_client();

        let minimal = client
            .trending(TrendingRequest { limit: Some(5), ..TrendingRequest::default() })
            .await
            .unwrap();
        let full = client
            .trending(TrendingRequest {
                limit: Some(5),
                format: Format::Full,
                ..TrendingRequest::default()
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1, "second call is a cache hit");
        assert_eq!(minimal.len(), full.len());
        assert_eq!(minimal.keywords(), full.keywords());

        let stats = client.cache_stats();
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_cache_disabled_always_fetches() {
        let (client, calls) = test_client();

        for _ in 0..2 {
            client
                .trending(TrendingRequest {
                    limit: Some(5),
                    cache: CacheControl::disabled(),
                    ..TrendingRequest::default()
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bulk_enrich_wraps_envelope_and_fills_related() {
        let (client, _calls) = test_client();

        let report = client
            .trending_bulk(BulkRequest {
                limit: Some(3),
                enrich: true,
                ..BulkRequest::default()
            })
            .await
            .unwrap();

        let envelope = report.envelope.expect("enrich=true must produce an envelope");
        assert_eq!(envelope.metadata.total_items, report.trends.len());
        assert_eq!(envelope.metadata.hours, 168);
        assert_eq!(envelope.metadata.source, "google_trends");
        assert!(report.trends.iter().all(|r| !r.related.is_empty()));
    }

    #[tokio::test]
    async fn test_bulk_enriched_csv_rejected_before_fetch() {
        let (client, calls) = test_client();

        let err = client
            .trending_bulk(BulkRequest {
                enrich: true,
                output: Some(PathBuf::from("trends.csv")),
                ..BulkRequest::default()
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "validation");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_compare_keyword_cap_enforced() {
        let (client, calls) = test_client();

        let six: Vec<String> = (0..6).map(|i| format!("kw{i}")).collect();
        let err = client.compare(&six, CompareRequest::default()).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_related_routes_to_analysis_backend() {
        let (client, calls) = test_client();

        let terms = client.related("아이폰", RelatedRequest::default()).await.unwrap();
        assert_eq!(terms.len(), 3);
        assert!(terms[0].starts_with("아이폰"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_supported_regions_contains_defaults() {
        let regions = TrendClient::supported_regions();
        assert!(regions.contains(&"KR"));
        assert!(regions.contains(&"US"));
        assert_eq!(regions.len(), 24);
    }
}
