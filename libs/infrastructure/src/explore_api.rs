//! # ExploreApi — 分析バックエンド
//!
//! explore セッションでウィジェットトークンを取得してから widgetdata を引く
//! 2 段構えの経路。related / compare / interest を担当する。
//! 429 は RateLimit、5xx は一時的 Service として typed error に写像する。

use crate::util::{read_trends_json, transport_error};
use async_trait::async_trait;
use chrono::DateTime;
use serde_json::{json, Value};
use shared::config::TrendkitConfig;
use std::collections::HashMap;
use trendkit_core::contracts::{CompareScores, Days, InterestSeries, Operation, Platform};
use trendkit_core::error::TrendkitError;
use trendkit_core::traits::{BackendClass, TrendBackend};

const DEFAULT_BASE_URL: &str = "https://trends.google.com";
const HL: &str = "ko";
/// KST のタイムゾーンオフセット (分)
const TZ: i32 = 540;

/// explore 応答から取り出したウィジェット 1 件
struct Widget {
    token: String,
    request: Value,
}

/// 分析 API クライアント
pub struct ExploreApiBackend {
    client: reqwest::Client,
    base_url: String,
}

impl ExploreApiBackend {
    pub fn new(config: &TrendkitConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, base_url: DEFAULT_BASE_URL.to_string() }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// explore セッションを張り、指定 id のウィジェットを取り出す
    async fn explore_widget(
        &self,
        keywords: &[String],
        region: &str,
        days: Days,
        platform: Platform,
        widget_id: &str,
    ) -> Result<Widget, TrendkitError> {
        let comparison: Vec<Value> = keywords
            .iter()
            .map(|keyword| {
                json!({ "keyword": keyword, "geo": region, "time": days.timeframe() })
            })
            .collect();
        let req = json!({
            "comparisonItem": comparison,
            "category": 0,
            "property": platform.gprop(),
        });

        let url = format!("{}/trends/api/explore", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("hl", HL.to_string()),
                ("tz", TZ.to_string()),
                ("req", req.to_string()),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let payload = read_trends_json(response).await?;
        Self::pick_widget(&payload, widget_id).ok_or_else(|| TrendkitError::Service {
            detail: format!("explore 応答に {widget_id} ウィジェットが無い"),
        })
    }

    fn pick_widget(payload: &Value, widget_id: &str) -> Option<Widget> {
        payload
            .get("widgets")
            .and_then(|v| v.as_array())
            .and_then(|widgets| {
                widgets.iter().find(|w| {
                    w.get("id").and_then(|id| id.as_str()) == Some(widget_id)
                })
            })
            .and_then(|w| {
                Some(Widget {
                    token: w.get("token")?.as_str()?.to_string(),
                    request: w.get("request")?.clone(),
                })
            })
    }

    /// TIMESERIES ウィジェットのデータを (dates, per-keyword values) に展開する
    async fn fetch_timeline(
        &self,
        keywords: &[String],
        region: &str,
        days: Days,
        platform: Platform,
    ) -> Result<InterestSeries, TrendkitError> {
        let widget = self
            .explore_widget(keywords, region, days, platform, "TIMESERIES")
            .await?;

        let url = format!("{}/trends/api/widgetdata/multiline", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("hl", HL.to_string()),
                ("tz", TZ.to_string()),
                ("req", widget.request.to_string()),
                ("token", widget.token),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let payload = read_trends_json(response).await?;
        Self::parse_timeline(&payload, keywords)
    }

    fn parse_timeline(
        payload: &Value,
        keywords: &[String],
    ) -> Result<InterestSeries, TrendkitError> {
        let points = payload
            .pointer("/default/timelineData")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        if points.is_empty() {
            return Ok(InterestSeries::empty(keywords));
        }

        let mut dates = Vec::with_capacity(points.len());
        let mut columns: Vec<Vec<u32>> = vec![Vec::with_capacity(points.len()); keywords.len()];

        for point in &points {
            let secs = point
                .get("time")
                .and_then(|v| v.as_str())
                .and_then(|v| v.parse::<i64>().ok())
                .ok_or_else(|| TrendkitError::Service {
                    detail: "timelineData の time が不正".into(),
                })?;
            let date = DateTime::from_timestamp(secs, 0)
                .ok_or_else(|| TrendkitError::Service {
                    detail: format!("不正な epoch 秒: {secs}"),
                })?
                .date_naive();
            dates.push(date);

            let values = point.get("value").and_then(|v| v.as_array());
            for (idx, column) in columns.iter_mut().enumerate() {
                let score = values
                    .and_then(|vals| vals.get(idx))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32;
                column.push(score);
            }
        }

        let values: HashMap<String, Vec<u32>> = keywords
            .iter()
            .cloned()
            .zip(columns)
            .collect();
        InterestSeries::new(dates, values)
    }

    /// 平均値 (小数 1 桁丸め)。データが無いキーワードは 0.0。
    fn average_scores(series: &InterestSeries, keywords: &[String]) -> CompareScores {
        keywords
            .iter()
            .map(|keyword| {
                let mean = series
                    .values
                    .get(keyword)
                    .filter(|row| !row.is_empty())
                    .map(|row| row.iter().sum::<u32>() as f64 / row.len() as f64)
                    .unwrap_or(0.0);
                (keyword.clone(), (mean * 10.0).round() / 10.0)
            })
            .collect()
    }

    fn parse_related(payload: &Value, limit: usize) -> Vec<String> {
        payload
            .pointer("/default/rankedList")
            .and_then(|v| v.as_array())
            .and_then(|lists| lists.first())
            .and_then(|top| top.get("rankedKeyword"))
            .and_then(|v| v.as_array())
            .map(|ranked| {
                ranked
                    .iter()
                    .filter_map(|entry| entry.get("query").and_then(|q| q.as_str()))
                    .map(str::to_string)
                    .take(limit)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl TrendBackend for ExploreApiBackend {
    fn name(&self) -> &'static str {
        "explore_api"
    }

    fn class(&self) -> BackendClass {
        BackendClass::Analysis
    }

    fn supports(&self, operation: Operation) -> bool {
        matches!(
            operation,
            Operation::Related | Operation::Compare | Operation::Interest
        )
    }

    async fn fetch_related(
        &self,
        keyword: &str,
        region: &str,
        limit: usize,
    ) -> Result<Vec<String>, TrendkitError> {
        let keywords = vec![keyword.to_string()];
        let widget = self
            .explore_widget(&keywords, region, Days::D90, Platform::Web, "RELATED_QUERIES")
            .await?;

        let url = format!("{}/trends/api/widgetdata/relatedsearches", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("hl", HL.to_string()),
                ("tz", TZ.to_string()),
                ("req", widget.request.to_string()),
                ("token", widget.token),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let payload = read_trends_json(response).await?;
        let terms = Self::parse_related(&payload, limit);
        tracing::info!("🔍 ExploreApi: '{}' の関連語 {} 件", keyword, terms.len());
        Ok(terms)
    }

    async fn fetch_interest(
        &self,
        keywords: &[String],
        region: &str,
        days: Days,
        platform: Platform,
    ) -> Result<InterestSeries, TrendkitError> {
        let series = self.fetch_timeline(keywords, region, days, platform).await?;
        tracing::info!(
            "📈 ExploreApi: {} キーワード × {} 点の時系列を取得",
            keywords.len(),
            series.len()
        );
        Ok(series)
    }

    async fn fetch_compare(
        &self,
        keywords: &[String],
        region: &str,
        days: Days,
        platform: Platform,
    ) -> Result<CompareScores, TrendkitError> {
        let series = self.fetch_timeline(keywords, region, days, platform).await?;
        Ok(Self::average_scores(&series, keywords))
    }
}
