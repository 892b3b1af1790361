//! ルーティングとハンドラ。エラーは種別ごとの HTTP status + 構造化 JSON で返す。

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use infrastructure::tools::{
    CompareTool, InterestTool, RelatedTool, TrendingBulkTool, TrendingTool,
};
use rig::tool::Tool;
use serde::Deserialize;
use serde_json::{json, Value};
use shared::health::HealthMonitor;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use trendkit_core::client::{
    BulkRequest, CompareRequest, InterestRequest, RelatedRequest, TrendClient, TrendingRequest,
};
use trendkit_core::contracts::{Days, Format, Platform, TimeWindow};
use trendkit_core::error::TrendkitError;

pub struct AppState {
    pub client: Arc<TrendClient>,
    pub monitor: Mutex<HealthMonitor>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/trending", get(trending_handler))
        .route("/api/trending/bulk", get(trending_bulk_handler))
        .route("/api/related", get(related_handler))
        .route("/api/compare", get(compare_handler))
        .route("/api/interest", get(interest_handler))
        .route("/api/regions", get(regions_handler))
        .route("/api/cache/stats", get(cache_stats_handler))
        .route("/api/cache/clear", post(cache_clear_handler))
        .route("/api/health", get(health_handler))
        .route("/api/tools", get(tools_handler))
        .route("/api/tools/:name", post(tool_call_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// typed error を HTTP 応答へ写像するラッパ
struct ApiError(TrendkitError);

impl From<TrendkitError> for ApiError {
    fn from(err: TrendkitError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TrendkitError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            TrendkitError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            TrendkitError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            TrendkitError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            TrendkitError::Unsupported { .. } => StatusCode::NOT_IMPLEMENTED,
            TrendkitError::Service { .. } => StatusCode::BAD_GATEWAY,
        };

        let mut body = json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });
        match &self.0 {
            TrendkitError::RateLimit { retry_after_secs } => {
                body["retry_after"] = json!(retry_after_secs);
            }
            TrendkitError::Timeout { partial, .. } => {
                body["partial_results"] = json!(partial);
            }
            TrendkitError::Validation { parameter, valid_values, .. } => {
                body["parameter"] = json!(parameter);
                if let Some(values) = valid_values {
                    body["valid_values"] = json!(values);
                }
            }
            TrendkitError::Unavailable { hint, .. } => {
                body["hint"] = json!(hint);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

#[derive(Deserialize)]
struct TrendingParams {
    geo: Option<String>,
    limit: Option<usize>,
    format: Option<String>,
}

async fn trending_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TrendingParams>,
) -> Result<Json<Value>, ApiError> {
    let format = params
        .format
        .as_deref()
        .map(Format::from_str)
        .transpose()?
        .unwrap_or_default();
    let result = state
        .client
        .trending(TrendingRequest {
            region: params.geo,
            limit: params.limit,
            format,
            ..TrendingRequest::default()
        })
        .await?;
    Ok(Json(json!({ "trends": result })))
}

#[derive(Deserialize)]
struct BulkParams {
    geo: Option<String>,
    hours: Option<u32>,
    limit: Option<usize>,
    enrich: Option<bool>,
}

async fn trending_bulk_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BulkParams>,
) -> Result<Json<Value>, ApiError> {
    let window = params.hours.map(TimeWindow::try_from).transpose()?.unwrap_or_default();
    let report = state
        .client
        .trending_bulk(BulkRequest {
            region: params.geo,
            window,
            limit: params.limit,
            enrich: params.enrich.unwrap_or(false),
            ..BulkRequest::default()
        })
        .await?;

    let body = match &report.envelope {
        Some(envelope) => json!(envelope),
        None => json!({ "trends": report.trends.as_ref() }),
    };
    Ok(Json(body))
}

#[derive(Deserialize)]
struct RelatedParams {
    keyword: String,
    geo: Option<String>,
    limit: Option<usize>,
}

async fn related_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RelatedParams>,
) -> Result<Json<Value>, ApiError> {
    let related = state
        .client
        .related(
            &params.keyword,
            RelatedRequest {
                region: params.geo,
                limit: params.limit,
                ..RelatedRequest::default()
            },
        )
        .await?;
    Ok(Json(json!({ "related": related })))
}

#[derive(Deserialize)]
struct AnalysisParams {
    /// カンマ区切りのキーワード列 (例: "삼성,애플")
    keywords: String,
    geo: Option<String>,
    days: Option<u32>,
    platform: Option<String>,
}

impl AnalysisParams {
    fn keyword_list(&self) -> Vec<String> {
        self.keywords
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

async fn compare_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AnalysisParams>,
) -> Result<Json<Value>, ApiError> {
    let days = params.days.map(Days::try_from).transpose()?.unwrap_or(Days::D90);
    let platform = params
        .platform
        .as_deref()
        .map(Platform::from_str)
        .transpose()?
        .unwrap_or_default();
    let scores = state
        .client
        .compare(
            &params.keyword_list(),
            CompareRequest {
                region: params.geo.clone(),
                days,
                platform,
                ..CompareRequest::default()
            },
        )
        .await?;
    Ok(Json(json!({ "scores": scores })))
}

async fn interest_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AnalysisParams>,
) -> Result<Json<Value>, ApiError> {
    let days = params.days.map(Days::try_from).transpose()?.unwrap_or(Days::D7);
    let platform = params
        .platform
        .as_deref()
        .map(Platform::from_str)
        .transpose()?
        .unwrap_or_default();
    let series = state
        .client
        .interest(
            &params.keyword_list(),
            InterestRequest {
                region: params.geo.clone(),
                days,
                platform,
                ..InterestRequest::default()
            },
        )
        .await?;
    Ok(Json(json!(series)))
}

async fn regions_handler() -> Json<Value> {
    Json(json!({ "regions": TrendClient::supported_regions() }))
}

async fn cache_stats_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let stats = state.client.cache_stats();
    Json(json!({
        "hits": stats.hits,
        "misses": stats.misses,
        "hit_rate": format!("{:.1}%", stats.hit_rate() * 100.0),
        "size": stats.size,
        "max_size": stats.max_size,
    }))
}

async fn cache_clear_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let cleared = state.client.invalidate_cache();
    Json(json!({ "cleared": cleared }))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let resources = state
        .monitor
        .lock()
        .map(|mut monitor| monitor.check())
        .ok();
    Json(json!({
        "status": "ok",
        "resources": resources,
        "backends": state.client.backend_health(),
        "cache": state.client.cache_stats(),
    }))
}

/// 登録済みツールの定義一覧 (ツール呼び出しプロトコルのハンドシェイク用)
async fn tools_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let client = &state.client;
    let definitions = vec![
        TrendingTool { client: Arc::clone(client) }.definition(String::new()).await,
        TrendingBulkTool { client: Arc::clone(client) }.definition(String::new()).await,
        RelatedTool { client: Arc::clone(client) }.definition(String::new()).await,
        CompareTool { client: Arc::clone(client) }.definition(String::new()).await,
        InterestTool { client: Arc::clone(client) }.definition(String::new()).await,
    ];
    let tools: Vec<Value> = definitions
        .into_iter()
        .map(|d| json!({ "name": d.name, "description": d.description, "parameters": d.parameters }))
        .collect();
    Json(json!({ "tools": tools }))
}

fn bad_args(err: serde_json::Error) -> ApiError {
    ApiError(TrendkitError::Validation {
        parameter: "args",
        detail: format!("引数の形が不正: {err}"),
        valid_values: None,
    })
}

/// 名前指定のツール実行
async fn tool_call_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(args): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let client = Arc::clone(&state.client);
    let output = match name.as_str() {
        "trends_trending" => {
            let args = serde_json::from_value(args).map_err(bad_args)?;
            serde_json::to_value(TrendingTool { client }.call(args).await?)
        }
        "trends_trending_bulk" => {
            let args = serde_json::from_value(args).map_err(bad_args)?;
            serde_json::to_value(TrendingBulkTool { client }.call(args).await?)
        }
        "trends_related" => {
            let args = serde_json::from_value(args).map_err(bad_args)?;
            serde_json::to_value(RelatedTool { client }.call(args).await?)
        }
        "trends_compare" => {
            let args = serde_json::from_value(args).map_err(bad_args)?;
            serde_json::to_value(CompareTool { client }.call(args).await?)
        }
        "trends_interest" => {
            let args = serde_json::from_value(args).map_err(bad_args)?;
            serde_json::to_value(InterestTool { client }.call(args).await?)
        }
        other => {
            return Err(ApiError(TrendkitError::Validation {
                parameter: "name",
                detail: format!("未知のツール: {other}"),
                valid_values: Some(vec![
                    "trends_trending".into(),
                    "trends_trending_bulk".into(),
                    "trends_related".into(),
                    "trends_compare".into(),
                    "trends_interest".into(),
                ]),
            }))
        }
    };

    let output = output
        .map_err(|e| ApiError(TrendkitError::Service { detail: format!("直列化失敗: {e}") }))?;
    Ok(Json(output))
}
