//! # エージェントツール定義
//!
//! 公開 API の各操作をツール呼び出しプロトコルへ束ねる。
//! 引数スキーマは `schemars` から自動生成し、ツール名と説明は
//! LLM が最小トークンで使い分けられる形に揃えてある。

use rig::tool::Tool;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use trendkit_core::client::{
    BulkRequest, CompareRequest, InterestRequest, RelatedRequest, TrendClient, TrendingRequest,
};
use trendkit_core::contracts::{CompareScores, Days, Format, InterestSeries, Platform, TimeWindow};
use trendkit_core::error::TrendkitError;
use trendkit_core::projector::Projection;

fn parse_days(days: Option<u32>, default: Days) -> Result<Days, TrendkitError> {
    days.map(Days::try_from).transpose().map(|d| d.unwrap_or(default))
}

fn parse_platform(platform: Option<&str>) -> Result<Platform, TrendkitError> {
    platform.map(Platform::from_str).transpose().map(|p| p.unwrap_or_default())
}

// --- trends_trending ---

#[derive(Clone)]
pub struct TrendingTool {
    pub client: Arc<TrendClient>,
}

#[derive(Deserialize, JsonSchema)]
pub struct TrendingArgs {
    /// 地域コード (例: "KR", "US", "JP")
    pub geo: Option<String>,
    /// 取得件数 (既定 10)
    pub limit: Option<usize>,
    /// 出力フォーマット: "minimal" | "standard" | "full"
    pub format: Option<String>,
}

#[derive(Serialize)]
pub struct TrendingOutput {
    pub trends: Projection,
}

impl Tool for TrendingTool {
    const NAME: &'static str = "trends_trending";
    type Args = TrendingArgs;
    type Output = TrendingOutput;
    type Error = TrendkitError;

    async fn definition(&self, _prompt: String) -> rig::completion::ToolDefinition {
        rig::completion::ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Google Trends のリアルタイム急上昇キーワードを取得します。\
                          format=minimal はキーワード配列のみ (~5 tokens/件)。"
                .to_string(),
            parameters: serde_json::to_value(schemars::schema_for!(TrendingArgs)).unwrap(),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let format = args.format.as_deref().map(Format::from_str).transpose()?.unwrap_or_default();
        let trends = self
            .client
            .trending(TrendingRequest {
                region: args.geo,
                limit: args.limit,
                format,
                ..TrendingRequest::default()
            })
            .await?;
        Ok(TrendingOutput { trends })
    }
}

// --- trends_trending_bulk ---

#[derive(Clone)]
pub struct TrendingBulkTool {
    pub client: Arc<TrendClient>,
}

#[derive(Deserialize, JsonSchema)]
pub struct TrendingBulkArgs {
    /// 地域コード
    pub geo: Option<String>,
    /// 時間窓 (時間): 4 | 24 | 48 | 168
    pub hours: Option<u32>,
    /// 取得件数 (最大 ~100)
    pub limit: Option<usize>,
    /// フルレコード + metadata 封筒で返すか
    pub enrich: Option<bool>,
}

#[derive(Serialize)]
pub struct TrendingBulkOutput {
    pub result: serde_json::Value,
}

impl Tool for TrendingBulkTool {
    const NAME: &'static str = "trends_trending_bulk";
    type Args = TrendingBulkArgs;
    type Output = TrendingBulkOutput;
    type Error = TrendkitError;

    async fn definition(&self, _prompt: String) -> rig::completion::ToolDefinition {
        rig::completion::ToolDefinition {
            name: Self::NAME.to_string(),
            description: "指定時間窓のトレンドを大量収集します (最大 ~100 件)。\
                          enrich=true でニュース・関連語付きの封筒形式。"
                .to_string(),
            parameters: serde_json::to_value(schemars::schema_for!(TrendingBulkArgs)).unwrap(),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let window = args.hours.map(TimeWindow::try_from).transpose()?.unwrap_or_default();
        let enrich = args.enrich.unwrap_or(false);
        let report = self
            .client
            .trending_bulk(BulkRequest {
                region: args.geo,
                window,
                limit: args.limit,
                enrich,
                ..BulkRequest::default()
            })
            .await?;

        let result = match &report.envelope {
            Some(envelope) => serde_json::to_value(envelope),
            None => serde_json::to_value(report.trends.as_ref()),
        }
        .map_err(|e| TrendkitError::Service { detail: format!("直列化失敗: {e}") })?;
        Ok(TrendingBulkOutput { result })
    }
}

// --- trends_related ---

#[derive(Clone)]
pub struct RelatedTool {
    pub client: Arc<TrendClient>,
}

#[derive(Deserialize, JsonSchema)]
pub struct RelatedArgs {
    /// 関連語を調べる対象キーワード
    pub keyword: String,
    /// 地域コード
    pub geo: Option<String>,
    /// 取得件数
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct RelatedOutput {
    pub related: Vec<String>,
}

impl Tool for RelatedTool {
    const NAME: &'static str = "trends_related";
    type Args = RelatedArgs;
    type Output = RelatedOutput;
    type Error = TrendkitError;

    async fn definition(&self, _prompt: String) -> rig::completion::ToolDefinition {
        rig::completion::ToolDefinition {
            name: Self::NAME.to_string(),
            description: "キーワードの関連検索語を取得します。".to_string(),
            parameters: serde_json::to_value(schemars::schema_for!(RelatedArgs)).unwrap(),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let related = self
            .client
            .related(
                &args.keyword,
                RelatedRequest {
                    region: args.geo,
                    limit: args.limit,
                    ..RelatedRequest::default()
                },
            )
            .await?;
        Ok(RelatedOutput { related })
    }
}

// --- trends_compare ---

#[derive(Clone)]
pub struct CompareTool {
    pub client: Arc<TrendClient>,
}

#[derive(Deserialize, JsonSchema)]
pub struct CompareArgs {
    /// 比較するキーワード (最大 5)
    pub keywords: Vec<String>,
    /// 地域コード
    pub geo: Option<String>,
    /// 期間 (日): 1 | 7 | 30 | 90 | 365
    pub days: Option<u32>,
    /// プラットフォーム: "web" | "video" | "image" | "news"
    pub platform: Option<String>,
}

#[derive(Serialize)]
pub struct CompareOutput {
    pub scores: CompareScores,
}

impl Tool for CompareTool {
    const NAME: &'static str = "trends_compare";
    type Args = CompareArgs;
    type Output = CompareOutput;
    type Error = TrendkitError;

    async fn definition(&self, _prompt: String) -> rig::completion::ToolDefinition {
        rig::completion::ToolDefinition {
            name: Self::NAME.to_string(),
            description: "複数キーワードを平均関心度 (0-100) で比較します。".to_string(),
            parameters: serde_json::to_value(schemars::schema_for!(CompareArgs)).unwrap(),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let days = parse_days(args.days, Days::D90)?;
        let platform = parse_platform(args.platform.as_deref())?;
        let scores = self
            .client
            .compare(
                &args.keywords,
                CompareRequest {
                    region: args.geo,
                    days,
                    platform,
                    ..CompareRequest::default()
                },
            )
            .await?;
        Ok(CompareOutput { scores })
    }
}

// --- trends_interest ---

#[derive(Clone)]
pub struct InterestTool {
    pub client: Arc<TrendClient>,
}

#[derive(Deserialize, JsonSchema)]
pub struct InterestArgs {
    /// 分析するキーワード (最大 5)
    pub keywords: Vec<String>,
    /// 地域コード
    pub geo: Option<String>,
    /// 期間 (日): 1 | 7 | 30 | 90 | 365
    pub days: Option<u32>,
    /// プラットフォーム: "web" | "video" | "image" | "news"
    pub platform: Option<String>,
}

impl Tool for InterestTool {
    const NAME: &'static str = "trends_interest";
    type Args = InterestArgs;
    type Output = InterestSeries;
    type Error = TrendkitError;

    async fn definition(&self, _prompt: String) -> rig::completion::ToolDefinition {
        rig::completion::ToolDefinition {
            name: Self::NAME.to_string(),
            description: "キーワードの関心度時系列 (dates + values) を取得します。"
                .to_string(),
            parameters: serde_json::to_value(schemars::schema_for!(InterestArgs)).unwrap(),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let days = parse_days(args.days, Days::D7)?;
        let platform = parse_platform(args.platform.as_deref())?;
        self.client
            .interest(
                &args.keywords,
                InterestRequest {
                    region: args.geo,
                    days,
                    platform,
                    ..InterestRequest::default()
                },
            )
            .await
    }
}
