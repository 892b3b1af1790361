//! # データ契約
//!
//! クエリ・正規化レコード・時系列の形を定義する。
//! `TrendRecord` は生成後に変更されない canonical な内部表現で、
//! キャッシュには `Arc` 経由で共有される。

use crate::error::TrendkitError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;
use unicode_normalization::UnicodeNormalization;

/// 対応地域コード (ISO 風 2文字、大文字)
pub const SUPPORTED_REGIONS: [&str; 24] = [
    "KR", "US", "JP", "GB", "DE", "FR", "CA", "AU", "IN", "BR", "MX", "ES",
    "IT", "NL", "SE", "CH", "TW", "HK", "SG", "TH", "VN", "ID", "MY", "PH",
];

/// 公開 API の 5 操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Trending,
    BulkTrending,
    Related,
    Compare,
    Interest,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Trending => "trending",
            Operation::BulkTrending => "bulk_trending",
            Operation::Related => "related",
            Operation::Compare => "compare",
            Operation::Interest => "interest",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 出力フォーマット (トークン効率の段階)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// キーワード文字列のみ (~5 tokens/item)
    #[default]
    Minimal,
    /// keyword + traffic (~15 tokens/item)
    Standard,
    /// ニュース・関連語・画像込みの完全レコード (~100 tokens/item)
    Full,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Minimal => "minimal",
            Format::Standard => "standard",
            Format::Full => "full",
        }
    }
}

impl FromStr for Format {
    type Err = TrendkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minimal" => Ok(Format::Minimal),
            "standard" => Ok(Format::Standard),
            "full" => Ok(Format::Full),
            other => Err(TrendkitError::Validation {
                parameter: "format",
                detail: format!("'{other}' は未知のフォーマット"),
                valid_values: Some(vec!["minimal".into(), "standard".into(), "full".into()]),
            }),
        }
    }
}

/// 検索プラットフォーム。上流の property フィルタへ写像する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Web,
    Video,
    Image,
    News,
}

impl Platform {
    /// 上流クエリの gprop 値
    pub fn gprop(&self) -> &'static str {
        match self {
            Platform::Web => "",
            Platform::Video => "youtube",
            Platform::Image => "images",
            Platform::News => "news",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Web => "web",
            Platform::Video => "video",
            Platform::Image => "image",
            Platform::News => "news",
        }
    }
}

impl FromStr for Platform {
    type Err = TrendkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(Platform::Web),
            "video" => Ok(Platform::Video),
            "image" => Ok(Platform::Image),
            "news" => Ok(Platform::News),
            other => Err(TrendkitError::Validation {
                parameter: "platform",
                detail: format!("'{other}' は未知のプラットフォーム"),
                valid_values: Some(
                    ["web", "video", "image", "news"].iter().map(|s| s.to_string()).collect(),
                ),
            }),
        }
    }
}

/// バルク収集の時間窓 (有界列挙)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeWindow {
    H4,
    H24,
    H48,
    #[default]
    H168,
}

impl TimeWindow {
    pub fn hours(&self) -> u32 {
        match self {
            TimeWindow::H4 => 4,
            TimeWindow::H24 => 24,
            TimeWindow::H48 => 48,
            TimeWindow::H168 => 168,
        }
    }
}

impl TryFrom<u32> for TimeWindow {
    type Error = TrendkitError;

    fn try_from(hours: u32) -> Result<Self, Self::Error> {
        match hours {
            4 => Ok(TimeWindow::H4),
            24 => Ok(TimeWindow::H24),
            48 => Ok(TimeWindow::H48),
            168 => Ok(TimeWindow::H168),
            other => Err(TrendkitError::Validation {
                parameter: "hours",
                detail: format!("時間窓 {other}h は未対応"),
                valid_values: Some(vec!["4".into(), "24".into(), "48".into(), "168".into()]),
            }),
        }
    }
}

/// 分析操作の対象期間 (有界列挙)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Days {
    D1,
    D7,
    D30,
    D90,
    D365,
}

impl Days {
    pub fn as_u32(&self) -> u32 {
        match self {
            Days::D1 => 1,
            Days::D7 => 7,
            Days::D30 => 30,
            Days::D90 => 90,
            Days::D365 => 365,
        }
    }

    /// 上流の timeframe 文字列
    pub fn timeframe(&self) -> &'static str {
        match self {
            Days::D1 => "now 1-d",
            Days::D7 => "now 7-d",
            Days::D30 => "today 1-m",
            Days::D90 => "today 3-m",
            Days::D365 => "today 12-m",
        }
    }
}

impl TryFrom<u32> for Days {
    type Error = TrendkitError;

    fn try_from(days: u32) -> Result<Self, Self::Error> {
        match days {
            1 => Ok(Days::D1),
            7 => Ok(Days::D7),
            30 => Ok(Days::D30),
            90 => Ok(Days::D90),
            365 => Ok(Days::D365),
            other => Err(TrendkitError::Validation {
                parameter: "days",
                detail: format!("期間 {other}日 は未対応"),
                valid_values: Some(
                    ["1", "7", "30", "90", "365"].iter().map(|s| s.to_string()).collect(),
                ),
            }),
        }
    }
}

/// トレンドに紐づくニュース記事
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub headline: String,
    pub url: String,
    pub source: String,
}

/// トレンドのサムネイル画像
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendImage {
    pub url: String,
    pub source: String,
}

/// トレンド 1 件の canonical 内部表現。生成後は変更しない。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendRecord {
    pub keyword: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    /// 上流の検索量表示をそのまま保持する不透明文字列 (例: "20만+")
    pub traffic: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub news: Vec<NewsItem>,
    /// 関連語 (enrichment でのみ充填、上限あり)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<TrendImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explore_link: Option<String>,
}

impl TrendRecord {
    /// keyword と traffic だけの最小レコード
    pub fn new(keyword: impl Into<String>, traffic: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            rank: None,
            traffic: traffic.into(),
            news: Vec::new(),
            related: Vec::new(),
            image: None,
            explore_link: None,
        }
    }

    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = Some(rank);
        self
    }
}

/// キーワード別の関心度時系列。
/// 不変条件: 全キーワードの値列は `dates` と同じ長さで index 対応する。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestSeries {
    pub dates: Vec<NaiveDate>,
    pub values: HashMap<String, Vec<u32>>,
}

impl InterestSeries {
    /// 整列不変条件を検査して構築する
    pub fn new(
        dates: Vec<NaiveDate>,
        values: HashMap<String, Vec<u32>>,
    ) -> Result<Self, TrendkitError> {
        for (keyword, row) in &values {
            if row.len() != dates.len() {
                return Err(TrendkitError::Service {
                    detail: format!(
                        "時系列の整列不変条件違反: '{keyword}' は {} 点、dates は {} 点",
                        row.len(),
                        dates.len()
                    ),
                });
            }
        }
        Ok(Self { dates, values })
    }

    /// 全キーワード空の系列 (上流がデータを持たない場合)
    pub fn empty(keywords: &[String]) -> Self {
        Self {
            dates: Vec::new(),
            values: keywords.iter().map(|k| (k.clone(), Vec::new())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// キーワード → 平均関心度 (0–100, 小数 1 桁)
pub type CompareScores = HashMap<String, f64>;

/// キャッシュに保持される canonical な結果集合。
/// format はここには現れない — 射影は取り出し後に行う。
#[derive(Debug, Clone)]
pub enum CachedPayload {
    Records(Arc<Vec<TrendRecord>>),
    Related(Arc<Vec<String>>),
    Scores(Arc<CompareScores>),
    Series(Arc<InterestSeries>),
}

impl CachedPayload {
    pub fn records(items: Vec<TrendRecord>) -> Self {
        CachedPayload::Records(Arc::new(items))
    }

    pub fn related(terms: Vec<String>) -> Self {
        CachedPayload::Related(Arc::new(terms))
    }

    pub fn scores(scores: CompareScores) -> Self {
        CachedPayload::Scores(Arc::new(scores))
    }

    pub fn series(series: InterestSeries) -> Self {
        CachedPayload::Series(Arc::new(series))
    }

    pub fn into_records(self) -> Result<Arc<Vec<TrendRecord>>, TrendkitError> {
        match self {
            CachedPayload::Records(r) => Ok(r),
            other => Err(payload_shape_error("records", &other)),
        }
    }

    pub fn into_related(self) -> Result<Arc<Vec<String>>, TrendkitError> {
        match self {
            CachedPayload::Related(r) => Ok(r),
            other => Err(payload_shape_error("related", &other)),
        }
    }

    pub fn into_scores(self) -> Result<Arc<CompareScores>, TrendkitError> {
        match self {
            CachedPayload::Scores(s) => Ok(s),
            other => Err(payload_shape_error("scores", &other)),
        }
    }

    pub fn into_series(self) -> Result<Arc<InterestSeries>, TrendkitError> {
        match self {
            CachedPayload::Series(s) => Ok(s),
            other => Err(payload_shape_error("series", &other)),
        }
    }
}

fn payload_shape_error(expected: &str, got: &CachedPayload) -> TrendkitError {
    let got = match got {
        CachedPayload::Records(_) => "records",
        CachedPayload::Related(_) => "related",
        CachedPayload::Scores(_) => "scores",
        CachedPayload::Series(_) => "series",
    };
    TrendkitError::Service {
        detail: format!("キャッシュ payload の形不一致: expected {expected}, got {got}"),
    }
}

/// 検証に使う上限値。設定層から渡される。
#[derive(Debug, Clone, Copy)]
pub struct QueryLimits {
    pub bulk_limit_max: usize,
    pub compare_keywords_max: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self { bulk_limit_max: 100, compare_keywords_max: 5 }
    }
}

/// 1 回の論理クエリを表す不変値。
/// 構築後は検証とキー導出のみ行い、フィールドは変更しない。
#[derive(Debug, Clone, PartialEq)]
pub struct TrendQuery {
    pub operation: Operation,
    pub region: String,
    pub limit: usize,
    pub window: TimeWindow,
    pub days: Days,
    pub platform: Platform,
    pub keywords: Vec<String>,
    pub format: Format,
    pub enrich: bool,
}

impl TrendQuery {
    pub fn trending(region: &str, limit: usize, format: Format) -> Self {
        Self {
            operation: Operation::Trending,
            region: region.to_uppercase(),
            limit,
            window: TimeWindow::H24,
            days: Days::D7,
            platform: Platform::Web,
            keywords: Vec::new(),
            format,
            enrich: false,
        }
    }

    pub fn bulk(region: &str, window: TimeWindow, limit: usize, enrich: bool) -> Self {
        Self {
            operation: Operation::BulkTrending,
            region: region.to_uppercase(),
            limit,
            window,
            days: Days::D7,
            platform: Platform::Web,
            keywords: Vec::new(),
            format: Format::Full,
            enrich,
        }
    }

    pub fn related(keyword: &str, region: &str, limit: usize) -> Self {
        Self {
            operation: Operation::Related,
            region: region.to_uppercase(),
            limit,
            window: TimeWindow::H24,
            days: Days::D90,
            platform: Platform::Web,
            keywords: vec![keyword.to_string()],
            format: Format::Minimal,
            enrich: false,
        }
    }

    pub fn compare(keywords: &[String], region: &str, days: Days, platform: Platform) -> Self {
        Self {
            operation: Operation::Compare,
            region: region.to_uppercase(),
            limit: keywords.len().max(1),
            window: TimeWindow::H24,
            days,
            platform,
            keywords: keywords.to_vec(),
            format: Format::Minimal,
            enrich: false,
        }
    }

    pub fn interest(keywords: &[String], region: &str, days: Days, platform: Platform) -> Self {
        Self {
            operation: Operation::Interest,
            region: region.to_uppercase(),
            limit: keywords.len().max(1),
            window: TimeWindow::H24,
            days,
            platform,
            keywords: keywords.to_vec(),
            format: Format::Minimal,
            enrich: false,
        }
    }

    /// ネットワーク I/O の前に必ず呼ばれる検証。
    /// 失敗はすべて `Validation` で、どのバックエンドにも触れない。
    pub fn validate(&self, limits: &QueryLimits) -> Result<(), TrendkitError> {
        if !SUPPORTED_REGIONS.contains(&self.region.as_str()) {
            return Err(TrendkitError::invalid_region(&self.region, &SUPPORTED_REGIONS));
        }

        if self.limit == 0 || self.limit > limits.bulk_limit_max {
            return Err(TrendkitError::invalid_limit(self.limit, limits.bulk_limit_max));
        }

        match self.operation {
            Operation::Related => {
                if self.keywords.len() != 1 || self.keywords[0].trim().is_empty() {
                    return Err(TrendkitError::Validation {
                        parameter: "keyword",
                        detail: "related は空でないキーワードを 1 件要求する".into(),
                        valid_values: None,
                    });
                }
            }
            Operation::Compare | Operation::Interest => {
                if self.keywords.is_empty() {
                    return Err(TrendkitError::Validation {
                        parameter: "keywords",
                        detail: "キーワードを 1 件以上指定".into(),
                        valid_values: None,
                    });
                }
                if self.keywords.len() > limits.compare_keywords_max {
                    return Err(TrendkitError::Validation {
                        parameter: "keywords",
                        detail: format!(
                            "キーワードは最大 {} 件 (指定: {})",
                            limits.compare_keywords_max,
                            self.keywords.len()
                        ),
                        valid_values: None,
                    });
                }
                if self.keywords.iter().any(|k| k.trim().is_empty()) {
                    return Err(TrendkitError::Validation {
                        parameter: "keywords",
                        detail: "空のキーワードは指定不可".into(),
                        valid_values: None,
                    });
                }
            }
            Operation::Trending | Operation::BulkTrending => {}
        }

        Ok(())
    }

    /// キャッシュキー。結果に影響する全フィールドを含み、`format` だけを除外する
    /// (射影はキャッシュの後段で行われるため)。キーワードは NFC 正規化して
    /// 見かけ同一のハングル/かな合成列が同じエントリを共有するようにする。
    pub fn cache_key(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.operation.hash(&mut hasher);
        self.region.hash(&mut hasher);
        self.limit.hash(&mut hasher);
        self.window.hash(&mut hasher);
        self.days.hash(&mut hasher);
        self.platform.hash(&mut hasher);
        self.enrich.hash(&mut hasher);
        for keyword in &self.keywords {
            keyword.nfc().collect::<String>().hash(&mut hasher);
        }
        hasher.finish()
    }
}
