//! 上流レスポンスの共通処理。
//! Google Trends の JSON API は XSSI 対策の接頭辞 `)]}'` を付けて返すため、
//! 先頭の JSON 本体開始位置まで読み飛ばしてからパースする。

use serde_json::Value;
use trendkit_core::contracts::{NewsItem, TrendImage, TrendRecord};
use trendkit_core::error::TrendkitError;

/// レコード 1 件に添付するニュース記事の上限
pub(crate) const MAX_ARTICLES_PER_TREND: usize = 3;

/// XSSI 接頭辞を取り除いて JSON 本体を切り出す
pub(crate) fn strip_jsonp(body: &str) -> &str {
    match body.find(|c| c == '{' || c == '[') {
        Some(start) => &body[start..],
        None => body,
    }
}

/// ステータスコードを typed error へ写像する。
/// 429 は Retry-After を尊重し、5xx は一時的 Service として扱う。
pub(crate) fn status_to_error(response: &reqwest::Response) -> Option<TrendkitError> {
    let status = response.status();
    if status.is_success() {
        return None;
    }
    if status.as_u16() == 429 {
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);
        return Some(TrendkitError::RateLimit { retry_after_secs });
    }
    Some(TrendkitError::Service {
        detail: format!("上流が status {} を返却", status.as_u16()),
    })
}

/// レスポンス本文を JSON として読む (接頭辞除去込み)
pub(crate) async fn read_trends_json(response: reqwest::Response) -> Result<Value, TrendkitError> {
    if let Some(err) = status_to_error(&response) {
        return Err(err);
    }
    let body = response
        .text()
        .await
        .map_err(|e| TrendkitError::Service { detail: format!("本文読み取り失敗: {e}") })?;
    serde_json::from_str(strip_jsonp(&body))
        .map_err(|e| TrendkitError::Service { detail: format!("JSON パース失敗: {e}") })
}

/// 接続レベルの失敗を typed error へ
pub(crate) fn transport_error(err: reqwest::Error) -> TrendkitError {
    if err.is_timeout() {
        // Wrapper 側の deadline より先に下層が切れた場合もタイムアウト扱いにはせず
        // 一時的障害として分類する (部分結果の回収は Wrapper の責務)
        return TrendkitError::Service { detail: format!("下層タイムアウト: {err}") };
    }
    TrendkitError::Service { detail: format!("接続失敗: {err}") }
}

/// trendingSearches 配列の 1 要素を canonical レコードへ写像する
pub(crate) fn parse_trending_search(item: &Value) -> Option<TrendRecord> {
    let keyword = item.pointer("/title/query")?.as_str()?.trim().to_string();
    if keyword.is_empty() {
        return None;
    }
    let traffic = item
        .get("formattedTraffic")
        .and_then(|v| v.as_str())
        .unwrap_or("N/A")
        .to_string();

    let news: Vec<NewsItem> = item
        .get("articles")
        .and_then(|a| a.as_array())
        .map(|articles| {
            articles
                .iter()
                .take(MAX_ARTICLES_PER_TREND)
                .filter_map(|article| {
                    Some(NewsItem {
                        headline: article.get("title")?.as_str()?.to_string(),
                        url: article.get("url").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                        source: article
                            .get("source")
                            .and_then(|v| v.as_str())
                            .unwrap_or("")
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let image = item.get("image").and_then(|img| {
        Some(TrendImage {
            url: img.get("imageUrl")?.as_str()?.to_string(),
            source: img.get("source").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        })
    });

    let explore_link = item
        .get("shareUrl")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Some(TrendRecord {
        keyword,
        rank: None,
        traffic,
        news,
        related: Vec::new(),
        image,
        explore_link,
    })
}
