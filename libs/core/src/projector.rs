//! # プロジェクタ
//!
//! canonical なレコード集合を 3 段階の情報量へ写像する純関数群。
//! 並び順は常にバックエンドが返した rank 順を保持し、再ソートしない。
//! ファイル出力は拡張子駆動 (.csv / .json)。

use crate::contracts::{Format, TimeWindow, TrendRecord};
use crate::error::TrendkitError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

/// standard フォーマットの 1 行
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendBrief {
    pub keyword: String,
    pub traffic: String,
}

/// 射影結果。minimal / standard / full で件数は変わらない。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Projection {
    Minimal(Vec<String>),
    Standard(Vec<TrendBrief>),
    Full(Vec<TrendRecord>),
}

impl Projection {
    pub fn len(&self) -> usize {
        match self {
            Projection::Minimal(items) => items.len(),
            Projection::Standard(items) => items.len(),
            Projection::Full(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// minimal 相当のキーワード列を取り出す
    pub fn keywords(&self) -> Vec<String> {
        match self {
            Projection::Minimal(items) => items.clone(),
            Projection::Standard(items) => items.iter().map(|b| b.keyword.clone()).collect(),
            Projection::Full(items) => items.iter().map(|r| r.keyword.clone()).collect(),
        }
    }
}

/// レコード集合を指定フォーマットへ射影する。入力順を保持する。
pub fn project(records: &[TrendRecord], format: Format) -> Projection {
    match format {
        Format::Minimal => {
            Projection::Minimal(records.iter().map(|r| r.keyword.clone()).collect())
        }
        Format::Standard => Projection::Standard(
            records
                .iter()
                .map(|r| TrendBrief { keyword: r.keyword.clone(), traffic: r.traffic.clone() })
                .collect(),
        ),
        Format::Full => Projection::Full(records.to_vec()),
    }
}

/// enriched バルク出力のメタデータ
#[derive(Debug, Clone, Serialize)]
pub struct EnvelopeMeta {
    pub region: String,
    pub hours: u32,
    pub limit: usize,
    pub collected_at: DateTime<Utc>,
    pub source: &'static str,
    pub total_items: usize,
}

/// メタデータ付きのフル出力
#[derive(Debug, Clone, Serialize)]
pub struct TrendEnvelope {
    pub metadata: EnvelopeMeta,
    pub trends: Vec<TrendRecord>,
}

/// レコード集合をメタデータ封筒で包む
pub fn wrap_with_metadata(
    records: &[TrendRecord],
    region: &str,
    window: TimeWindow,
    limit: usize,
) -> TrendEnvelope {
    TrendEnvelope {
        metadata: EnvelopeMeta {
            region: region.to_string(),
            hours: window.hours(),
            limit,
            collected_at: Utc::now(),
            source: "google_trends",
            total_items: records.len(),
        },
        trends: records.to_vec(),
    }
}

/// CSV ヘッダ。フォーマット指定に関わらず列順は固定。
pub const CSV_HEADER: &str = "keyword,rank,traffic";

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// 固定列順 (keyword, rank, traffic) の delimited-text を生成する
pub fn to_csv(records: &[TrendRecord]) -> String {
    if records.is_empty() {
        return String::new();
    }
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for record in records {
        let rank = record.rank.map(|r| r.to_string()).unwrap_or_default();
        out.push_str(&format!(
            "{},{},{}\n",
            csv_field(&record.keyword),
            rank,
            csv_field(&record.traffic)
        ));
    }
    out
}

/// ファイル出力の対象
pub enum ExportPayload<'a> {
    Records(&'a [TrendRecord]),
    Envelope(&'a TrendEnvelope),
}

/// 拡張子の検査のみ行う (VALIDATE フェーズ用、I/O なし)
pub fn validate_output_path(path: &Path, enriched: bool) -> Result<(), TrendkitError> {
    let ext = path.extension().and_then(|e| e.to_str()).map(str::to_lowercase);
    match ext.as_deref() {
        Some("json") => Ok(()),
        Some("csv") => {
            if enriched {
                Err(TrendkitError::Validation {
                    parameter: "output",
                    detail: "enriched データは metadata を含むため json のみ出力可".into(),
                    valid_values: Some(vec!["json".into()]),
                })
            } else {
                Ok(())
            }
        }
        _ => Err(TrendkitError::Validation {
            parameter: "output",
            detail: format!("未対応の出力形式: {}", path.display()),
            valid_values: Some(vec!["csv".into(), "json".into()]),
        }),
    }
}

/// 拡張子駆動でファイルへ書き出す
pub fn save_to_file(path: &Path, payload: ExportPayload<'_>) -> Result<(), TrendkitError> {
    let enriched = matches!(payload, ExportPayload::Envelope(_));
    validate_output_path(path, enriched)?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    let body = match (&payload, ext.as_str()) {
        (ExportPayload::Records(records), "csv") => to_csv(records),
        (ExportPayload::Records(records), _) => serde_json::to_string_pretty(records)
            .map_err(|e| TrendkitError::Service { detail: format!("JSON 直列化失敗: {e}") })?,
        (ExportPayload::Envelope(envelope), _) => serde_json::to_string_pretty(envelope)
            .map_err(|e| TrendkitError::Service { detail: format!("JSON 直列化失敗: {e}") })?,
    };

    let total = match &payload {
        ExportPayload::Records(records) => records.len(),
        ExportPayload::Envelope(envelope) => envelope.trends.len(),
    };
    std::fs::write(path, body).map_err(|e| TrendkitError::Service {
        detail: format!("ファイル書き込み失敗 ({}): {e}", path.display()),
    })?;
    tracing::info!("💾 exported {} items to {}", total, path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::NewsItem;

    fn records() -> Vec<TrendRecord> {
        vec![
            TrendRecord {
                keyword: "환율".into(),
                rank: Some(1),
                traffic: "20만+".into(),
                news: vec![NewsItem {
                    headline: "환율 급등".into(),
                    url: "https://news.example/1".into(),
                    source: "연합뉴스".into(),
                }],
                related: vec!["환율 전망".into()],
                image: None,
                explore_link: Some("https://trends.google.com/explore?q=환율".into()),
            },
            TrendRecord::new("신한카드", "10만+").with_rank(2),
            TrendRecord::new("국가장학금", "5만+").with_rank(3),
        ]
    }

    #[test]
    fn test_format_never_changes_item_count() {
        let records = records();
        let minimal = project(&records, Format::Minimal);
        let standard = project(&records, Format::Standard);
        let full = project(&records, Format::Full);
        assert_eq!(minimal.len(), standard.len());
        assert_eq!(standard.len(), full.len());
        assert_eq!(full.len(), 3);
    }

    #[test]
    fn test_projection_preserves_backend_order() {
        let records = records();
        let minimal = project(&records, Format::Minimal);
        assert_eq!(minimal.keywords(), vec!["환율", "신한카드", "국가장학금"]);
    }

    #[test]
    fn test_full_then_minimal_roundtrip_equals_direct_minimal() {
        let records = records();
        let direct = project(&records, Format::Minimal);
        let via_full = project(&records, Format::Full);
        assert_eq!(via_full.keywords(), direct.keywords());
    }

    #[test]
    fn test_csv_fixed_header_and_row_count() {
        let records = records();
        let csv = to_csv(&records);
        let mut lines = csv.lines();
        assert_eq!(lines.next().unwrap(), "keyword,rank,traffic");
        assert_eq!(lines.count(), records.len());
    }

    #[test]
    fn test_csv_escapes_delimiters() {
        let records = vec![TrendRecord::new("a,b", "1\"000+").with_rank(1)];
        let csv = to_csv(&records);
        assert!(csv.contains("\"a,b\",1,\"1\"\"000+\""));
    }

    #[test]
    fn test_csv_of_empty_set_is_empty() {
        assert_eq!(to_csv(&[]), "");
    }

    #[test]
    fn test_envelope_metadata_fields() {
        let records = records();
        let envelope = wrap_with_metadata(&records, "KR", TimeWindow::H168, 100);
        assert_eq!(envelope.metadata.region, "KR");
        assert_eq!(envelope.metadata.hours, 168);
        assert_eq!(envelope.metadata.limit, 100);
        assert_eq!(envelope.metadata.source, "google_trends");
        assert_eq!(envelope.metadata.total_items, 3);
        assert_eq!(envelope.trends.len(), 3);
    }

    #[test]
    fn test_save_csv_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("trends.csv");
        let records = records();
        save_to_file(&path, ExportPayload::Records(&records)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next().unwrap(), "keyword,rank,traffic");
        assert_eq!(lines.count(), records.len());
    }

    #[test]
    fn test_save_json_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("trends.json");
        let records = records();
        save_to_file(&path, ExportPayload::Records(&records)).unwrap();

        let loaded: Vec<TrendRecord> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, records);
    }

    #[test]
    fn test_enriched_csv_is_rejected() {
        let records = records();
        let envelope = wrap_with_metadata(&records, "KR", TimeWindow::H168, 100);
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("trends.csv");
        let err = save_to_file(&path, ExportPayload::Envelope(&envelope)).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_unsupported_extension_is_rejected() {
        let err = validate_output_path(Path::new("trends.xml"), false).unwrap_err();
        match err {
            TrendkitError::Validation { parameter, valid_values, .. } => {
                assert_eq!(parameter, "output");
                assert_eq!(valid_values.unwrap(), vec!["csv", "json"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
