//! # ドメインエラー型
//!
//! `thiserror` を使い、トレンド収集のすべての失敗様態に明確な型を付与する。
//! キャッシュ合流時に待機者全員へ同一エラーを配布するため、全 variant は `Clone` 可能。
//! 呼び出し側 (エージェント含む) が自由文をパースせずに再試行/縮退/中断を
//! 判断できるよう、payload は構造化フィールドで持つ。

use crate::contracts::{Operation, TrendRecord};
use thiserror::Error;

/// trendkit のドメインエラー
#[derive(Debug, Clone, Error)]
pub enum TrendkitError {
    /// 入力検証の失敗。ネットワーク I/O の前に必ず検出される。リトライ対象外。
    #[error("入力検証エラー ({parameter}): {detail}")]
    Validation {
        parameter: &'static str,
        detail: String,
        /// 許容値の一覧 (列挙可能な場合のみ)
        valid_values: Option<Vec<String>>,
    },

    /// 上流のレート制限 (HTTP 429)
    #[error("レート制限超過: {retry_after_secs}秒待つか cache を有効化してください")]
    RateLimit { retry_after_secs: u64 },

    /// デッドライン超過。期限前に収集できた部分結果を保持する。
    #[error("タイムアウト ({timeout_secs}秒): 部分結果 {}件", .partial.len())]
    Timeout {
        timeout_secs: u64,
        partial: Vec<TrendRecord>,
    },

    /// バックエンド利用不可 (サーキット開放・環境不備)。リトライ対象外。
    #[error("バックエンド利用不可 ({backend}): {hint}")]
    Unavailable { backend: String, hint: String },

    /// バックエンドが当該操作を宣言していない。Dispatcher はリトライせず次候補へ進む。
    #[error("{backend} は操作 {operation} をサポートしない")]
    Unsupported {
        backend: &'static str,
        operation: Operation,
    },

    /// 分類不能な上流障害。限定回数リトライ後にそのまま伝搬する。
    #[error("上流サービスエラー: {detail}")]
    Service { detail: String },
}

impl TrendkitError {
    /// region 検証失敗のヘルパ
    pub fn invalid_region(region: &str, supported: &[&str]) -> Self {
        TrendkitError::Validation {
            parameter: "region",
            detail: format!("'{region}' は未対応の地域コード"),
            valid_values: Some(supported.iter().map(|s| s.to_string()).collect()),
        }
    }

    /// limit 検証失敗のヘルパ
    pub fn invalid_limit(limit: usize, max: usize) -> Self {
        TrendkitError::Validation {
            parameter: "limit",
            detail: format!("limit は 1..={max} の範囲で指定 (指定値: {limit})"),
            valid_values: None,
        }
    }

    /// Resilience Wrapper がリトライしてよい失敗か
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TrendkitError::RateLimit { .. } | TrendkitError::Service { .. }
        )
    }

    /// 機械可読なエラー種別タグ (API レスポンス・ログ用)
    pub fn kind(&self) -> &'static str {
        match self {
            TrendkitError::Validation { .. } => "validation",
            TrendkitError::RateLimit { .. } => "rate_limit",
            TrendkitError::Timeout { .. } => "timeout",
            TrendkitError::Unavailable { .. } => "unavailable",
            TrendkitError::Unsupported { .. } => "unsupported",
            TrendkitError::Service { .. } => "service",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TrendkitError::RateLimit { retry_after_secs: 60 }.is_retryable());
        assert!(TrendkitError::Service { detail: "503".into() }.is_retryable());
        assert!(!TrendkitError::Validation {
            parameter: "region",
            detail: "bad".into(),
            valid_values: None
        }
        .is_retryable());
        assert!(!TrendkitError::Unavailable {
            backend: "daily_feed".into(),
            hint: "circuit open".into()
        }
        .is_retryable());
        assert!(!TrendkitError::Timeout { timeout_secs: 30, partial: vec![] }.is_retryable());
    }

    #[test]
    fn test_invalid_region_carries_valid_values() {
        let err = TrendkitError::invalid_region("ZZ", &["KR", "US"]);
        match err {
            TrendkitError::Validation { parameter, valid_values, .. } => {
                assert_eq!(parameter, "region");
                assert_eq!(valid_values.unwrap(), vec!["KR", "US"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(TrendkitError::RateLimit { retry_after_secs: 1 }.kind(), "rate_limit");
        assert_eq!(TrendkitError::Service { detail: String::new() }.kind(), "service");
    }
}
