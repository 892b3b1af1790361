//! # 設定
//!
//! 既定値 → `trendkit.toml` → 環境変数 (TRENDKIT_*) の順に上書きする。
//! ディスパッチ閾値やサーキット定数は情報源によって揺れがあるため、
//! すべてここで設定可能にしてある。

use serde::{Deserialize, Serialize};

/// trendkit 全体の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendkitConfig {
    /// 既定の地域コード
    pub default_region: String,
    /// fast バックエンドに任せる limit の天井 (これ超過で bulk へ)
    pub fast_limit_ceiling: usize,
    /// bulk 収集・limit 検証の上限
    pub bulk_limit_max: usize,
    /// compare / interest のキーワード数上限
    pub compare_keywords_max: usize,
    /// バックエンド 1 呼び出しのハードタイムアウト (秒)
    pub request_timeout_secs: u64,
    /// RateLimit / 一時的 Service 失敗のリトライ回数
    pub max_retries: u32,
    /// 指数バックオフの初項 (秒)
    pub backoff_base_secs: u64,
    /// サーキット開放までの連続失敗回数
    pub circuit_failure_threshold: u32,
    /// サーキット開放後の冷却時間 (秒)
    pub circuit_cooldown_secs: u64,
    /// キャッシュの最大エントリ数
    pub cache_max_entries: usize,
    /// キャッシュ既定 TTL (秒)
    pub cache_ttl_secs: u64,
    /// trend-server の待受ポート
    pub server_port: u16,
    /// 上流リクエストの User-Agent
    pub user_agent: String,
}

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36";

impl TrendkitConfig {
    /// 設定をファイルまたは環境変数から読み込む
    pub fn load() -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .set_default("default_region", "KR")?
            .set_default("fast_limit_ceiling", 20)?
            .set_default("bulk_limit_max", 100)?
            .set_default("compare_keywords_max", 5)?
            .set_default("request_timeout_secs", 30)?
            .set_default("max_retries", 3)?
            .set_default("backoff_base_secs", 1)?
            .set_default("circuit_failure_threshold", 5)?
            .set_default("circuit_cooldown_secs", 60)?
            .set_default("cache_max_entries", 1000)?
            .set_default("cache_ttl_secs", 300)?
            .set_default("server_port", 3020)?
            .set_default("user_agent", DEFAULT_USER_AGENT)?
            // trendkit.toml があれば読み込む
            .add_source(config::File::with_name("trendkit").required(false))
            // 環境変数 (TRENDKIT_*) があれば上書き
            .add_source(config::Environment::with_prefix("TRENDKIT"))
            .build()?;

        settings.try_deserialize()
    }
}

impl Default for TrendkitConfig {
    fn default() -> Self {
        Self::load().unwrap_or_else(|_| Self {
            default_region: "KR".to_string(),
            fast_limit_ceiling: 20,
            bulk_limit_max: 100,
            compare_keywords_max: 5,
            request_timeout_secs: 30,
            max_retries: 3,
            backoff_base_secs: 1,
            circuit_failure_threshold: 5,
            circuit_cooldown_secs: 60,
            cache_max_entries: 1000,
            cache_ttl_secs: 300,
            server_port: 3020,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_load_defaults() {
        let config = TrendkitConfig::default();
        assert_eq!(config.default_region, "KR");
        assert_eq!(config.fast_limit_ceiling, 20);
        assert_eq!(config.circuit_failure_threshold, 5);
        assert_eq!(config.cache_ttl_secs, 300);
    }

    #[test]
    fn test_config_load_from_file() {
        // 一時的な toml を作成 (拡張子でフォーマットを認識させる)
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "default_region = \"US\"").unwrap();
        writeln!(file, "fast_limit_ceiling = 10").unwrap();
        writeln!(file, "bulk_limit_max = 50").unwrap();
        writeln!(file, "compare_keywords_max = 5").unwrap();
        writeln!(file, "request_timeout_secs = 15").unwrap();
        writeln!(file, "max_retries = 2").unwrap();
        writeln!(file, "backoff_base_secs = 1").unwrap();
        writeln!(file, "circuit_failure_threshold = 3").unwrap();
        writeln!(file, "circuit_cooldown_secs = 30").unwrap();
        writeln!(file, "cache_max_entries = 100").unwrap();
        writeln!(file, "cache_ttl_secs = 60").unwrap();
        writeln!(file, "server_port = 4000").unwrap();
        writeln!(file, "user_agent = \"test-agent\"").unwrap();

        let settings = config::Config::builder()
            .add_source(config::File::from(file.path()))
            .build()
            .unwrap();

        let config: TrendkitConfig = settings.try_deserialize().unwrap();
        assert_eq!(config.default_region, "US");
        assert_eq!(config.fast_limit_ceiling, 10);
        assert_eq!(config.server_port, 4000);
    }
}
