//! # trendkit CLI — コマンドサーフェス
//!
//! 使い方:
//!   trendkit trend --limit 5
//!   trendkit rel 아이폰 --limit 5
//!   trendkit cmp 삼성 애플
//!   trendkit bulk --limit 100 --output trends.csv

use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use trendkit_core::client::{
    BulkRequest, CompareRequest, InterestRequest, RelatedRequest, TrendClient, TrendingRequest,
};
use trendkit_core::contracts::{Days, Format, Platform, TimeWindow};
use trendkit_core::projector::Projection;

#[derive(Parser, Debug)]
#[command(name = "trendkit", author, version, about = "Google Trends データ集約 CLI", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// リアルタイム急上昇キーワードを取得
    Trend {
        /// 地域コード
        #[arg(short, long, default_value = "KR")]
        geo: String,

        /// 取得件数
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,

        /// 出力フォーマット (minimal / standard / full)
        #[arg(short, long, default_value = "minimal")]
        format: String,

        /// JSON で出力
        #[arg(short, long)]
        json: bool,
    },
    /// 時間窓指定のバルク収集 (ファイル出力対応)
    Bulk {
        #[arg(short, long, default_value = "KR")]
        geo: String,

        /// 時間窓 (4 / 24 / 48 / 168)
        #[arg(long, default_value_t = 168)]
        hours: u32,

        #[arg(short = 'n', long, default_value_t = 100)]
        limit: usize,

        /// ニュース・関連語付きの封筒形式で収集
        #[arg(long)]
        enrich: bool,

        /// 出力ファイル (.csv / .json)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(short, long)]
        json: bool,
    },
    /// キーワードの関連検索語を取得
    Rel {
        /// 対象キーワード
        keyword: String,

        #[arg(short, long, default_value = "KR")]
        geo: String,

        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,

        #[arg(short, long)]
        json: bool,
    },
    /// 複数キーワードを平均関心度で比較
    Cmp {
        /// 比較するキーワード (最大 5)
        #[arg(required = true, num_args = 2..)]
        keywords: Vec<String>,

        #[arg(short, long, default_value = "KR")]
        geo: String,

        /// 期間 (日)
        #[arg(short, long, default_value_t = 90)]
        days: u32,

        #[arg(short, long)]
        json: bool,
    },
    /// 関心度の時系列 (履歴) を取得
    Hist {
        /// 分析するキーワード (最大 5)
        #[arg(required = true, num_args = 1..)]
        keywords: Vec<String>,

        #[arg(short, long, default_value = "KR")]
        geo: String,

        #[arg(short, long, default_value_t = 7)]
        days: u32,

        /// プラットフォーム (web / video / image / news)
        #[arg(short, long, default_value = "web")]
        platform: String,

        #[arg(short, long)]
        json: bool,
    },
    /// キャッシュ統計を表示
    Cache,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenvy::dotenv().ok();
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();
    let config = shared::config::TrendkitConfig::default();
    let client = Arc::new(TrendClient::new(
        infrastructure::default_backends(&config),
        &config,
    ));

    match args.command {
        Commands::Trend { geo, limit, format, json } => {
            let format = Format::from_str(&format)?;
            let result = client
                .trending(TrendingRequest {
                    region: Some(geo.clone()),
                    limit: Some(limit),
                    format,
                    ..TrendingRequest::default()
                })
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_projection(&geo, &result);
            }
        }

        Commands::Bulk { geo, hours, limit, enrich, output, json } => {
            let window = TimeWindow::try_from(hours)?;
            let report = client
                .trending_bulk(BulkRequest {
                    region: Some(geo),
                    window,
                    limit: Some(limit),
                    enrich,
                    output: output.clone(),
                    ..BulkRequest::default()
                })
                .await?;

            if let Some(path) = &report.written {
                println!("{} 件を {} に書き出しました", report.trends.len(), path.display());
            } else if json {
                match &report.envelope {
                    Some(envelope) => println!("{}", serde_json::to_string_pretty(envelope)?),
                    None => println!("{}", serde_json::to_string_pretty(report.trends.as_ref())?),
                }
            } else {
                for record in report.trends.iter() {
                    let rank = record.rank.map(|r| r.to_string()).unwrap_or_default();
                    println!("{:>3}. {}  [{}]", rank, record.keyword, record.traffic);
                }
            }
        }

        Commands::Rel { keyword, geo, limit, json } => {
            let result = client
                .related(
                    &keyword,
                    RelatedRequest {
                        region: Some(geo),
                        limit: Some(limit),
                        ..RelatedRequest::default()
                    },
                )
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("'{keyword}' の関連検索語:");
                for (i, term) in result.iter().enumerate() {
                    println!("  {}. {}", i + 1, term);
                }
            }
        }

        Commands::Cmp { keywords, geo, days, json } => {
            let days = Days::try_from(days)?;
            let scores = client
                .compare(
                    &keywords,
                    CompareRequest {
                        region: Some(geo),
                        days,
                        ..CompareRequest::default()
                    },
                )
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&scores)?);
            } else {
                let mut sorted: Vec<(&String, &f64)> = scores.iter().collect();
                sorted.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
                println!("キーワード比較 ({}日間):", days.as_u32());
                for (keyword, score) in sorted {
                    println!("  {:<12} {:>6.1}", keyword, score);
                }
            }
        }

        Commands::Hist { keywords, geo, days, platform, json } => {
            let days = Days::try_from(days)?;
            let platform = Platform::from_str(&platform)?;
            let series = client
                .interest(
                    &keywords,
                    InterestRequest {
                        region: Some(geo),
                        days,
                        platform,
                        ..InterestRequest::default()
                    },
                )
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&series)?);
            } else {
                println!("関心度の推移 ({}日間, {} 点):", days.as_u32(), series.len());
                for (keyword, values) in &series.values {
                    let avg = if values.is_empty() {
                        0.0
                    } else {
                        values.iter().sum::<u32>() as f64 / values.len() as f64
                    };
                    let min = values.iter().min().copied().unwrap_or(0);
                    let max = values.iter().max().copied().unwrap_or(0);
                    println!("  {keyword}: avg={avg:.1}, min={min}, max={max}");
                }
            }
        }

        Commands::Cache => {
            let stats = client.cache_stats();
            println!("hits: {}", stats.hits);
            println!("misses: {}", stats.misses);
            println!("hit_rate: {:.1}%", stats.hit_rate() * 100.0);
            println!("size: {} / {}", stats.size, stats.max_size);
        }
    }

    Ok(())
}

/// minimal は番号付きリスト、standard / full は簡易テーブルで表示する
fn print_projection(geo: &str, projection: &Projection) {
    match projection {
        Projection::Minimal(keywords) => {
            for (i, keyword) in keywords.iter().enumerate() {
                println!("{}. {}", i + 1, keyword);
            }
        }
        Projection::Standard(briefs) => {
            println!("Trending in {geo}:");
            for (i, brief) in briefs.iter().enumerate() {
                println!("{:>3}. {:<20} {}", i + 1, brief.keyword, brief.traffic);
            }
        }
        Projection::Full(records) => {
            println!("Trending in {geo}:");
            for (i, record) in records.iter().enumerate() {
                println!("{:>3}. {:<20} {}", i + 1, record.keyword, record.traffic);
                for news in &record.news {
                    println!("      - {} ({})", news.headline, news.source);
                }
            }
        }
    }
}
