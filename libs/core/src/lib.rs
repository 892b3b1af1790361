//! # Core — 集約コア層
//!
//! trendkit のドメインロジックを定義する。検索トレンド信号を 3 系統の
//! 収集経路から取り出し、LLM トークン効率の良い形へ正規化して返す。
//! 具体的な収集実装は `infrastructure` クレートに委譲する (依存性逆転の原則)。

pub mod cache;
pub mod client;
pub mod contracts;
pub mod dispatcher;
pub mod error;
pub mod projector;
pub mod resilience;
pub mod traits;

pub use client::{
    BulkReport, BulkRequest, CacheControl, CompareRequest, InterestRequest, RelatedRequest,
    TrendClient, TrendingRequest,
};
pub use contracts::{
    CompareScores, Days, Format, InterestSeries, Operation, Platform, TimeWindow, TrendQuery,
    TrendRecord, SUPPORTED_REGIONS,
};
pub use error::TrendkitError;
pub use projector::Projection;
pub use traits::{BackendClass, TrendBackend};
