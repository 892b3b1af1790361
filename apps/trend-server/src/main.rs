//! # trend-server — HTTP / ツール呼び出しサーフェス
//!
//! 5 操作を JSON API として公開し、`/api/tools` でツール定義の列挙と
//! 名前指定のツール実行も受け付ける。状態はすべて `TrendClient` に集約。

mod router;

use router::AppState;
use shared::health::HealthMonitor;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use trendkit_core::client::TrendClient;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();

    let config = shared::config::TrendkitConfig::default();
    let port = config.server_port;

    let client = Arc::new(TrendClient::new(
        infrastructure::default_backends(&config),
        &config,
    ));
    let state = Arc::new(AppState {
        client,
        monitor: Mutex::new(HealthMonitor::new()),
    });

    let app = router::create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("📊 trend-server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
