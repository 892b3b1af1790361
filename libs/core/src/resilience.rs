//! # 回復性レイヤ
//!
//! すべてのバックエンド呼び出しを 1 箇所で包む:
//! タイムアウト、指数バックオフ付きリトライ、バックエンド単位の
//! サーキットブレーカ。`BackendHealth` を変更するのはこの層だけで、
//! Dispatcher は読むだけ。

use crate::error::TrendkitError;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// リトライ方針。バックオフは base * 2^attempt (上限 max_delay)。
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// attempt 回目 (0 始まり) のリトライ前に待つ時間
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// サーキットブレーカ方針
#[derive(Debug, Clone, Copy)]
pub struct CircuitPolicy {
    /// 連続失敗がこの回数に達したら開放
    pub failure_threshold: u32,
    /// 開放後の冷却時間
    pub cooldown: Duration,
}

impl Default for CircuitPolicy {
    fn default() -> Self {
        Self { failure_threshold: 5, cooldown: Duration::from_secs(60) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// バックエンド 1 本分の健全性。レジストリ内の per-backend Mutex で保護される。
#[derive(Debug)]
struct BackendHealth {
    consecutive_failures: u32,
    state: CircuitState,
    opened_at: Option<Instant>,
    /// half-open の試験呼び出しが進行中か (同時試験を 1 本に制限)
    probe_in_flight: bool,
}

impl BackendHealth {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            state: CircuitState::Closed,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

/// ゲート判定: 呼び出し前にサーキット状態を確認する
enum Gate {
    Allow,
    /// half-open の単独試験として許可
    Probe,
    /// 開放中。残り冷却秒数を添えて即時拒否
    Blocked { remaining_secs: u64 },
}

/// 健全性スナップショット (監視用)
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub backend: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

/// 全バックエンドの健全性レジストリ。
/// バックエンドごとに独立した Mutex を持ち、横断ロックは存在しない。
pub struct HealthRegistry {
    slots: HashMap<&'static str, Mutex<BackendHealth>>,
    policy: CircuitPolicy,
}

impl HealthRegistry {
    pub fn new(names: impl IntoIterator<Item = &'static str>, policy: CircuitPolicy) -> Self {
        let slots = names
            .into_iter()
            .map(|name| (name, Mutex::new(BackendHealth::new())))
            .collect();
        Self { slots, policy }
    }

    fn with_slot<T>(&self, name: &str, f: impl FnOnce(&mut BackendHealth) -> T) -> Option<T> {
        self.slots.get(name).map(|slot| {
            let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut guard)
        })
    }

    /// Dispatcher が経路決定前に読む: 現在開放中 (冷却未了) か
    pub fn is_open(&self, name: &str) -> bool {
        let cooldown = self.policy.cooldown;
        self.with_slot(name, |health| {
            health.state == CircuitState::Open
                && health
                    .opened_at
                    .map(|at| at.elapsed() < cooldown)
                    .unwrap_or(false)
        })
        .unwrap_or(false)
    }

    fn gate(&self, name: &str) -> Gate {
        let cooldown = self.policy.cooldown;
        self.with_slot(name, |health| match health.state {
            CircuitState::Closed => Gate::Allow,
            CircuitState::Open => {
                let elapsed = health.opened_at.map(|at| at.elapsed()).unwrap_or(cooldown);
                if elapsed >= cooldown {
                    // 冷却完了 → half-open に遷移し、この呼び出しを単独試験にする
                    health.state = CircuitState::HalfOpen;
                    health.probe_in_flight = true;
                    Gate::Probe
                } else {
                    Gate::Blocked {
                        remaining_secs: (cooldown - elapsed).as_secs().max(1),
                    }
                }
            }
            CircuitState::HalfOpen => {
                if health.probe_in_flight {
                    Gate::Blocked { remaining_secs: 1 }
                } else {
                    health.probe_in_flight = true;
                    Gate::Probe
                }
            }
        })
        .unwrap_or(Gate::Allow)
    }

    /// 成功: サーキットを閉じ、連続失敗カウンタをリセット
    pub fn record_success(&self, name: &str) {
        self.with_slot(name, |health| {
            health.consecutive_failures = 0;
            health.state = CircuitState::Closed;
            health.opened_at = None;
            health.probe_in_flight = false;
        });
    }

    /// 失敗 (各試行ごとに 1 回)。閾値到達または half-open 試験失敗で開放。
    pub fn record_failure(&self, name: &str) {
        let threshold = self.policy.failure_threshold;
        let reopened = self.with_slot(name, |health| {
            health.consecutive_failures = health.consecutive_failures.saturating_add(1);
            let trip = match health.state {
                CircuitState::HalfOpen => true,
                CircuitState::Closed => health.consecutive_failures >= threshold,
                CircuitState::Open => false,
            };
            if trip {
                health.state = CircuitState::Open;
                health.opened_at = Some(Instant::now());
                health.probe_in_flight = false;
            }
            trip
        });
        if reopened == Some(true) {
            tracing::warn!("circuit opened for backend '{}'", name);
        }
    }

    pub fn snapshot(&self) -> Vec<HealthReport> {
        let mut reports: Vec<HealthReport> = self
            .slots
            .iter()
            .map(|(name, slot)| {
                let guard = slot.lock().unwrap_or_else(|e| e.into_inner());
                HealthReport {
                    backend: name.to_string(),
                    state: guard.state,
                    consecutive_failures: guard.consecutive_failures,
                }
            })
            .collect();
        reports.sort_by(|a, b| a.backend.cmp(&b.backend));
        reports
    }
}

/// バックエンド呼び出し 1 回分を包む実行器
#[derive(Clone)]
pub struct ResilientCaller {
    health: Arc<HealthRegistry>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl ResilientCaller {
    pub fn new(health: Arc<HealthRegistry>, retry: RetryPolicy, call_timeout: Duration) -> Self {
        Self { health, retry, call_timeout }
    }

    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    /// 1 論理呼び出しを実行する。
    /// - サーキット開放中は即時 `Unavailable` (バックエンドには触れない)
    /// - タイムアウトは `Timeout` (部分結果は呼び出し側で添付)、リトライしない
    /// - `RateLimit`/`Service` のみ max_retries 回まで指数バックオフでリトライ
    /// - 成功・各試行失敗のすべてで健全性を更新してから制御を返す
    pub async fn invoke<T, F, Fut>(
        &self,
        backend: &'static str,
        mut op: F,
    ) -> Result<T, TrendkitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TrendkitError>> + Send,
        T: Send,
    {
        match self.health.gate(backend) {
            Gate::Blocked { remaining_secs } => {
                return Err(TrendkitError::Unavailable {
                    backend: backend.to_string(),
                    hint: format!("サーキット開放中: 約{remaining_secs}秒後に再試行"),
                });
            }
            Gate::Probe => {
                tracing::info!("half-open probe for backend '{}'", backend);
            }
            Gate::Allow => {}
        }

        let mut attempt = 0u32;
        loop {
            match tokio::time::timeout(self.call_timeout, op()).await {
                Err(_elapsed) => {
                    self.health.record_failure(backend);
                    tracing::warn!(
                        "backend '{}' timed out after {}s",
                        backend,
                        self.call_timeout.as_secs()
                    );
                    return Err(TrendkitError::Timeout {
                        timeout_secs: self.call_timeout.as_secs(),
                        partial: Vec::new(),
                    });
                }
                Ok(Ok(value)) => {
                    self.health.record_success(backend);
                    return Ok(value);
                }
                Ok(Err(err)) => {
                    self.health.record_failure(backend);
                    if err.is_retryable() && attempt < self.retry.max_retries {
                        let delay = self.retry.delay(attempt);
                        tracing::warn!(
                            "backend '{}' attempt {} failed ({}), retrying in {:?}",
                            backend,
                            attempt + 1,
                            err.kind(),
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }
}
