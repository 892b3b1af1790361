//! # キャッシュ層
//!
//! (operation, パラメータ) → canonical 結果集合の有界メモ。
//! LRU 追い出し + 遅延 TTL 失効 + 同一キー同時ミスの合流 (stampede 防止)。
//! ヒットは Dispatcher にも Resilience Wrapper にも一切触れない。
//!
//! 合流の仕組み: 最初の呼び出し側が leader となり、fetch を独立タスクとして
//! 起動して結果を broadcast する。待機者 (leader 含む) は全員 receiver を
//! 待つだけなので、個々の呼び出し側が途中で離脱しても共有 fetch は落ちない。

use crate::contracts::CachedPayload;
use crate::error::TrendkitError;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// キャッシュ統計
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub max_size: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Entry {
    value: CachedPayload,
    expires_at: Instant,
    /// LRU 順序用の論理時刻 (大きいほど最近)
    touched: u64,
}

struct CacheInner {
    entries: HashMap<u64, Entry>,
    clock: u64,
    hits: u64,
    misses: u64,
}

type FetchResult = Result<CachedPayload, TrendkitError>;

/// 有界 TTL キャッシュ本体。
/// `inner` と `inflight` は別ロック — fetch 進行中でも他キーの読み書きは進む。
/// どちらのロックも `.await` をまたいで保持しない。
pub struct TrendCache {
    inner: Mutex<CacheInner>,
    inflight: Mutex<HashMap<u64, broadcast::Sender<FetchResult>>>,
    max_size: usize,
    default_ttl: Duration,
}

impl TrendCache {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                clock: 0,
                hits: 0,
                misses: 0,
            }),
            inflight: Mutex::new(HashMap::new()),
            max_size: max_size.max(1),
            default_ttl,
        }
    }

    /// 取得。失効済みエントリはこのタイミングで捨てられ miss になる。
    pub fn get(&self, key: u64) -> Option<CachedPayload> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        let expired = match inner.entries.get(&key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) => now >= entry.expires_at,
        };

        if expired {
            inner.entries.remove(&key);
            inner.misses += 1;
            return None;
        }

        inner.clock += 1;
        let clock = inner.clock;
        inner.hits += 1;
        let entry = inner.entries.get_mut(&key)?;
        entry.touched = clock;
        Some(entry.value.clone())
    }

    /// 保存。容量到達時は最も古く触られたエントリから追い出す。
    pub fn put(&self, key: u64, value: CachedPayload, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        while inner.entries.len() >= self.max_size && !inner.entries.contains_key(&key) {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.touched)
                .map(|(k, _)| *k);
            match oldest {
                Some(k) => inner.entries.remove(&k),
                None => break,
            };
        }

        inner.clock += 1;
        let touched = inner.clock;
        inner.entries.insert(
            key,
            Entry { value, expires_at: Instant::now() + ttl, touched },
        );
    }

    /// key 指定でそのエントリを、None で全エントリを破棄する。戻り値は破棄件数。
    pub fn invalidate(&self, key: Option<u64>) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match key {
            Some(k) => usize::from(inner.entries.remove(&k).is_some()),
            None => {
                let count = inner.entries.len();
                inner.entries.clear();
                count
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.entries.len(),
            max_size: self.max_size,
        }
    }

    /// ミス時の合流取得。同一キーの同時ミスは 1 本の fetch に束ねられ、
    /// 全待機者が同じ結果 (または同じエラー) を受け取る。
    pub async fn get_or_fetch<F, Fut>(
        self: &Arc<Self>,
        key: u64,
        ttl: Option<Duration>,
        fetch: F,
    ) -> FetchResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult> + Send + 'static,
    {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }

        let mut rx = {
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            match inflight.get(&key) {
                Some(tx) => tx.subscribe(),
                None => {
                    let (tx, rx) = broadcast::channel(1);
                    inflight.insert(key, tx.clone());
                    let cache = Arc::clone(self);
                    let fut = fetch();
                    tokio::spawn(async move {
                        let result = fut.await;
                        if let Ok(value) = &result {
                            cache.put(key, value.clone(), ttl);
                        }
                        // 保存 → in-flight 解除 → 配信 の順。後続は必ず
                        // キャッシュヒットか既存 receiver のどちらかに当たる。
                        cache
                            .inflight
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .remove(&key);
                        let _ = tx.send(result);
                    });
                    rx
                }
            }
        };

        match rx.recv().await {
            Ok(result) => result,
            Err(_) => Err(TrendkitError::Service {
                detail: "合流先の fetch が結果を配信せず終了".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::TrendRecord;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn payload(keyword: &str) -> CachedPayload {
        CachedPayload::records(vec![TrendRecord::new(keyword, "1000+")])
    }

    fn keyword_of(payload: &CachedPayload) -> String {
        match payload {
            CachedPayload::Records(records) => records[0].keyword.clone(),
            _ => panic!("records payload expected"),
        }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let cache = TrendCache::new(10, Duration::from_secs(300));
        assert!(cache.get(1).is_none());
        cache.put(1, payload("환율"), None);
        assert_eq!(keyword_of(&cache.get(1).unwrap()), "환율");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_a_miss_and_evicted() {
        let cache = TrendCache::new(10, Duration::from_secs(60));
        cache.put(1, payload("환율"), None);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get(1).is_none());
        assert_eq!(cache.stats().size, 0);
    }

    #[tokio::test]
    async fn test_lru_eviction_at_capacity() {
        let cache = TrendCache::new(2, Duration::from_secs(300));
        cache.put(1, payload("a"), None);
        cache.put(2, payload("b"), None);
        // key=1 に触れて最近使用にする
        assert!(cache.get(1).is_some());
        cache.put(3, payload("c"), None);

        assert!(cache.get(1).is_some(), "recently used entry must survive");
        assert!(cache.get(2).is_none(), "least recently used entry must be evicted");
        assert!(cache.get(3).is_some());
    }

    #[tokio::test]
    async fn test_invalidate_single_and_all() {
        let cache = TrendCache::new(10, Duration::from_secs(300));
        cache.put(1, payload("a"), None);
        cache.put(2, payload("b"), None);
        assert_eq!(cache.invalidate(Some(1)), 1);
        assert_eq!(cache.invalidate(Some(1)), 0);
        assert_eq!(cache.invalidate(None), 1);
        assert_eq!(cache.stats().size, 0);
    }

    #[tokio::test]
    async fn test_concurrent_identical_misses_coalesce_to_one_fetch() {
        let cache = Arc::new(TrendCache::new(10, Duration::from_secs(300)));
        let fetches = Arc::new(AtomicU32::new(0));

        let spawn_caller = |cache: Arc<TrendCache>, fetches: Arc<AtomicU32>| async move {
            cache
                .get_or_fetch(42, None, move || async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(payload("공유"))
                })
                .await
        };

        let (a, b, c) = tokio::join!(
            spawn_caller(Arc::clone(&cache), Arc::clone(&fetches)),
            spawn_caller(Arc::clone(&cache), Arc::clone(&fetches)),
            spawn_caller(Arc::clone(&cache), Arc::clone(&fetches)),
        );

        assert_eq!(keyword_of(&a.unwrap()), "공유");
        assert_eq!(keyword_of(&b.unwrap()), "공유");
        assert_eq!(keyword_of(&c.unwrap()), "공유");
        assert_eq!(fetches.load(Ordering::SeqCst), 1, "exactly one backend fetch");

        // 完了後は通常のヒット
        assert!(cache.get(42).is_some());
    }

    #[tokio::test]
    async fn test_coalesced_error_reaches_all_waiters() {
        let cache = Arc::new(TrendCache::new(10, Duration::from_secs(300)));
        let fetches = Arc::new(AtomicU32::new(0));

        let spawn_caller = |cache: Arc<TrendCache>, fetches: Arc<AtomicU32>| async move {
            cache
                .get_or_fetch(7, None, move || async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Err(TrendkitError::RateLimit { retry_after_secs: 60 })
                })
                .await
        };

        let (a, b) = tokio::join!(
            spawn_caller(Arc::clone(&cache), Arc::clone(&fetches)),
            spawn_caller(Arc::clone(&cache), Arc::clone(&fetches)),
        );

        assert_eq!(a.unwrap_err().kind(), "rate_limit");
        assert_eq!(b.unwrap_err().kind(), "rate_limit");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        // 失敗は保存されない
        assert!(cache.get(7).is_none());
    }

    #[tokio::test]
    async fn test_waiter_cancellation_does_not_cancel_shared_fetch() {
        let cache = Arc::new(TrendCache::new(10, Duration::from_secs(300)));

        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_fetch(9, None, || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(payload("생존"))
                    })
                    .await
            })
        };

        // leader 側の待機を途中で打ち切る
        tokio::time::sleep(Duration::from_millis(10)).await;
        waiter.abort();

        // 共有 fetch 自体は独立タスクとして完走し、結果はキャッシュに残る
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.get(9).is_some());
    }
}
