use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Injectable time source so cache expiry is testable with a fake clock.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }
}

#[derive(Debug)]
struct CacheInner<V> {
    entries: HashMap<String, (i64, V)>,
    order: VecDeque<(String, i64)>,
}

/// Bounded per-process TTL cache for configuration reads (tenant config,
/// resolved secrets). Injected as a dependency rather than a module-level
/// singleton; `invalidate` is the explicit hook for admin-driven changes.
pub struct TtlCache<V> {
    inner: Mutex<CacheInner<V>>,
    ttl_ms: i64,
    max_entries: usize,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl_ms: i64, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            ttl_ms,
            max_entries: max_entries.max(16),
        }
    }

    pub fn get(&self, key: &str, clock: &dyn Clock) -> Option<V> {
        let now = clock.now_ms();
        let inner = self.inner.lock().expect("cache lock poisoned");
        match inner.entries.get(key) {
            Some((stored_at, v)) if now - stored_at < self.ttl_ms => Some(v.clone()),
            _ => None,
        }
    }

    pub fn put(&self, key: &str, value: V, clock: &dyn Clock) {
        let now = clock.now_ms();
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let key = key.to_string();
        inner.entries.insert(key.clone(), (now, value));
        inner.order.push_back((key, now));

        while inner.entries.len() > self.max_entries {
            let Some((evict_key, evict_ts)) = inner.order.pop_front() else {
                break;
            };
            if inner
                .entries
                .get(&evict_key)
                .is_some_and(|(ts, _)| *ts == evict_ts)
            {
                inner.entries.remove(&evict_key);
            }
        }
    }

    pub fn invalidate(&self, key: &str) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.entries.remove(key);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.entries.clear();
        inner.order.clear();
    }
}
