use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};

#[derive(Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub expires_at: DateTime<Utc>,
}

/// 带过期时间的内存缓存，目前用于飞书 tenant_access_token
#[derive(Clone)]
pub struct Cache<T: Clone> {
    store: Arc<RwLock<HashMap<String, CacheEntry<T>>>>,
    /// 提前失效的余量，避免拿到即将过期的值
    margin: Duration,
}

impl<T: Clone> Cache<T> {
    pub fn new(margin: Duration) -> Self {
        Self {
            store: Arc::new(RwLock::new(HashMap::new())),
            margin,
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        let store = match self.store.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        store
            .get(key)
            .filter(|entry| entry.expires_at > Utc::now())
            .map(|entry| entry.data.clone())
    }

    pub fn set(&self, key: String, data: T, ttl: Duration) {
        let mut store = match self.store.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        store.insert(
            key,
            CacheEntry {
                data,
                expires_at: Utc::now() + ttl - self.margin,
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        let mut store = match self.store.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        store.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_with_margin() {
        let cache = Cache::new(Duration::seconds(60));
        cache.set("token".to_string(), "t-1".to_string(), Duration::seconds(7200));
        assert_eq!(cache.get("token").as_deref(), Some("t-1"));

        // 有效期短于余量，立即视为过期
        cache.set("short".to_string(), "t-2".to_string(), Duration::seconds(30));
        assert_eq!(cache.get("short"), None);
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = Cache::new(Duration::zero());
        cache.set("k".to_string(), 1u32, Duration::seconds(100));
        cache.invalidate("k");
        assert_eq!(cache.get("k"), None);
    }
}
