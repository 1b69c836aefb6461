use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::util::clock::Clock;

use super::{CacheError, CacheStore, CacheWrite};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    /// Member to its own expiry.
    Set(HashMap<String, i64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: i64,
}

/// In-process [`CacheStore`] whose expiry follows the injected clock.
#[derive(Debug)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>, CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError::Unavailable("memory cache lock poisoned".to_string()))
    }

    /// Live entries, after dropping anything past its TTL.
    fn live(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>, CacheError> {
        let now = self.clock.now();
        let mut entries = self.entries()?;
        entries.retain(|_, e| e.expires_at > now);
        Ok(entries)
    }

    pub fn len(&self) -> usize {
        self.live().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_empty_for_prefix(&self, prefix: &str) -> bool {
        self.live()
            .map(|e| !e.keys().any(|k| k.starts_with(prefix)))
            .unwrap_or(true)
    }

    /// Remaining TTL of a key, if it is live.
    pub fn ttl(&self, key: &str) -> Option<u64> {
        let now = self.clock.now();
        self.live()
            .ok()?
            .get(key)
            .map(|e| (e.expires_at - now) as u64)
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(read_str(&*self.live()?, key))
    }

    async fn set(&self, key: &str, value: String, ttl_secs: u64) -> Result<(), CacheError> {
        let now = self.clock.now();
        insert_str(&mut *self.live()?, key, value, now, ttl_secs);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.live()?.remove(key);
        Ok(())
    }

    async fn add_to_set(&self, key: &str, member: &str, ttl_secs: u64) -> Result<(), CacheError> {
        let now = self.clock.now();
        insert_member(&mut *self.live()?, key, member, now, ttl_secs);
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError> {
        let now = self.clock.now();
        match self.live()?.get(key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set
                .iter()
                .filter(|(_, exp)| **exp > now)
                .map(|(member, _)| member.clone())
                .collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let mut entries = self.live()?;
        let emptied = match entries.get_mut(key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => {
                set.remove(member);
                set.is_empty()
            }
            _ => false,
        };
        if emptied {
            entries.remove(key);
        }
        Ok(())
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        let entries = self.live()?;
        Ok(keys.iter().map(|key| read_str(&entries, key)).collect())
    }

    async fn write_batch(&self, writes: Vec<CacheWrite>) -> Result<(), CacheError> {
        let now = self.clock.now();
        let mut entries = self.live()?;
        for write in writes {
            match write {
                CacheWrite::Set {
                    key,
                    value,
                    ttl_secs,
                } => insert_str(&mut entries, &key, value, now, ttl_secs),
                CacheWrite::AddToSet {
                    key,
                    member,
                    ttl_secs,
                } => insert_member(&mut entries, &key, &member, now, ttl_secs),
            }
        }
        Ok(())
    }
}

fn read_str(entries: &HashMap<String, Entry>, key: &str) -> Option<String> {
    match entries.get(key) {
        Some(Entry {
            value: Value::Str(s),
            ..
        }) => Some(s.clone()),
        _ => None,
    }
}

fn insert_str(entries: &mut HashMap<String, Entry>, key: &str, value: String, now: i64, ttl_secs: u64) {
    entries.insert(
        key.to_string(),
        Entry {
            value: Value::Str(value),
            expires_at: now.saturating_add(ttl_secs as i64),
        },
    );
}

fn insert_member(entries: &mut HashMap<String, Entry>, key: &str, member: &str, now: i64, ttl_secs: u64) {
    let expires_at = now.saturating_add(ttl_secs as i64);
    let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
        value: Value::Set(HashMap::new()),
        expires_at,
    });

    if let Value::Str(_) = entry.value {
        entry.value = Value::Set(HashMap::new());
    }
    if let Value::Set(set) = &mut entry.value {
        set.retain(|_, exp| *exp > now);
        let exp = set.entry(member.to_string()).or_insert(expires_at);
        *exp = (*exp).max(expires_at);
        entry.expires_at = set.values().copied().max().unwrap_or(expires_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::clock::ManualClock;

    #[tokio::test]
    async fn values_expire_on_the_clock() {
        let clock = Arc::new(ManualClock::starting_at(100));
        let cache = MemoryCache::new(clock.clone());

        cache.set("k", "v".to_string(), 10).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(cache.ttl("k"), Some(10));

        clock.advance(10);
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn sets_extend_but_never_shorten_ttl() {
        let clock = Arc::new(ManualClock::starting_at(0));
        let cache = MemoryCache::new(clock.clone());

        cache.add_to_set("s", "a", 100).await.unwrap();
        cache.add_to_set("s", "b", 10).await.unwrap();
        assert_eq!(cache.ttl("s"), Some(100));

        let mut members = cache.set_members("s").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a".to_string(), "b".to_string()]);

        cache.remove_from_set("s", "a").await.unwrap();
        cache.remove_from_set("s", "b").await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn set_members_expire_individually() {
        let clock = Arc::new(ManualClock::starting_at(0));
        let cache = MemoryCache::new(clock.clone());

        cache.add_to_set("s", "long", 100).await.unwrap();
        cache.add_to_set("s", "short", 10).await.unwrap();

        clock.advance(10);
        assert_eq!(cache.set_members("s").await.unwrap(), vec!["long".to_string()]);

        // Re-adding refreshes a member and drops the dead ones.
        for _ in 0..50 {
            cache.add_to_set("s", "short", 10).await.unwrap();
            clock.advance(10);
        }
        assert_eq!(cache.set_members("s").await.unwrap(), Vec::<String>::new());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn get_ignores_sets() {
        let clock = Arc::new(ManualClock::starting_at(0));
        let cache = MemoryCache::new(clock);
        cache.add_to_set("s", "a", 100).await.unwrap();
        assert_eq!(cache.get("s").await.unwrap(), None);
        assert_eq!(cache.get_many(&["s".to_string()]).await.unwrap(), vec![None]);
    }
}
