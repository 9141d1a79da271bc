//! Bounded cache of decoded patches.
//!
//! Keyed by patch id, evicting the least recently used entry once the
//! capacity is reached. A miss is not an error: the log re-reads the record
//! and decodes it again.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::log::LogError;
use crate::patch::Patch;
use crate::types::Id;

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<Id, Patch>,
    /// Front is least recently used.
    order: VecDeque<Id>,
}

impl CacheInner {
    fn touch(&mut self, id: &Id) {
        let found = self
            .order
            .iter()
            .position(|k| k == id)
            .and_then(|pos| self.order.remove(pos));
        if let Some(key) = found {
            self.order.push_back(key);
        }
    }
}

#[derive(Debug)]
pub struct PatchCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl PatchCache {
    /// A cache holding at most `capacity` patches. A capacity of 0 caches
    /// nothing.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheInner>, LogError> {
        self.inner.lock().map_err(|_| LogError::LockPoisoned)
    }

    pub fn get(&self, id: &Id) -> Result<Option<Patch>, LogError> {
        let mut inner = self.lock()?;
        let Some(patch) = inner.entries.get(id).cloned() else {
            return Ok(None);
        };
        inner.touch(id);
        Ok(Some(patch))
    }

    pub fn put(&self, id: Id, patch: Patch) -> Result<(), LogError> {
        if self.capacity == 0 {
            return Ok(());
        }
        let mut inner = self.lock()?;
        if inner.entries.insert(id.clone(), patch).is_some() {
            inner.touch(&id);
            return Ok(());
        }
        inner.order.push_back(id);
        while inner.entries.len() > self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
        }
        Ok(())
    }

    pub fn remove(&self, id: &Id) -> Result<(), LogError> {
        let mut inner = self.lock()?;
        if inner.entries.remove(id).is_some() {
            inner.order.retain(|k| k != id);
        }
        Ok(())
    }

    pub fn len(&self) -> Result<usize, LogError> {
        Ok(self.lock()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, LogError> {
        Ok(self.len()? == 0)
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::PatchHeader;
    use std::sync::Arc;

    fn patch(id: &Id) -> Patch {
        Patch::transaction(PatchHeader::with_ids(id, None), Vec::new())
    }

    fn cached(cache: &PatchCache, id: &Id) -> bool {
        cache.get(id).expect("get").is_some()
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = PatchCache::new(2);
        let (a, b, c) = (Id::new(), Id::new(), Id::new());
        cache.put(a.clone(), patch(&a)).expect("put");
        cache.put(b.clone(), patch(&b)).expect("put");
        // Touch a so b becomes the oldest.
        assert!(cached(&cache, &a));
        cache.put(c.clone(), patch(&c)).expect("put");

        assert_eq!(cache.len().expect("len"), 2);
        assert!(cached(&cache, &a));
        assert!(!cached(&cache, &b));
        assert!(cached(&cache, &c));
    }

    #[test]
    fn test_zero_capacity_caches_nothing() {
        let cache = PatchCache::new(0);
        let a = Id::new();
        cache.put(a.clone(), patch(&a)).expect("put");
        assert!(cache.is_empty().expect("empty"));
    }

    #[test]
    fn test_remove() {
        let cache = PatchCache::new(4);
        let a = Id::new();
        cache.put(a.clone(), patch(&a)).expect("put");
        cache.remove(&a).expect("remove");
        assert!(!cached(&cache, &a));
        assert!(cache.is_empty().expect("empty"));
    }

    #[test]
    fn test_poisoned_cache_reports_lock_poisoned() {
        let cache = Arc::new(PatchCache::new(4));
        let poisoner = Arc::clone(&cache);
        let result = std::thread::spawn(move || {
            let _guard = poisoner.inner.lock().expect("lock");
            panic!("poison the cache");
        })
        .join();
        assert!(result.is_err());

        let a = Id::new();
        assert!(matches!(cache.get(&a), Err(LogError::LockPoisoned)));
        assert!(matches!(cache.put(a.clone(), patch(&a)), Err(LogError::LockPoisoned)));
    }
}
