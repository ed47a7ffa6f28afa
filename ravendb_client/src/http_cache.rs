//! Conditional response cache.
//!
//! Entries are keyed by the full request url and hold the change vector the server sent along with
//! the response body. The executor sends the change vector back as `If-None-Match`, and a `304`
//! answer lets it reuse the cached body without transferring it again.
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use lru::LruCache;

/// Default budget of 128 MiB.
pub const DEFAULT_MAX_HTTP_CACHE_SIZE: usize = 128 * 1024 * 1024;

#[derive(Debug, Clone)]
struct HttpCacheItem {
    change_vector: String,
    response: Option<String>,
    not_found: bool,
    last_server_update: Instant,
    generation: u64,
    /// Value of the modification epoch when the server last confirmed this entry.
    validated_epoch: u64,
}

impl HttpCacheItem {
    fn size(&self, url: &str) -> usize {
        url.len() + self.change_vector.len() + self.response.as_ref().map_or(0, |r| r.len())
    }
}

#[derive(Debug)]
struct HttpCacheInner {
    items: LruCache<String, HttpCacheItem>,
    max_size: usize,
    total_size: usize,
    generation: u64,
    modification_epoch: u64,
}

impl HttpCacheInner {
    fn insert(&mut self, url: &str, item: HttpCacheItem) {
        let size = item.size(url);
        if let Some(old) = self.items.put(url.to_string(), item) {
            self.total_size -= old.size(url);
        }
        self.total_size += size;

        while self.total_size > self.max_size {
            match self.items.pop_lru() {
                Some((key, evicted)) => {
                    self.total_size -= evicted.size(&key);
                    tracing::trace!(url = %key, "Evicted http cache entry");
                }
                None => break,
            }
        }
    }
}

/// Bounded, LRU-evicted cache of server responses. Cloning shares the underlying storage.
#[derive(Debug, Clone)]
pub struct HttpCache {
    inner: Arc<Mutex<HttpCacheInner>>,
}

impl HttpCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HttpCacheInner {
                items: LruCache::unbounded(),
                max_size,
                total_size: 0,
                generation: 0,
                modification_epoch: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HttpCacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, url: &str, change_vector: &str, response: String) {
        let mut inner = self.lock();
        let item = HttpCacheItem {
            change_vector: change_vector.to_string(),
            response: Some(response),
            not_found: false,
            last_server_update: Instant::now(),
            generation: inner.generation,
            validated_epoch: inner.modification_epoch,
        };
        inner.insert(url, item);
    }

    /// Caches a `404` for `url` so the next lookup can be answered without a body.
    pub fn set_not_found(&self, url: &str) {
        let mut inner = self.lock();
        let item = HttpCacheItem {
            change_vector: "404 response".to_string(),
            response: None,
            not_found: true,
            last_server_update: Instant::now(),
            generation: inner.generation,
            validated_epoch: inner.modification_epoch,
        };
        inner.insert(url, item);
    }

    /// Looks up `url`. Entries written before the last [`clear`](Self::clear) or
    /// [`invalidate`](Self::invalidate) are never returned.
    pub fn get(&self, url: &str) -> ReleaseCacheItem {
        let mut inner = self.lock();
        let generation = inner.generation;
        let epoch = inner.modification_epoch;

        let item = match inner.items.get(url).cloned() {
            Some(item) if item.generation == generation => Some(item),
            Some(_) => {
                // Written before an invalidation. Drop it now instead of waiting for eviction.
                if let Some(stale) = inner.items.pop(url) {
                    inner.total_size -= stale.size(url);
                }
                None
            }
            None => None,
        };

        let might_have_been_modified = item
            .as_ref()
            .map(|i| i.validated_epoch != epoch)
            .unwrap_or(false);

        ReleaseCacheItem {
            cache: self.clone(),
            url: url.to_string(),
            item,
            might_have_been_modified,
        }
    }

    /// Drops every entry and starts a new generation.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.items.clear();
        inner.total_size = 0;
        inner.generation += 1;
    }

    /// Starts a new generation without dropping entries eagerly. Older entries become invisible.
    pub fn invalidate(&self) {
        self.lock().generation += 1;
    }

    /// Marks every entry as possibly stale. Entries stay usable for conditional requests, but are no
    /// longer served aggressively until the server confirms them again.
    pub fn notify_possible_modification(&self) {
        self.lock().modification_epoch += 1;
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn number_of_items(&self) -> usize {
        self.lock().items.len()
    }

    pub fn total_size(&self) -> usize {
        self.lock().total_size
    }
}

/// Result of a cache lookup.
///
/// Holds a snapshot of the entry as it was at lookup time. Confirming it with
/// [`not_modified`](Self::not_modified) only touches the stored entry if it is still the one that
/// was looked up, so an outstanding handle never corrupts a newer write.
#[derive(Debug)]
pub struct ReleaseCacheItem {
    cache: HttpCache,
    url: String,
    item: Option<HttpCacheItem>,
    might_have_been_modified: bool,
}

impl ReleaseCacheItem {
    pub fn is_hit(&self) -> bool {
        self.item.is_some()
    }

    pub fn change_vector(&self) -> Option<&str> {
        self.item.as_ref().map(|i| i.change_vector.as_str())
    }

    pub fn response(&self) -> Option<&str> {
        self.item.as_ref().and_then(|i| i.response.as_deref())
    }

    pub fn is_not_found(&self) -> bool {
        self.item.as_ref().map(|i| i.not_found).unwrap_or(false)
    }

    /// Time since the server last confirmed this entry.
    pub fn age(&self) -> Duration {
        self.item
            .as_ref()
            .map(|i| i.last_server_update.elapsed())
            .unwrap_or(Duration::MAX)
    }

    pub fn might_have_been_modified(&self) -> bool {
        self.might_have_been_modified
    }

    /// The server answered `304`: the cached body is still current.
    pub fn not_modified(&self) {
        let Some(snapshot) = &self.item else {
            return;
        };

        let mut inner = self.cache.lock();
        let epoch = inner.modification_epoch;
        let generation = inner.generation;
        if let Some(stored) = inner.items.peek_mut(&self.url) {
            if stored.generation == generation
                && stored.generation == snapshot.generation
                && stored.change_vector == snapshot.change_vector
            {
                stored.last_server_update = Instant::now();
                stored.validated_epoch = epoch;
            }
        }
    }
}
