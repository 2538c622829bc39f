//! Bounded recency cache of stored headers plus the current tip.
//!
//! Entries only enter the cache on write (and at start-up seeding); reads
//! use [`LruCache::peek`] so a long ancestor walk over old headers does not
//! evict the recent ones.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::header::StoredHeader;
use crate::types::Hash256;

/// Default number of headers kept in memory.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

pub struct HeaderCache {
    headers: LruCache<Hash256, StoredHeader>,
    tip: Option<StoredHeader>,
}

impl HeaderCache {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            headers: LruCache::new(capacity),
            tip: None,
        }
    }

    pub fn get(&self, hash: &Hash256) -> Option<&StoredHeader> {
        self.headers.peek(hash)
    }

    pub fn insert(&mut self, header: StoredHeader) {
        self.headers.put(header.hash(), header);
    }

    pub fn tip(&self) -> Option<&StoredHeader> {
        self.tip.as_ref()
    }

    pub fn set_tip(&mut self, tip: StoredHeader) {
        self.tip = Some(tip);
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.headers.cap().get()
    }

    pub fn clear(&mut self) {
        self.headers.clear();
        self.tip = None;
    }
}
