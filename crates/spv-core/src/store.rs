//! Header persistence.
//!
//! Two layers:
//!
//! - [`HeaderBackend`]: raw persistence of headers keyed by hash plus one tip
//!   record, written together in a single atomic batch. The in-memory
//!   [`MemoryBackend`] lives here; the RocksDB backend lives in `spv-client`.
//! - [`CachedHeaderStore`]: wraps a backend with a [`HeaderCache`] and
//!   implements [`HeaderStore`], the interface the chain engine consumes.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::cache::HeaderCache;
use crate::error::StoreError;
use crate::header::StoredHeader;
use crate::types::Hash256;

/// Read-only header lookup. Enough for ancestor walks and locators.
pub trait HeaderLookup {
    /// Fetch a stored header by hash.
    fn get(&self, hash: &Hash256) -> Result<StoredHeader, StoreError>;

    /// Fetch a header's parent.
    ///
    /// Genesis (height 0) has no stored parent; its parent is the zero-work
    /// [`StoredHeader::synthetic_root`], and so is the root's own parent.
    fn get_previous(&self, header: &StoredHeader) -> Result<StoredHeader, StoreError> {
        if header.height() == 0 {
            return Ok(StoredHeader::synthetic_root());
        }
        self.get(header.previous())
    }
}

/// The header store consumed by the chain engine.
pub trait HeaderStore: HeaderLookup + Send + Sync {
    /// The current best header. [`StoreError::NoTip`] on an empty store.
    fn get_best(&self) -> Result<StoredHeader, StoreError>;

    /// Persist a header and, if `new_tip`, make it the tip, atomically.
    fn put(&self, header: &StoredHeader, new_tip: bool) -> Result<(), StoreError>;

    /// Remove every header and the tip.
    fn clear(&self) -> Result<(), StoreError>;

    /// Flush and release resources.
    fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Raw header persistence.
pub trait HeaderBackend: Send + Sync {
    fn get_header(&self, hash: &Hash256) -> Result<Option<StoredHeader>, StoreError>;

    fn get_tip(&self) -> Result<Option<StoredHeader>, StoreError>;

    /// Write the header and, if `new_tip`, the tip record in one batch.
    /// On error neither write is visible.
    fn put_header(&self, header: &StoredHeader, new_tip: bool) -> Result<(), StoreError>;

    fn clear(&self) -> Result<(), StoreError>;

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Volatile backend for tests and short-lived clients.
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    headers: HashMap<Hash256, StoredHeader>,
    tip: Option<StoredHeader>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().headers.is_empty()
    }
}

impl HeaderBackend for MemoryBackend {
    fn get_header(&self, hash: &Hash256) -> Result<Option<StoredHeader>, StoreError> {
        Ok(self.inner.read().headers.get(hash).cloned())
    }

    fn get_tip(&self) -> Result<Option<StoredHeader>, StoreError> {
        Ok(self.inner.read().tip.clone())
    }

    fn put_header(&self, header: &StoredHeader, new_tip: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner.headers.insert(header.hash(), header.clone());
        if new_tip {
            inner.tip = Some(header.clone());
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner.headers.clear();
        inner.tip = None;
        Ok(())
    }
}

/// A [`HeaderBackend`] fronted by a bounded recency cache.
///
/// The cache is only touched after the backend write succeeds, so a failed
/// [`put`](HeaderStore::put) leaves both layers as they were.
pub struct CachedHeaderStore<B> {
    backend: B,
    cache: RwLock<HeaderCache>,
}

impl<B: HeaderBackend> CachedHeaderStore<B> {
    /// Wrap `backend`, seeding the cache with the tip and up to
    /// `capacity - 1` of its ancestors.
    pub fn new(backend: B, capacity: usize) -> Result<Self, StoreError> {
        let store = Self {
            backend,
            cache: RwLock::new(HeaderCache::new(capacity)),
        };
        store.seed_cache()?;
        Ok(store)
    }

    fn seed_cache(&self) -> Result<(), StoreError> {
        let Some(tip) = self.backend.get_tip()? else {
            return Ok(());
        };
        let mut cache = self.cache.write();
        let mut chain = vec![tip.clone()];
        while chain.len() < cache.capacity() {
            let Some(last) = chain.last() else { break };
            if last.height() == 0 {
                break;
            }
            match self.backend.get_header(last.previous())? {
                Some(parent) => chain.push(parent),
                None => break,
            }
        }
        debug!(count = chain.len(), tip_height = tip.height(), "seeded header cache");
        // Oldest first so the tip ends up most recent.
        for header in chain.into_iter().rev() {
            cache.insert(header);
        }
        cache.set_tip(tip);
        Ok(())
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Number of cached headers.
    pub fn cached_len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_cached(&self, hash: &Hash256) -> bool {
        self.cache.read().get(hash).is_some()
    }
}

impl<B: HeaderBackend> HeaderLookup for CachedHeaderStore<B> {
    fn get(&self, hash: &Hash256) -> Result<StoredHeader, StoreError> {
        if let Some(header) = self.cache.read().get(hash) {
            return Ok(header.clone());
        }
        self.backend
            .get_header(hash)?
            .ok_or(StoreError::NotFound(*hash))
    }
}

impl<B: HeaderBackend> HeaderStore for CachedHeaderStore<B> {
    fn get_best(&self) -> Result<StoredHeader, StoreError> {
        if let Some(tip) = self.cache.read().tip() {
            return Ok(tip.clone());
        }
        self.backend.get_tip()?.ok_or(StoreError::NoTip)
    }

    fn put(&self, header: &StoredHeader, new_tip: bool) -> Result<(), StoreError> {
        let mut cache = self.cache.write();
        self.backend.put_header(header, new_tip)?;
        cache.insert(header.clone());
        if new_tip {
            cache.set_tip(header.clone());
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut cache = self.cache.write();
        self.backend.clear()?;
        cache.clear();
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        self.backend.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::U256;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Build a linked chain of `len` headers starting at genesis.
    fn chain(len: u32) -> Vec<StoredHeader> {
        let mut out: Vec<StoredHeader> = Vec::new();
        for height in 0..len {
            let mut s = StoredHeader::default();
            s.header.height = height;
            s.header.timestamp = 1000 + height;
            s.header.previous = out.last().map(|p| p.hash()).unwrap_or(Hash256::ZERO);
            s.total_work = U256::from(height * 2);
            out.push(s);
        }
        out
    }

    fn store_with(headers: &[StoredHeader], capacity: usize) -> CachedHeaderStore<MemoryBackend> {
        let backend = MemoryBackend::new();
        for h in headers {
            backend.put_header(h, true).unwrap();
        }
        CachedHeaderStore::new(backend, capacity).unwrap()
    }

    /// Backend whose writes can be switched to fail.
    #[derive(Default)]
    struct FlakyBackend {
        inner: MemoryBackend,
        fail: AtomicBool,
    }

    impl HeaderBackend for FlakyBackend {
        fn get_header(&self, hash: &Hash256) -> Result<Option<StoredHeader>, StoreError> {
            self.inner.get_header(hash)
        }
        fn get_tip(&self) -> Result<Option<StoredHeader>, StoreError> {
            self.inner.get_tip()
        }
        fn put_header(&self, header: &StoredHeader, new_tip: bool) -> Result<(), StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("disk full".into()));
            }
            self.inner.put_header(header, new_tip)
        }
        fn clear(&self) -> Result<(), StoreError> {
            self.inner.clear()
        }
    }

    // --- Lookup ---

    #[test]
    fn empty_store_has_no_tip() {
        let store = CachedHeaderStore::new(MemoryBackend::new(), 10).unwrap();
        let err = store.get_best().unwrap_err();
        assert_eq!(err, StoreError::NoTip);
        assert!(err.is_not_found());
    }

    #[test]
    fn missing_header_is_not_found() {
        let store = store_with(&chain(3), 10);
        let missing = Hash256([0xEE; 32]);
        assert_eq!(store.get(&missing), Err(StoreError::NotFound(missing)));
    }

    #[test]
    fn get_previous_walks_to_synthetic_root() {
        let headers = chain(3);
        let store = store_with(&headers, 10);
        assert_eq!(store.get_previous(&headers[2]).unwrap(), headers[1]);
        assert_eq!(store.get_previous(&headers[1]).unwrap(), headers[0]);
        let root = store.get_previous(&headers[0]).unwrap();
        assert!(root.is_synthetic_root());
        assert!(store.get_previous(&root).unwrap().is_synthetic_root());
    }

    // --- Cache seeding ---

    #[test]
    fn seeding_is_bounded_by_capacity() {
        let headers = chain(20);
        let store = store_with(&headers, 5);
        assert_eq!(store.cached_len(), 5);
        assert!(store.is_cached(&headers[19].hash()));
        assert!(store.is_cached(&headers[15].hash()));
        assert!(!store.is_cached(&headers[14].hash()));
        // Uncached headers still come from the backend.
        assert_eq!(store.get(&headers[3].hash()).unwrap(), headers[3]);
        // Reads never populate the cache.
        assert!(!store.is_cached(&headers[3].hash()));
    }

    #[test]
    fn seeding_stops_at_genesis() {
        let headers = chain(3);
        let store = store_with(&headers, 100);
        assert_eq!(store.cached_len(), 3);
        assert_eq!(store.get_best().unwrap(), headers[2]);
    }

    // --- Writes ---

    #[test]
    fn put_updates_tip_only_when_asked() {
        let headers = chain(3);
        let store = store_with(&headers[..1], 10);
        store.put(&headers[1], false).unwrap();
        assert_eq!(store.get_best().unwrap(), headers[0]);
        store.put(&headers[2], true).unwrap();
        assert_eq!(store.get_best().unwrap(), headers[2]);
        assert!(store.is_cached(&headers[1].hash()));
    }

    #[test]
    fn failed_put_leaves_store_unchanged() {
        let headers = chain(2);
        let backend = FlakyBackend::default();
        backend.put_header(&headers[0], true).unwrap();
        let store = CachedHeaderStore::new(backend, 10).unwrap();

        store.backend().fail.store(true, Ordering::SeqCst);
        let err = store.put(&headers[1], true).unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));

        assert_eq!(store.get_best().unwrap(), headers[0]);
        assert!(!store.is_cached(&headers[1].hash()));
        assert!(store.get(&headers[1].hash()).unwrap_err().is_not_found());
    }

    #[test]
    fn clear_empties_both_layers() {
        let headers = chain(4);
        let store = store_with(&headers, 10);
        store.clear().unwrap();
        assert_eq!(store.cached_len(), 0);
        assert!(store.backend().is_empty());
        assert_eq!(store.get_best(), Err(StoreError::NoTip));
    }
}
