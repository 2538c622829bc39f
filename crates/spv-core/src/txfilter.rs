//! Shared transaction filter.
//!
//! Wraps an optional [`BloomFilter`] behind a single lock so load, add and
//! match never interleave. Reloading swaps the whole filter at once.

use parking_lot::Mutex;
use tracing::debug;

use crate::bloom::{BloomFilter, FilterAdd, FilterLoad, TxFilterLoad, MAX_FILTER_ADD_SIZE};
use crate::codec::Decodable;
use crate::error::FilterError;
use crate::types::Transaction;

#[derive(Default)]
pub struct TxFilter {
    filter: Mutex<Option<BloomFilter>>,
}

impl TxFilter {
    /// An unloaded filter. Matches nothing until [`load`](Self::load).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(filter: BloomFilter) -> Self {
        Self {
            filter: Mutex::new(Some(filter)),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.filter.lock().is_some()
    }

    /// Replace the filter with one decoded from a serialized `filterload`.
    /// On error the current filter is kept.
    pub fn load(&self, serialized: &[u8]) -> Result<(), FilterError> {
        let msg = FilterLoad::from_bytes(serialized)?;
        let filter = BloomFilter::load(&msg)?;
        self.install(filter);
        Ok(())
    }

    pub fn install(&self, filter: BloomFilter) {
        debug!(
            size = filter.as_bytes().len(),
            hash_funcs = filter.hash_funcs(),
            "transaction filter loaded"
        );
        *self.filter.lock() = Some(filter);
    }

    /// Add a raw element to the loaded filter.
    pub fn add(&self, data: &[u8]) -> Result<(), FilterError> {
        if data.len() > MAX_FILTER_ADD_SIZE {
            return Err(FilterError::TooLarge {
                size: data.len(),
                max: MAX_FILTER_ADD_SIZE,
            });
        }
        let mut guard = self.filter.lock();
        let filter = guard.as_mut().ok_or(FilterError::NotLoaded)?;
        filter.insert(data);
        Ok(())
    }

    /// Apply a `filteradd` message.
    pub fn add_message(&self, msg: &FilterAdd) -> Result<(), FilterError> {
        self.add(&msg.data)
    }

    /// Whether `tx` matches, inserting outpoints of matched outputs.
    /// An unloaded filter matches nothing.
    pub fn match_tx(&self, tx: &Transaction) -> bool {
        match self.filter.lock().as_mut() {
            Some(filter) => filter.match_tx_and_update(tx),
            None => false,
        }
    }

    /// The current filter wrapped in a typed envelope.
    pub fn to_wire_message(&self) -> Result<TxFilterLoad, FilterError> {
        let guard = self.filter.lock();
        let filter = guard.as_ref().ok_or(FilterError::NotLoaded)?;
        Ok(TxFilterLoad::bloom(&filter.to_filter_load()))
    }

    /// A copy of the current filter, if loaded.
    pub fn snapshot(&self) -> Option<BloomFilter> {
        self.filter.lock().clone()
    }
}
