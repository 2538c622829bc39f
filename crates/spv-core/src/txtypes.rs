//! Set of transaction types a consumer is interested in.
//!
//! Lets a wallet keep the types it syncs in memory instead of reading them
//! from its own store each time it rebuilds a filter.

use std::collections::BTreeSet;

use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct TxTypesFilter {
    types: Mutex<BTreeSet<u8>>,
}

impl TxTypesFilter {
    pub fn new(types: &[u8]) -> Self {
        let filter = Self::default();
        filter.load(types);
        filter
    }

    /// Replace the whole set.
    pub fn load(&self, types: &[u8]) {
        *self.types.lock() = types.iter().copied().collect();
    }

    pub fn is_loaded(&self) -> bool {
        !self.types.lock().is_empty()
    }

    pub fn add(&self, tx_type: u8) {
        self.types.lock().insert(tx_type);
    }

    pub fn delete(&self, tx_type: u8) {
        self.types.lock().remove(&tx_type);
    }

    pub fn contains(&self, tx_type: u8) -> bool {
        self.types.lock().contains(&tx_type)
    }

    /// The loaded types in ascending order.
    pub fn tx_types(&self) -> Vec<u8> {
        self.types.lock().iter().copied().collect()
    }

    pub fn clear(&self) {
        self.types.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_is_not_loaded() {
        let filter = TxTypesFilter::new(&[]);
        assert!(!filter.is_loaded());
        assert!(!filter.contains(0));
        assert!(filter.tx_types().is_empty());
    }

    #[test]
    fn load_replaces_previous_types() {
        let filter = TxTypesFilter::new(&[2, 1, 2]);
        assert_eq!(filter.tx_types(), vec![1, 2]);
        filter.load(&[9]);
        assert_eq!(filter.tx_types(), vec![9]);
        assert!(!filter.contains(1));
    }

    #[test]
    fn add_delete_and_clear() {
        let filter = TxTypesFilter::default();
        filter.add(3);
        filter.add(7);
        assert!(filter.is_loaded());
        assert!(filter.contains(3));

        filter.delete(3);
        filter.delete(42);
        assert_eq!(filter.tx_types(), vec![7]);

        filter.clear();
        assert!(!filter.is_loaded());
    }
}
