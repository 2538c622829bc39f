//! RocksDB-backed header storage.
//!
//! Implements [`HeaderBackend`] with two column families: `headers` (stored
//! header records keyed by header hash) and `chain_tip` (a single record
//! holding the full best header). A header and a tip update are written in
//! one [`WriteBatch`], so a crash never leaves a tip pointing at a header
//! that was not persisted.

use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};

use spv_core::codec::{Decodable, Encodable};
use spv_core::error::StoreError;
use spv_core::header::StoredHeader;
use spv_core::store::HeaderBackend;
use spv_core::types::Hash256;

// --- Column family names ---

const CF_HEADERS: &str = "headers";
const CF_CHAIN_TIP: &str = "chain_tip";

const ALL_CFS: &[&str] = &[CF_HEADERS, CF_CHAIN_TIP];

const KEY_CHAIN_TIP: &[u8] = b"chain_tip";

pub struct RocksBackend {
    db: DB,
}

impl RocksBackend {
    /// Open or create a header database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        tracing::info!(path = %path.as_ref().display(), "opened header database");
        Ok(Self { db })
    }

    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("missing column family: {name}")))
    }

    fn read(&self, cf: &str, key: &[u8]) -> Result<Option<StoredHeader>, StoreError> {
        let cf = self.cf_handle(cf)?;
        match self
            .db
            .get_cf(cf, key)
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(bytes) => Ok(Some(StoredHeader::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Number of stored headers. Walks the whole column family.
    pub fn header_count(&self) -> Result<usize, StoreError> {
        let cf = self.cf_handle(CF_HEADERS)?;
        let mut count = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item.map_err(|e| StoreError::Backend(e.to_string()))?;
            count += 1;
        }
        Ok(count)
    }
}

impl HeaderBackend for RocksBackend {
    fn get_header(&self, hash: &Hash256) -> Result<Option<StoredHeader>, StoreError> {
        self.read(CF_HEADERS, hash.as_bytes())
    }

    fn get_tip(&self) -> Result<Option<StoredHeader>, StoreError> {
        self.read(CF_CHAIN_TIP, KEY_CHAIN_TIP)
    }

    fn put_header(&self, header: &StoredHeader, new_tip: bool) -> Result<(), StoreError> {
        let cf_headers = self.cf_handle(CF_HEADERS)?;
        let bytes = header.to_bytes();

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_headers, header.hash().as_bytes(), &bytes);
        if new_tip {
            let cf_tip = self.cf_handle(CF_CHAIN_TIP)?;
            batch.put_cf(cf_tip, KEY_CHAIN_TIP, &bytes);
        }
        self.db
            .write(batch)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut batch = WriteBatch::default();
        let mut removed = 0u64;
        for name in ALL_CFS {
            let cf = self.cf_handle(name)?;
            for item in self.db.iterator_cf(cf, IteratorMode::Start) {
                let (key, _) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
                batch.delete_cf(cf, key);
                removed += 1;
            }
        }
        self.db
            .write(batch)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        tracing::info!("cleared header database: {} record(s) removed", removed);
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush().map_err(|e| StoreError::Backend(e.to_string()))?;
        tracing::debug!("header database flushed");
        Ok(())
    }
}
