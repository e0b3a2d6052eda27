//! Sled-backed upload repository.
//!
//! Two trees:
//! - `items_by_hash`: fingerprint -> JSON record
//! - `hash_by_id`: big-endian id -> fingerprint (ordered index for paging)
//!
//! Both trees are always written in one transaction, so the uniqueness check
//! on the fingerprint and the index update cannot interleave with a
//! concurrent insert of the same content.

use super::{
    matches_reviewed, ClassifiedItem, InsertOutcome, Label, NewClassifiedItem, ReviewStats,
    StorageError, UploadRepository,
};
use crate::fingerprint::Fingerprint;
use chrono::Utc;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use std::path::Path;
use tracing::{debug, info, warn};

const ITEMS_TREE: &str = "items_by_hash";
const INDEX_TREE: &str = "hash_by_id";

/// Durable repository stored in a sled database.
#[derive(Clone)]
pub struct SledUploadStore {
    db: sled::Db,
    items: sled::Tree,
    index: sled::Tree,
}

fn abort(e: impl ToString) -> ConflictableTransactionError<StorageError> {
    ConflictableTransactionError::Abort(StorageError::Serialization(e.to_string()))
}

fn flatten(e: TransactionError<StorageError>) -> StorageError {
    match e {
        TransactionError::Abort(inner) => inner,
        TransactionError::Storage(inner) => StorageError::from(inner),
    }
}

impl SledUploadStore {
    /// Open or create the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref)?;
        let store = Self::from_db(db)?;

        info!(path = ?path_ref, records = store.items.len(), "Upload store opened");
        Ok(store)
    }

    /// Open a throwaway database that is removed when dropped.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StorageError> {
        let items = db.open_tree(ITEMS_TREE)?;
        let index = db.open_tree(INDEX_TREE)?;
        Ok(Self { db, items, index })
    }

    fn decode(bytes: &[u8]) -> Result<ClassifiedItem, StorageError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Iterate all records, skipping (and logging) undecodable ones.
    fn scan(&self) -> impl Iterator<Item = ClassifiedItem> + '_ {
        self.items.iter().filter_map(|entry| {
            let (key, value) = match entry {
                Ok(kv) => kv,
                Err(e) => {
                    warn!(error = %e, "Failed to read upload record");
                    return None;
                }
            };
            match Self::decode(&value) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(key = %String::from_utf8_lossy(&key), error = %e, "Skipping corrupt upload record");
                    None
                }
            }
        })
    }
}

impl UploadRepository for SledUploadStore {
    fn insert_classified_item(&self, item: NewClassifiedItem) -> Result<InsertOutcome, StorageError> {
        // Ids only need to be increasing; a gap left by a duplicate is fine.
        let id = self.db.generate_id()? + 1;
        let record = item.into_record(id, Utc::now());
        let key = record.file_hash.clone();
        let value = serde_json::to_vec(&record)?;

        let inserted = (&self.items, &self.index)
            .transaction(|(items, index)| {
                if items.get(key.as_bytes())?.is_some() {
                    return Ok(false);
                }
                items.insert(key.as_bytes(), value.as_slice())?;
                index.insert(id.to_be_bytes().to_vec(), key.as_bytes())?;
                Ok(true)
            })
            .map_err(flatten)?;

        if inserted {
            debug!(id, hash = %key, "Upload record inserted");
            Ok(InsertOutcome::Inserted(record))
        } else {
            debug!(hash = %key, "Upload record already present");
            Ok(InsertOutcome::Duplicate)
        }
    }

    fn find_path_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Option<String>, StorageError> {
        self.items
            .get(fingerprint.as_str())?
            .map(|bytes| Self::decode(&bytes).map(|item| item.file_path))
            .transpose()
    }

    fn update_label(&self, fingerprint: &Fingerprint, label: Label) -> Result<usize, StorageError> {
        let key = fingerprint.as_str();

        self.items
            .transaction(|items| {
                let Some(bytes) = items.get(key)? else {
                    return Ok(0);
                };
                let mut item: ClassifiedItem = serde_json::from_slice(&bytes).map_err(abort)?;
                item.new_label = label.as_str().to_string();
                item.reviewed = true;
                item.updated_at = Utc::now();
                let encoded = serde_json::to_vec(&item).map_err(abort)?;
                items.insert(key.as_bytes(), encoded)?;
                Ok(1)
            })
            .map_err(flatten)
    }

    fn delete_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<usize, StorageError> {
        let key = fingerprint.as_str();

        (&self.items, &self.index)
            .transaction(|(items, index)| {
                let Some(bytes) = items.remove(key.as_bytes())? else {
                    return Ok(0);
                };
                let item: ClassifiedItem = serde_json::from_slice(&bytes).map_err(abort)?;
                index.remove(item.id.to_be_bytes().to_vec())?;
                Ok(1)
            })
            .map_err(flatten)
    }

    fn list_page(
        &self,
        cursor: u64,
        limit: usize,
        reviewed: Option<bool>,
    ) -> Result<Vec<ClassifiedItem>, StorageError> {
        let Some(start) = cursor.checked_add(1) else {
            return Ok(Vec::new());
        };

        let mut page = Vec::with_capacity(limit.min(256));
        for entry in self.index.range(start.to_be_bytes()..).rev() {
            if page.len() >= limit {
                break;
            }
            let (_id, hash) = entry?;
            let Some(bytes) = self.items.get(&hash)? else {
                continue;
            };
            let item = Self::decode(&bytes)?;
            if matches_reviewed(&item, reviewed) {
                page.push(item);
            }
        }
        Ok(page)
    }

    fn count(&self, reviewed: Option<bool>) -> Result<usize, StorageError> {
        if reviewed.is_none() {
            return Ok(self.items.len());
        }
        Ok(self.scan().filter(|item| matches_reviewed(item, reviewed)).count())
    }

    fn stats(&self) -> Result<ReviewStats, StorageError> {
        let items: Vec<ClassifiedItem> = self.scan().collect();
        Ok(ReviewStats::from_items(items.iter()))
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "Sled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_item(content: &[u8], confidence: f32) -> NewClassifiedItem {
        let fp = Fingerprint::of(content);
        NewClassifiedItem {
            file_path: format!("/static/uploads/{fp}.jpg"),
            file_hash: fp,
            label: Label::Sfw,
            confidence,
        }
    }

    #[test]
    fn test_insert_is_unique_by_fingerprint() {
        let store = SledUploadStore::temporary().unwrap();
        assert!(matches!(
            store.insert_classified_item(new_item(b"a", 90.0)).unwrap(),
            InsertOutcome::Inserted(_)
        ));
        assert_eq!(
            store.insert_classified_item(new_item(b"a", 90.0)).unwrap(),
            InsertOutcome::Duplicate
        );
        assert_eq!(store.count(None).unwrap(), 1);
    }

    #[test]
    fn test_concurrent_identical_inserts() {
        let store = SledUploadStore::temporary().unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = store.clone();
                std::thread::spawn(move || s.insert_classified_item(new_item(b"same", 50.0)).unwrap())
            })
            .collect();

        let inserted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| matches!(o, InsertOutcome::Inserted(_)))
            .count();

        assert_eq!(inserted, 1);
        assert_eq!(store.count(None).unwrap(), 1);
        assert_eq!(store.index.len(), 1);
    }

    #[test]
    fn test_label_and_delete() {
        let store = SledUploadStore::temporary().unwrap();
        let fp = Fingerprint::of(b"a");
        store.insert_classified_item(new_item(b"a", 70.0)).unwrap();

        assert_eq!(store.update_label(&fp, Label::Nsfw).unwrap(), 1);
        assert_eq!(store.update_label(&Fingerprint::of(b"zzz"), Label::Nsfw).unwrap(), 0);
        assert_eq!(store.count(Some(true)).unwrap(), 1);

        let page = store.list_page(0, 10, Some(true)).unwrap();
        assert_eq!(page[0].new_label, "NSFW");

        assert!(store.find_path_by_fingerprint(&fp).unwrap().is_some());
        assert_eq!(store.delete_by_fingerprint(&fp).unwrap(), 1);
        assert_eq!(store.delete_by_fingerprint(&fp).unwrap(), 0);
        assert!(store.find_path_by_fingerprint(&fp).unwrap().is_none());
        assert!(store.index.is_empty());
    }

    #[test]
    fn test_list_page_newest_first_after_cursor() {
        let store = SledUploadStore::temporary().unwrap();
        let ids: Vec<u64> = (0..5u8)
            .map(|i| match store.insert_classified_item(new_item(&[i], 60.0)).unwrap() {
                InsertOutcome::Inserted(item) => item.id,
                InsertOutcome::Duplicate => unreachable!(),
            })
            .collect();

        let page = store.list_page(0, 3, None).unwrap();
        let got: Vec<u64> = page.iter().map(|i| i.id).collect();
        assert_eq!(got, vec![ids[4], ids[3], ids[2]]);

        let after = store.list_page(ids[2], 10, None).unwrap();
        assert_eq!(after.len(), 2);
        assert!(after.iter().all(|i| i.id > ids[2]));
    }

    #[test]
    fn test_reopen_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("uploads.db");
        {
            let store = SledUploadStore::open(&path).unwrap();
            store.insert_classified_item(new_item(b"keep", 88.0)).unwrap();
            store.flush().unwrap();
        }
        let store = SledUploadStore::open(&path).unwrap();
        assert_eq!(store.count(None).unwrap(), 1);
        let stats = store.stats().unwrap();
        assert_eq!(stats.unreviewed, 1);
        assert!((stats.average_confidence - 88.0).abs() < 1e-6);
    }
}
