//! In-memory upload repository.
//!
//! Thread-safe via `RwLock`. Not durable, data is lost on restart.

use super::{
    matches_reviewed, ClassifiedItem, InsertOutcome, Label, NewClassifiedItem, ReviewStats,
    StorageError, UploadRepository,
};
use crate::fingerprint::Fingerprint;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

#[derive(Default)]
struct Tables {
    /// id -> record, ordered for paging
    items: BTreeMap<u64, ClassifiedItem>,
    /// fingerprint -> id
    by_hash: HashMap<String, u64>,
    next_id: u64,
}

#[derive(Default)]
pub struct InMemoryUploadStore {
    tables: RwLock<Tables>,
}

impl InMemoryUploadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned(e: impl ToString) -> StorageError {
    StorageError::Backend(e.to_string())
}

impl UploadRepository for InMemoryUploadStore {
    fn insert_classified_item(&self, item: NewClassifiedItem) -> Result<InsertOutcome, StorageError> {
        let mut tables = self.tables.write().map_err(poisoned)?;

        if tables.by_hash.contains_key(item.file_hash.as_str()) {
            return Ok(InsertOutcome::Duplicate);
        }

        tables.next_id += 1;
        let id = tables.next_id;
        let record = item.into_record(id, Utc::now());
        tables.by_hash.insert(record.file_hash.clone(), id);
        tables.items.insert(id, record.clone());

        Ok(InsertOutcome::Inserted(record))
    }

    fn find_path_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Option<String>, StorageError> {
        let tables = self.tables.read().map_err(poisoned)?;

        Ok(tables
            .by_hash
            .get(fingerprint.as_str())
            .and_then(|id| tables.items.get(id))
            .map(|item| item.file_path.clone()))
    }

    fn update_label(&self, fingerprint: &Fingerprint, label: Label) -> Result<usize, StorageError> {
        let mut tables = self.tables.write().map_err(poisoned)?;

        let Some(id) = tables.by_hash.get(fingerprint.as_str()).copied() else {
            return Ok(0);
        };
        match tables.items.get_mut(&id) {
            Some(item) => {
                item.new_label = label.as_str().to_string();
                item.reviewed = true;
                item.updated_at = Utc::now();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn delete_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<usize, StorageError> {
        let mut tables = self.tables.write().map_err(poisoned)?;

        match tables.by_hash.remove(fingerprint.as_str()) {
            Some(id) => Ok(usize::from(tables.items.remove(&id).is_some())),
            None => Ok(0),
        }
    }

    fn list_page(
        &self,
        cursor: u64,
        limit: usize,
        reviewed: Option<bool>,
    ) -> Result<Vec<ClassifiedItem>, StorageError> {
        let tables = self.tables.read().map_err(poisoned)?;

        Ok(tables
            .items
            .range(cursor.saturating_add(1)..)
            .rev()
            .map(|(_, item)| item)
            .filter(|item| item.id > cursor && matches_reviewed(item, reviewed))
            .take(limit)
            .cloned()
            .collect())
    }

    fn count(&self, reviewed: Option<bool>) -> Result<usize, StorageError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables
            .items
            .values()
            .filter(|item| matches_reviewed(item, reviewed))
            .count())
    }

    fn stats(&self) -> Result<ReviewStats, StorageError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(ReviewStats::from_items(tables.items.values()))
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_item(content: &[u8]) -> NewClassifiedItem {
        NewClassifiedItem {
            file_path: format!("/static/uploads/{}.png", Fingerprint::of(content)),
            file_hash: Fingerprint::of(content),
            label: Label::Nsfw,
            confidence: 75.0,
        }
    }

    #[test]
    fn test_insert_duplicate() {
        let store = InMemoryUploadStore::new();
        assert!(matches!(
            store.insert_classified_item(new_item(b"x")).unwrap(),
            InsertOutcome::Inserted(ref item) if item.id == 1
        ));
        assert_eq!(
            store.insert_classified_item(new_item(b"x")).unwrap(),
            InsertOutcome::Duplicate
        );
    }

    #[test]
    fn test_paging_and_filters() {
        let store = InMemoryUploadStore::new();
        for i in 0..4u8 {
            store.insert_classified_item(new_item(&[i])).unwrap();
        }
        store.update_label(&Fingerprint::of(&[1u8]), Label::Sfw).unwrap();

        let page: Vec<u64> = store.list_page(0, 10, None).unwrap().iter().map(|i| i.id).collect();
        assert_eq!(page, vec![4, 3, 2, 1]);
        assert_eq!(store.list_page(2, 10, None).unwrap().len(), 2);
        assert_eq!(store.count(Some(true)).unwrap(), 1);
        assert_eq!(store.count(Some(false)).unwrap(), 3);

        let reviewed = store.list_page(0, 10, Some(true)).unwrap();
        assert_eq!(reviewed.len(), 1);
        assert_eq!(reviewed[0].new_label, "SFW");
    }

    #[test]
    fn test_delete() {
        let store = InMemoryUploadStore::new();
        let fp = Fingerprint::of(b"gone");
        store.insert_classified_item(new_item(b"gone")).unwrap();
        assert_eq!(store.delete_by_fingerprint(&fp).unwrap(), 1);
        assert_eq!(store.delete_by_fingerprint(&fp).unwrap(), 0);
        assert_eq!(store.update_label(&fp, Label::Sfw).unwrap(), 0);
        assert!(store.find_path_by_fingerprint(&fp).unwrap().is_none());
    }

    #[test]
    fn test_trait_object() {
        let store: Box<dyn UploadRepository> = Box::new(InMemoryUploadStore::new());
        assert_eq!(store.backend_name(), "InMemory");
        assert_eq!(store.stats().unwrap(), ReviewStats::default());
    }
}
