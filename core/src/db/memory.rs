use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::collection::{CollectionRef, DocumentCollection};
use crate::document::{ChangeSpec, Condition, FieldMap, ID_FIELD, UpdateReport};
use crate::error::{StoreError, StoreResult};

/// Process-local backend. Collections appear on first use, like the
/// schemaless stores this layer fronts in production.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Arc<MemoryCollection>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection(&self, name: &str) -> CollectionRef {
        let mut collections = self
            .collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        collections
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(MemoryCollection::new(name)))
            .clone()
    }
}

/// One named collection guarded by a single lock. Every operation holds the
/// lock for its whole critical section and never awaits inside it, which is
/// what makes conditional writes atomic here.
pub struct MemoryCollection {
    name: String,
    docs: Mutex<BTreeMap<String, FieldMap>>,
}

impl MemoryCollection {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            docs: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, FieldMap>> {
        self.docs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DocumentCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_one(&self, filter: &Condition) -> StoreResult<Option<FieldMap>> {
        let docs = self.lock();
        if let Some(id) = filter.id_constraint() {
            return Ok(docs.get(id).filter(|doc| filter.matches(doc)).cloned());
        }
        Ok(docs.values().find(|doc| filter.matches(doc)).cloned())
    }

    async fn insert(&self, doc: FieldMap) -> StoreResult<()> {
        let id = document_id(&self.name, &doc)?;
        let mut docs = self.lock();
        if docs.contains_key(&id) {
            return Err(StoreError::already_exists(&self.name, id));
        }
        docs.insert(id, doc);
        Ok(())
    }

    async fn update(&self, filter: &Condition, change: &ChangeSpec) -> StoreResult<UpdateReport> {
        let mut docs = self.lock();
        let mut report = UpdateReport::default();
        // Changes are staged on clones and written back only after every
        // matched document applied cleanly; an apply error leaves the
        // collection untouched, like a rolled-back transaction.
        let mut staged = Vec::new();
        for (id, doc) in docs.iter() {
            if !filter.matches(doc) {
                continue;
            }
            report.matched += 1;
            let mut next = doc.clone();
            change.apply(&mut next)?;
            if next != *doc {
                report.modified += 1;
                staged.push((id.clone(), next));
            }
        }
        for (id, next) in staged {
            docs.insert(id, next);
        }
        Ok(report)
    }

    async fn find_and_modify(
        &self,
        filter: &Condition,
        change: &ChangeSpec,
    ) -> StoreResult<Option<FieldMap>> {
        let mut docs = self.lock();
        for doc in docs.values_mut() {
            if filter.matches(doc) {
                let mut next = doc.clone();
                change.apply(&mut next)?;
                *doc = next;
                return Ok(Some(doc.clone()));
            }
        }
        Ok(None)
    }
}

pub(crate) fn document_id(collection: &str, doc: &FieldMap) -> StoreResult<String> {
    match doc.get(ID_FIELD) {
        Some(JsonValue::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(_) => Err(StoreError::invalid_argument(format!(
            "document for {collection} carries a non-string _id"
        ))),
        None => Err(StoreError::invalid_argument(format!(
            "document for {collection} is missing _id"
        ))),
    }
}
