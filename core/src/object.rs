use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;

use crate::collection::CollectionRef;
use crate::db::Database;
use crate::document::{ChangeSpec, Condition, DocRef, FieldMap, ID_FIELD, UpdateReport};
use crate::error::{StoreError, StoreResult};

/// Implemented by domain marker types whose instances live as documents.
///
/// `defaults()` declares the fields readable before they have ever been
/// written, and the values `reset_if` restores.
pub trait Persist: Send + Sync + 'static {
    const COLLECTION: &'static str;

    fn defaults() -> &'static FieldMap;
}

/// In-memory representative of exactly one document.
///
/// Holds the immutable id, a local field cache seeded at load time, and the
/// backing collection handle. Field reads consult the cache first and the
/// type's declared defaults second; every mutation rounds-trips to the
/// backing store, and conditional mutations leave both the store and the
/// cache untouched when their condition fails. The cache is advisory: after
/// a `ConditionNotMet` the caller must `sync` before trusting it again.
pub struct StoredObject<T: Persist> {
    id: String,
    cache: FieldMap,
    collection: CollectionRef,
    _marker: PhantomData<T>,
}

impl<T: Persist> StoredObject<T> {
    /// Loads an existing document. The cache is seeded from the fetched
    /// document; a missing document is `NotFound`.
    pub async fn get(database: &Database, id: &str) -> StoreResult<Self> {
        if id.is_empty() {
            return Err(StoreError::invalid_argument(format!(
                "blank id for {}",
                T::COLLECTION
            )));
        }

        let collection = database.collection(T::COLLECTION);
        let doc = collection
            .find_one(&Condition::new().with_id(id))
            .await?
            .ok_or_else(|| StoreError::not_found(T::COLLECTION, id))?;

        Ok(Self {
            id: id.to_owned(),
            cache: doc,
            collection,
            _marker: PhantomData,
        })
    }

    /// Resolves a reference. The reference's collection must match this
    /// type's backing collection.
    pub async fn get_ref(database: &Database, doc_ref: &DocRef) -> StoreResult<Self> {
        if doc_ref.collection != T::COLLECTION {
            return Err(StoreError::invalid_argument(format!(
                "reference to {} cannot load a {} document",
                doc_ref.collection,
                T::COLLECTION
            )));
        }
        Self::get(database, &doc_ref.id).await
    }

    /// Inserts a document carrying only the identifier, then loads it.
    /// A duplicate id is `AlreadyExists`, which callers translate into their
    /// domain conflict result.
    pub async fn create(database: &Database, id: &str) -> StoreResult<Self> {
        if id.is_empty() {
            return Err(StoreError::invalid_argument(format!(
                "blank id for {}",
                T::COLLECTION
            )));
        }

        let collection = database.collection(T::COLLECTION);
        let mut doc = FieldMap::new();
        doc.insert(ID_FIELD.to_owned(), JsonValue::String(id.to_owned()));
        collection.insert(doc).await?;

        Self::get(database, id).await
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn doc_ref(&self) -> DocRef {
        DocRef::new(T::COLLECTION, &self.id)
    }

    /// Raw field read: cache first, declared defaults second.
    pub fn raw_field(&self, name: &str) -> StoreResult<&JsonValue> {
        if let Some(value) = self.cache.get(name) {
            return Ok(value);
        }
        T::defaults()
            .get(name)
            .ok_or_else(|| StoreError::unknown_field(T::COLLECTION, name))
    }

    /// Typed field read. A value that does not deserialize into `V` is a
    /// programming error at the call site, not a store failure.
    pub fn field<V: DeserializeOwned>(&self, name: &str) -> StoreResult<V> {
        let value = self.raw_field(name)?.clone();
        serde_json::from_value(value).map_err(|err| {
            StoreError::invalid_argument(format!(
                "field {name} of {collection}/{id} has an unexpected shape: {err}",
                collection = T::COLLECTION,
                id = self.id,
            ))
        })
    }

    pub fn text(&self, name: &str) -> StoreResult<String> {
        self.field(name)
    }

    /// String field that may be null.
    pub fn opt_text(&self, name: &str) -> StoreResult<Option<String>> {
        self.field(name)
    }

    pub fn int(&self, name: &str) -> StoreResult<i64> {
        self.field(name)
    }

    /// Unconditional single-field write.
    pub async fn store_field(
        &mut self,
        name: &str,
        value: impl Into<JsonValue>,
    ) -> StoreResult<()> {
        let mut fields = FieldMap::new();
        fields.insert(name.to_owned(), value.into());
        self.store_fields(fields).await
    }

    /// Unconditional multi-field write.
    pub async fn store_fields(&mut self, fields: FieldMap) -> StoreResult<()> {
        self.store_fields_if(Condition::new(), fields, true).await
    }

    /// Conditional field write: takes effect only if the stored document
    /// still has this id and satisfies `condition`. With `update_cache` the
    /// local cache absorbs the written fields without a re-read; callers
    /// choosing that mode accept that a concurrent conflicting write stays
    /// invisible locally until the next `sync`.
    pub async fn store_fields_if(
        &mut self,
        condition: Condition,
        fields: FieldMap,
        update_cache: bool,
    ) -> StoreResult<()> {
        let change = ChangeSpec::from_set(fields);
        let report = self
            .collection
            .update(&condition.with_id(&self.id), &change)
            .await?;
        check_single_match(T::COLLECTION, &self.id, report)?;

        if update_cache {
            for (field, value) in change.set_fields() {
                self.cache.insert(field.clone(), value.clone());
            }
        }
        Ok(())
    }

    /// Atomic read-modify-write. Applies `effect` to the document matching
    /// `condition` plus this id and replaces the whole cache with the
    /// post-image, so the local view is exact afterwards.
    pub async fn modify_if(&mut self, condition: Condition, effect: ChangeSpec) -> StoreResult<()> {
        let post_image = self
            .collection
            .find_and_modify(&condition.with_id(&self.id), &effect)
            .await?
            .ok_or_else(|| StoreError::condition_not_met(T::COLLECTION, &self.id))?;

        self.cache = post_image;
        Ok(())
    }

    /// Conditionally restores the named fields to their declared defaults.
    pub async fn reset_if(
        &mut self,
        condition: Condition,
        fields: &[&str],
        update_cache: bool,
    ) -> StoreResult<()> {
        let defaults = T::defaults();
        let mut mapping = FieldMap::new();
        for field in fields {
            let value = defaults
                .get(*field)
                .ok_or_else(|| StoreError::unknown_field(T::COLLECTION, *field))?;
            mapping.insert((*field).to_owned(), value.clone());
        }
        self.store_fields_if(condition, mapping, update_cache).await
    }

    /// Re-reads the named fields (or the whole document when none are named)
    /// from the backing store, discarding local-only state for them.
    pub async fn sync(&mut self, fields: &[&str]) -> StoreResult<()> {
        let doc = self
            .collection
            .find_one(&Condition::new().with_id(&self.id))
            .await?
            .ok_or_else(|| StoreError::not_found(T::COLLECTION, &self.id))?;

        if fields.is_empty() {
            self.cache = doc;
            return Ok(());
        }

        for field in fields {
            match doc.get(*field) {
                Some(value) => {
                    self.cache.insert((*field).to_owned(), value.clone());
                }
                None => {
                    self.cache.remove(*field);
                }
            }
        }
        Ok(())
    }

    /// Spawns an unconditional field write onto the runtime and hands the
    /// task back to the caller to await, cancel, or deliberately drop. The
    /// local cache is not touched by this path.
    pub fn store_fields_detached(&self, fields: FieldMap) -> JoinHandle<StoreResult<()>> {
        let collection = self.collection.clone();
        let id = self.id.clone();
        tokio::spawn(async move {
            let change = ChangeSpec::from_set(fields);
            let report = collection
                .update(&Condition::new().with_id(&id), &change)
                .await?;
            check_single_match(T::COLLECTION, &id, report)
        })
    }

    pub fn store_field_detached(
        &self,
        name: &str,
        value: impl Into<JsonValue>,
    ) -> JoinHandle<StoreResult<()>> {
        let mut fields = FieldMap::new();
        fields.insert(name.to_owned(), value.into());
        self.store_fields_detached(fields)
    }
}

impl<T: Persist> fmt::Debug for StoredObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredObject")
            .field("collection", &T::COLLECTION)
            .field("id", &self.id)
            .finish()
    }
}

/// An id-pinned write matches exactly one document; zero means the condition
/// failed or the document vanished, more than one means the backing store
/// broke its id uniqueness and nothing can be trusted.
fn check_single_match(collection: &str, id: &str, report: UpdateReport) -> StoreResult<()> {
    match report.matched {
        0 => Err(StoreError::condition_not_met(collection, id)),
        1 => Ok(()),
        matched => Err(StoreError::corrupt(collection, id, matched)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::literal_fields;
    use once_cell::sync::Lazy;
    use serde_json::json;

    struct TestDoc;

    static TEST_DEFAULTS: Lazy<FieldMap> = Lazy::new(|| {
        literal_fields(json!({
            "status": "idle",
            "visits": 0,
            "course_id": null,
        }))
    });

    impl Persist for TestDoc {
        const COLLECTION: &'static str = "test_docs";

        fn defaults() -> &'static FieldMap {
            &TEST_DEFAULTS
        }
    }

    #[tokio::test]
    async fn get_of_a_missing_document_is_not_found() {
        let db = Database::in_memory();
        let err = StoredObject::<TestDoc>::get(&db, "ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn blank_ids_are_rejected_up_front() {
        let db = Database::in_memory();
        let err = StoredObject::<TestDoc>::get(&db, "").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument { .. }));

        let err = StoredObject::<TestDoc>::create(&db, "").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn create_inserts_only_the_identifier_and_is_retrievable() {
        let db = Database::in_memory();
        let created = StoredObject::<TestDoc>::create(&db, "d1").await.unwrap();
        assert_eq!(created.id(), "d1");

        let loaded = StoredObject::<TestDoc>::get(&db, "d1").await.unwrap();
        // Nothing but the id is persisted; reads fall through to defaults.
        assert_eq!(loaded.text("status").unwrap(), "idle");
        assert_eq!(loaded.int("visits").unwrap(), 0);
    }

    #[tokio::test]
    async fn create_twice_is_already_exists() {
        let db = Database::in_memory();
        StoredObject::<TestDoc>::create(&db, "d1").await.unwrap();
        let err = StoredObject::<TestDoc>::create(&db, "d1")
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn reference_resolution_checks_the_collection() {
        let db = Database::in_memory();
        StoredObject::<TestDoc>::create(&db, "d1").await.unwrap();

        let ok = StoredObject::<TestDoc>::get_ref(&db, &DocRef::new("test_docs", "d1"))
            .await
            .unwrap();
        assert_eq!(ok.id(), "d1");

        let err = StoredObject::<TestDoc>::get_ref(&db, &DocRef::new("rooms", "d1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn stored_field_survives_a_fresh_get() {
        let db = Database::in_memory();
        let mut doc = StoredObject::<TestDoc>::create(&db, "d1").await.unwrap();
        doc.store_field("status", "room").await.unwrap();

        let fresh = StoredObject::<TestDoc>::get(&db, "d1").await.unwrap();
        assert_eq!(fresh.text("status").unwrap(), "room");
    }

    #[tokio::test]
    async fn reads_fall_back_to_defaults_then_fail() {
        let db = Database::in_memory();
        let doc = StoredObject::<TestDoc>::create(&db, "d1").await.unwrap();

        assert_eq!(doc.opt_text("course_id").unwrap(), None);
        let err = doc.raw_field("undeclared").unwrap_err();
        assert!(matches!(err, StoreError::UnknownField { .. }));
    }

    #[tokio::test]
    async fn conditional_write_applies_iff_condition_holds() {
        let db = Database::in_memory();
        let mut doc = StoredObject::<TestDoc>::create(&db, "d1").await.unwrap();
        doc.store_field("status", "room").await.unwrap();

        let fields = literal_fields(json!({"visits": 1}));
        doc.store_fields_if(
            Condition::new().eq("status", "room"),
            fields.clone(),
            true,
        )
        .await
        .unwrap();
        assert_eq!(doc.int("visits").unwrap(), 1);

        let err = doc
            .store_fields_if(Condition::new().eq("status", "lesson"), fields, true)
            .await
            .unwrap_err();
        assert!(err.is_condition_not_met());

        // The failed write changed neither the store nor the cache.
        let fresh = StoredObject::<TestDoc>::get(&db, "d1").await.unwrap();
        assert_eq!(fresh.int("visits").unwrap(), 1);
        assert_eq!(doc.int("visits").unwrap(), 1);
    }

    #[tokio::test]
    async fn racing_conditional_writes_let_exactly_one_through() {
        let db = Database::in_memory();
        {
            let mut seed = StoredObject::<TestDoc>::create(&db, "d1").await.unwrap();
            seed.store_field("status", "open").await.unwrap();
        }

        let mut writers = Vec::new();
        for claim in ["alice", "bob", "carol", "dave"] {
            let db = db.clone();
            writers.push(tokio::spawn(async move {
                let mut doc = StoredObject::<TestDoc>::get(&db, "d1").await.unwrap();
                let fields = literal_fields(json!({"status": claim}));
                doc.store_fields_if(Condition::new().eq("status", "open"), fields, true)
                    .await
                    .map(|_| claim)
            }));
        }

        let mut winners = Vec::new();
        for writer in writers {
            match writer.await.unwrap() {
                Ok(claim) => winners.push(claim),
                Err(err) => assert!(err.is_condition_not_met()),
            }
        }
        assert_eq!(winners.len(), 1);

        let fresh = StoredObject::<TestDoc>::get(&db, "d1").await.unwrap();
        assert_eq!(fresh.text("status").unwrap(), winners[0]);
    }

    #[tokio::test]
    async fn modify_if_returns_a_consistent_post_image() {
        let db = Database::in_memory();
        {
            StoredObject::<TestDoc>::create(&db, "d1").await.unwrap();
        }

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let db = db.clone();
            tasks.push(tokio::spawn(async move {
                let mut doc = StoredObject::<TestDoc>::get(&db, "d1").await.unwrap();
                doc.modify_if(Condition::new(), ChangeSpec::new().inc("visits", 1))
                    .await
                    .unwrap();
                doc.int("visits").unwrap()
            }));
        }

        let mut observed = Vec::new();
        for task in tasks {
            observed.push(task.await.unwrap());
        }
        observed.sort_unstable();
        // Every writer saw a distinct, fully-applied intermediate state.
        assert_eq!(observed, (1..=16).collect::<Vec<i64>>());

        let fresh = StoredObject::<TestDoc>::get(&db, "d1").await.unwrap();
        assert_eq!(fresh.int("visits").unwrap(), 16);
    }

    #[tokio::test]
    async fn modify_if_condition_failure_is_condition_not_met() {
        let db = Database::in_memory();
        let mut doc = StoredObject::<TestDoc>::create(&db, "d1").await.unwrap();

        let err = doc
            .modify_if(
                Condition::new().eq("status", "room"),
                ChangeSpec::new().inc("visits", 1),
            )
            .await
            .unwrap_err();
        assert!(err.is_condition_not_met());
    }

    #[tokio::test]
    async fn reset_if_restores_declared_defaults() {
        let db = Database::in_memory();
        let mut doc = StoredObject::<TestDoc>::create(&db, "d1").await.unwrap();
        doc.store_fields(literal_fields(json!({"status": "room", "course_id": "c1"})))
            .await
            .unwrap();

        doc.reset_if(Condition::new(), &["status", "course_id"], true)
            .await
            .unwrap();
        assert_eq!(doc.text("status").unwrap(), "idle");
        assert_eq!(doc.opt_text("course_id").unwrap(), None);

        let err = doc
            .reset_if(Condition::new(), &["undeclared"], true)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownField { .. }));
    }

    #[tokio::test]
    async fn sync_with_no_external_writes_is_idempotent() {
        let db = Database::in_memory();
        let mut doc = StoredObject::<TestDoc>::create(&db, "d1").await.unwrap();
        doc.store_field("status", "room").await.unwrap();

        let before = doc.text("status").unwrap();
        doc.sync(&[]).await.unwrap();
        assert_eq!(doc.text("status").unwrap(), before);
        doc.sync(&["status"]).await.unwrap();
        assert_eq!(doc.text("status").unwrap(), before);
    }

    #[tokio::test]
    async fn sync_picks_up_external_writes_and_discards_local_state() {
        let db = Database::in_memory();
        let mut ours = StoredObject::<TestDoc>::create(&db, "d1").await.unwrap();
        let mut theirs = StoredObject::<TestDoc>::get(&db, "d1").await.unwrap();

        theirs.store_field("status", "lesson").await.unwrap();
        assert_eq!(ours.text("status").unwrap(), "idle");

        ours.sync(&["status"]).await.unwrap();
        assert_eq!(ours.text("status").unwrap(), "lesson");
    }

    #[tokio::test]
    async fn named_sync_drops_fields_the_store_no_longer_has() {
        let db = Database::in_memory();
        let mut ours = StoredObject::<TestDoc>::create(&db, "d1").await.unwrap();
        ours.store_field("visits", 5).await.unwrap();

        let mut theirs = StoredObject::<TestDoc>::get(&db, "d1").await.unwrap();
        theirs
            .modify_if(Condition::new(), ChangeSpec::new().unset("visits"))
            .await
            .unwrap();

        ours.sync(&["visits"]).await.unwrap();
        // Back to the declared default now that the cache entry is gone.
        assert_eq!(ours.int("visits").unwrap(), 0);
    }

    #[tokio::test]
    async fn sync_reports_a_vanished_document() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = crate::config::AppConfig::default();
        config.store_backend = crate::config::StoreBackend::Sqlite;
        config.database_path = temp_dir.path().join("test.db").to_string_lossy().into_owned();
        let db = Database::connect(&config).await.unwrap();

        let mut doc = StoredObject::<TestDoc>::create(&db, "d1").await.unwrap();

        // An external actor deletes the row out from under the object.
        let store =
            crate::db::sqlite::SqliteStore::connect(&temp_dir.path().join("test.db"), 1)
                .await
                .unwrap();
        sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind("test_docs")
            .bind("d1")
            .execute(store.pool())
            .await
            .unwrap();

        let err = doc.sync(&[]).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn detached_write_is_awaitable_and_skips_the_cache() {
        let db = Database::in_memory();
        let doc = StoredObject::<TestDoc>::create(&db, "d1").await.unwrap();

        let handle = doc.store_field_detached("course_id", "c9");
        handle.await.unwrap().unwrap();

        // The cache still answers from defaults until a sync.
        assert_eq!(doc.opt_text("course_id").unwrap(), None);
        let fresh = StoredObject::<TestDoc>::get(&db, "d1").await.unwrap();
        assert_eq!(fresh.opt_text("course_id").unwrap(), Some("c9".to_owned()));
    }
}
