use std::sync::Arc;

use async_trait::async_trait;

use crate::document::{ChangeSpec, Condition, FieldMap, UpdateReport};
use crate::error::StoreResult;

pub type CollectionRef = Arc<dyn DocumentCollection>;

/// Minimal contract the document store needs from a backing collection.
///
/// The stored-object layer is written entirely against this trait and is
/// agnostic to the database product behind it. Implementations must make
/// each operation atomic with respect to the others on the same collection:
/// `update` and `find_and_modify` evaluate their condition and apply their
/// change as one indivisible step.
#[async_trait]
pub trait DocumentCollection: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the first document matching `filter`, lowest id first when
    /// several match.
    async fn find_one(&self, filter: &Condition) -> StoreResult<Option<FieldMap>>;

    /// Inserts a document. The document must carry a string `_id`; a
    /// duplicate id fails with `AlreadyExists`.
    async fn insert(&self, doc: FieldMap) -> StoreResult<()>;

    /// Applies `change` to every document matching `filter` and reports how
    /// many matched and how many actually changed.
    async fn update(&self, filter: &Condition, change: &ChangeSpec) -> StoreResult<UpdateReport>;

    /// Atomically applies `change` to the first document matching `filter`
    /// and returns the post-image, or `None` if nothing matched.
    async fn find_and_modify(
        &self,
        filter: &Condition,
        change: &ChangeSpec,
    ) -> StoreResult<Option<FieldMap>>;
}
