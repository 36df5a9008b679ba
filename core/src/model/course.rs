use once_cell::sync::Lazy;
use serde_json::json;

use crate::db::Database;
use crate::document::{ChangeSpec, Condition, FieldMap, literal_fields};
use crate::error::StoreResult;
use crate::ids::{CourseId, UserId, course_id_for};
use crate::object::{Persist, StoredObject};

pub struct Course;

static COURSE_DEFAULTS: Lazy<FieldMap> = Lazy::new(|| {
    literal_fields(json!({
        "name": "",
        "owner_id": null,
        "assignments": 0,
    }))
});

impl Persist for Course {
    const COLLECTION: &'static str = "courses";

    fn defaults() -> &'static FieldMap {
        &COURSE_DEFAULTS
    }
}

impl StoredObject<Course> {
    /// Creates a course owned by `owner`. The id derives from owner and
    /// name, so reusing a name surfaces as `AlreadyExists` for the caller to
    /// translate into its duplicate-name result.
    pub async fn create_named(
        database: &Database,
        owner: &UserId,
        name: &str,
    ) -> StoreResult<Self> {
        let course_id = course_id_for(owner, name);
        let mut course = Self::create(database, course_id.as_str()).await?;
        course
            .store_fields(literal_fields(json!({
                "name": name,
                "owner_id": owner.as_str(),
                "assignments": 0,
            })))
            .await?;
        Ok(course)
    }

    pub fn course_id(&self) -> CourseId {
        CourseId::new(self.id())
    }

    pub fn name(&self) -> StoreResult<String> {
        self.text("name")
    }

    pub fn owner_id(&self) -> StoreResult<Option<UserId>> {
        self.field("owner_id")
    }

    pub fn assignments(&self) -> StoreResult<i64> {
        self.int("assignments")
    }

    /// Atomically advances the count of rooms running this course. The
    /// post-image lands in the cache, so `assignments()` is exact afterwards.
    pub async fn note_assignment(&mut self) -> StoreResult<()> {
        self.modify_if(Condition::new(), ChangeSpec::new().inc("assignments", 1))
            .await
    }

    pub async fn retire_assignment(&mut self) -> StoreResult<()> {
        self.modify_if(Condition::new(), ChangeSpec::new().inc("assignments", -1))
            .await
    }
}
