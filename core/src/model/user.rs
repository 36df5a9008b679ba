use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;

use crate::document::{FieldMap, literal_fields};
use crate::error::{StoreError, StoreResult};
use crate::ids::CourseId;
use crate::object::{Persist, StoredObject};

/// What kind of connection a user drives: a teacher console projecting a
/// room, or a learner following a lesson.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Room,
    Lesson,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Room => "room",
            UserStatus::Lesson => "lesson",
        }
    }
}

pub struct User;

static USER_DEFAULTS: Lazy<FieldMap> = Lazy::new(|| {
    literal_fields(json!({
        "status": "lesson",
        "course_id": null,
    }))
});

impl Persist for User {
    const COLLECTION: &'static str = "users";

    fn defaults() -> &'static FieldMap {
        &USER_DEFAULTS
    }
}

impl StoredObject<User> {
    pub fn status(&self) -> StoreResult<UserStatus> {
        self.field("status")
    }

    pub fn course_id(&self) -> StoreResult<Option<CourseId>> {
        self.field("course_id")
    }

    pub async fn set_status(&mut self, status: UserStatus) -> StoreResult<()> {
        self.store_field("status", status.as_str()).await
    }

    pub fn require_status(&self, expected: UserStatus) -> StoreResult<()> {
        let actual = self.status()?;
        if actual == expected {
            Ok(())
        } else {
            Err(StoreError::invalid_argument(format!(
                "user {id} has status {actual}, needs {expected}",
                id = self.id(),
                actual = actual.as_str(),
                expected = expected.as_str(),
            )))
        }
    }

    /// Records the user's current course without blocking the caller on the
    /// round trip. The handle is the caller's to await or drop; the local
    /// cache is left alone either way.
    pub fn assign_course_detached(&self, course_id: &CourseId) -> JoinHandle<StoreResult<()>> {
        self.store_field_detached("course_id", course_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn fresh_users_are_lesson_connections_without_a_course() {
        let db = Database::in_memory();
        let user = StoredObject::<User>::create(&db, "u1").await.unwrap();

        assert_eq!(user.status().unwrap(), UserStatus::Lesson);
        assert_eq!(user.course_id().unwrap(), None);
    }

    #[tokio::test]
    async fn status_round_trips_through_the_store() {
        let db = Database::in_memory();
        let mut user = StoredObject::<User>::create(&db, "u1").await.unwrap();
        user.set_status(UserStatus::Room).await.unwrap();

        let fresh = StoredObject::<User>::get(&db, "u1").await.unwrap();
        assert_eq!(fresh.status().unwrap(), UserStatus::Room);
        fresh.require_status(UserStatus::Room).unwrap();
        assert!(fresh.require_status(UserStatus::Lesson).is_err());
    }

    #[tokio::test]
    async fn detached_course_assignment_lands_in_the_store() {
        let db = Database::in_memory();
        let user = StoredObject::<User>::create(&db, "u1").await.unwrap();

        user.assign_course_detached(&CourseId::new("t1:rust-101"))
            .await
            .unwrap()
            .unwrap();

        let fresh = StoredObject::<User>::get(&db, "u1").await.unwrap();
        assert_eq!(
            fresh.course_id().unwrap(),
            Some(CourseId::new("t1:rust-101"))
        );
    }
}
