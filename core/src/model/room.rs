use once_cell::sync::Lazy;
use serde_json::{Value as JsonValue, json};

use crate::db::Database;
use crate::document::{Condition, FieldMap, literal_fields};
use crate::error::{StoreError, StoreResult};
use crate::ids::{CourseId, RoomCode, UserId, mint_room_code};
use crate::object::{Persist, StoredObject};

pub struct Room;

static ROOM_DEFAULTS: Lazy<FieldMap> = Lazy::new(|| {
    literal_fields(json!({
        "course_id": null,
        "opened_by": null,
    }))
});

impl Persist for Room {
    const COLLECTION: &'static str = "rooms";

    fn defaults() -> &'static FieldMap {
        &ROOM_DEFAULTS
    }
}

const OPEN_ATTEMPTS: usize = 8;

impl StoredObject<Room> {
    /// Opens a new room under a freshly minted code. Code collisions are
    /// expected at short lengths, so creation retries with a new code until
    /// the insert wins.
    pub async fn open(
        database: &Database,
        opened_by: &UserId,
        code_length: usize,
    ) -> StoreResult<Self> {
        Self::open_with(database, opened_by, || mint_room_code(code_length)).await
    }

    pub async fn open_with(
        database: &Database,
        opened_by: &UserId,
        mut minter: impl FnMut() -> RoomCode,
    ) -> StoreResult<Self> {
        let mut last_collision = None;
        for _ in 0..OPEN_ATTEMPTS {
            let code = minter();
            match Self::create(database, code.as_str()).await {
                Ok(mut room) => {
                    // Materialize course_id so later compare-and-swap writes
                    // have an explicit null to match against.
                    room.store_fields(literal_fields(json!({
                        "course_id": null,
                        "opened_by": opened_by.as_str(),
                    })))
                    .await?;
                    return Ok(room);
                }
                Err(err) if err.is_already_exists() => {
                    last_collision = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_collision.unwrap_or_else(|| {
            StoreError::invalid_argument("room code minter produced no candidates")
        }))
    }

    pub fn code(&self) -> RoomCode {
        RoomCode::new(self.id())
    }

    pub fn course_id(&self) -> StoreResult<Option<CourseId>> {
        self.field("course_id")
    }

    pub fn opened_by(&self) -> StoreResult<Option<UserId>> {
        self.field("opened_by")
    }

    /// Moves the room's assignment from `previous` to `next`, but only if
    /// the stored assignment still is `previous`. Losing that race is
    /// `ConditionNotMet` and leaves the room untouched.
    pub async fn assign_course(
        &mut self,
        previous: Option<&CourseId>,
        next: &CourseId,
    ) -> StoreResult<()> {
        let expected = match previous {
            Some(course_id) => JsonValue::String(course_id.as_str().to_owned()),
            None => JsonValue::Null,
        };
        let fields = literal_fields(json!({ "course_id": next.as_str() }));
        self.store_fields_if(Condition::new().eq("course_id", expected), fields, true)
            .await
    }

    /// Clears the assignment if the room still points at `current`.
    pub async fn clear_course(&mut self, current: &CourseId) -> StoreResult<()> {
        self.reset_if(
            Condition::new().eq("course_id", current.as_str()),
            &["course_id"],
            true,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_retries_past_code_collisions() {
        let db = Database::in_memory();
        let teacher = UserId::new("t1");

        let first = StoredObject::<Room>::open_with(&db, &teacher, || RoomCode::new("TAKEN"))
            .await
            .unwrap();
        assert_eq!(first.code(), RoomCode::new("TAKEN"));

        let mut codes = vec!["TAKEN", "TAKEN", "FRESH"].into_iter();
        let second = StoredObject::<Room>::open_with(&db, &teacher, || {
            RoomCode::new(codes.next().unwrap())
        })
        .await
        .unwrap();
        assert_eq!(second.code(), RoomCode::new("FRESH"));
        assert_eq!(second.opened_by().unwrap(), Some(teacher.clone()));
    }

    #[tokio::test]
    async fn open_gives_up_when_every_code_collides() {
        let db = Database::in_memory();
        let teacher = UserId::new("t1");
        StoredObject::<Room>::open_with(&db, &teacher, || RoomCode::new("ONLY"))
            .await
            .unwrap();

        let err = StoredObject::<Room>::open_with(&db, &teacher, || RoomCode::new("ONLY"))
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn assignment_is_a_compare_and_swap_on_the_current_course() {
        let db = Database::in_memory();
        let teacher = UserId::new("t1");
        let mut room = StoredObject::<Room>::open(&db, &teacher, 5).await.unwrap();

        let rust = CourseId::new("t1:rust-101");
        let tokio_course = CourseId::new("t1:async-tokio");

        room.assign_course(None, &rust).await.unwrap();
        assert_eq!(room.course_id().unwrap(), Some(rust.clone()));

        // A writer with a stale view of the assignment loses.
        let mut stale = StoredObject::<Room>::get(&db, room.id()).await.unwrap();
        let err = stale
            .assign_course(None, &tokio_course)
            .await
            .unwrap_err();
        assert!(err.is_condition_not_met());

        room.assign_course(Some(&rust), &tokio_course).await.unwrap();
        assert_eq!(room.course_id().unwrap(), Some(tokio_course));
    }

    #[tokio::test]
    async fn clear_course_only_clears_the_expected_assignment() {
        let db = Database::in_memory();
        let teacher = UserId::new("t1");
        let mut room = StoredObject::<Room>::open(&db, &teacher, 5).await.unwrap();
        let rust = CourseId::new("t1:rust-101");
        room.assign_course(None, &rust).await.unwrap();

        let err = room
            .clear_course(&CourseId::new("t1:other"))
            .await
            .unwrap_err();
        assert!(err.is_condition_not_met());

        room.clear_course(&rust).await.unwrap();
        assert_eq!(room.course_id().unwrap(), None);
    }
}
