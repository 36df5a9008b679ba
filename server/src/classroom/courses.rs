use futures_util::future::BoxFuture;
use lectern_core::ids::course_slug;
use lectern_core::{Course, CourseId, Database, StoredObject, UserId, UserStatus};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bus::{Channel, Message, SessionContext};
use crate::error::{HandlerError, HandlerResult, Prerequisite};
use crate::utils::offload::offload;

/// Collapses whitespace runs; a name with no sluggable content is rejected.
fn tidy_course_name(raw: &str) -> Option<String> {
    let name = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if course_slug(&name).is_empty() {
        None
    } else {
        Some(name)
    }
}

/// `course.create`: stores a course owned by the attached user and answers a
/// `course.createResult` naming the outcome.
pub fn create_course<'a>(
    ctx: &'a mut SessionContext,
    message: &'a Message,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let user = ctx.require_user()?;
        let owner = UserId::new(user.id());
        let raw = message.require_str("courseName")?.to_owned();

        let cleaned = offload(move || tidy_course_name(&raw)).await?;
        let Some(name) = cleaned else {
            return ctx.publish(
                Channel::Origin,
                Message::new("course.createResult").with("result", "emptyName"),
            );
        };

        match StoredObject::<Course>::create_named(&ctx.database, &owner, &name).await {
            Ok(course) => {
                let course_id = course.course_id();
                info!(course = %course_id, "course created");
                ctx.publish(
                    Channel::Origin,
                    Message::new("course.createResult")
                        .with("result", "ok")
                        .with("courseId", course_id.as_str())
                        .with("courseName", name),
                )
            }
            Err(err) if err.is_already_exists() => {
                debug!(name = %name, "course name already taken");
                ctx.publish(
                    Channel::Origin,
                    Message::new("course.createResult")
                        .with("result", "duplicate")
                        .with("courseName", name),
                )
            }
            Err(err) => Err(err.into()),
        }
    })
}

/// Decrements a course's assignment counter on its own task. Nothing
/// downstream waits on the old counter, so failures are only logged.
fn retire_assignment_detached(database: &Database, course_id: &CourseId) -> JoinHandle<()> {
    let database = database.clone();
    let course_id = course_id.clone();
    tokio::spawn(async move {
        match StoredObject::<Course>::get(&database, course_id.as_str()).await {
            Ok(mut course) => {
                if let Err(err) = course.retire_assignment().await {
                    debug!(course = %course_id, error = %err, "failed to retire assignment");
                }
            }
            Err(err) if err.is_not_found() => {
                debug!(course = %course_id, "previous course vanished before retirement");
            }
            Err(err) => {
                debug!(course = %course_id, error = %err, "failed to load previous course");
            }
        }
    })
}

/// `course.assignToRoom`: moves the session's room onto a course.
///
/// The room's stored `course_id` is compare-and-swapped against the value
/// this session last saw, so of several consoles assigning concurrently at
/// most one wins; the losers refresh their view and stand down, counting on
/// the winner's broadcast already being on its way to them.
pub fn assign_course_to_room<'a>(
    ctx: &'a mut SessionContext,
    message: &'a Message,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let user = ctx.require_user()?;
        if user.status()? != UserStatus::Room {
            debug!(
                user = user.id(),
                "ignoring course.assignToRoom from a lesson connection"
            );
            return Ok(());
        }
        let (room_code, previous) = {
            let room = ctx.require_room()?;
            (room.code(), room.course_id()?)
        };

        let course_id = message.require_str("courseId")?;
        let mut course = match StoredObject::<Course>::get(&ctx.database, course_id).await {
            Ok(course) => course,
            Err(err) if err.is_not_found() => return Err(HandlerError::malformed("courseId")),
            Err(err) => return Err(err.into()),
        };

        course.note_assignment().await?;
        let next_id = course.course_id();

        let Some(room) = ctx.room.as_mut() else {
            return Err(HandlerError::not_ready(Prerequisite::Room));
        };
        match room.assign_course(previous.as_ref(), &next_id).await {
            Ok(()) => {}
            Err(err) if err.is_condition_not_met() => {
                debug!(room = %room_code, course = %next_id, "lost the assignment race");
                course.retire_assignment().await?;
                room.sync(&["course_id"]).await?;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        // Only the winning console retires the previous course's counter.
        let _retirement = previous
            .as_ref()
            .map(|prev| retire_assignment_detached(&ctx.database, prev));

        let Some(user) = ctx.user.as_ref() else {
            return Err(HandlerError::not_ready(Prerequisite::User));
        };
        // Awaited so companion connections sharing this user document see
        // the new course when they re-sync on the broadcast.
        user.assign_course_detached(&next_id)
            .await
            .map_err(|err| HandlerError::Internal(anyhow::anyhow!(err)))??;

        let course_name = course.name()?;
        ctx.course = Some(course);
        ctx.assignment_origin = true;
        ctx.publish(
            Channel::Room,
            Message::new("course.assigned")
                .with("courseId", next_id.as_str())
                .with("courseName", course_name)
                .with("roomCode", room_code.as_str()),
        )
    })
}

/// `course.assigned` on the loop-back queue: every room member, publisher
/// included, receives the broadcast here. The publisher only clears its
/// origin flag and forwards; everyone else re-syncs their user's course,
/// loads it into the session, then forwards.
pub fn sync_assigned_course<'a>(
    ctx: &'a mut SessionContext,
    message: &'a Message,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        if ctx.assignment_origin {
            // Our own broadcast coming back around; the store already
            // reflects everything it announces.
            ctx.assignment_origin = false;
            return ctx.publish(Channel::Origin, message.clone());
        }

        let Some(user) = ctx.user.as_mut() else {
            return Err(HandlerError::not_ready(Prerequisite::User));
        };
        user.sync(&["course_id"]).await?;
        if let Some(course_id) = user.course_id()? {
            match StoredObject::<Course>::get(&ctx.database, course_id.as_str()).await {
                Ok(course) => ctx.course = Some(course),
                Err(err) if err.is_not_found() => {
                    debug!(course = %course_id, "assigned course vanished before it could be loaded");
                }
                Err(err) => return Err(err.into()),
            }
        }

        ctx.publish(Channel::Origin, message.clone())
    })
}
