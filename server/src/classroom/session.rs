use futures_util::future::BoxFuture;
use lectern_core::{Database, StoredObject, User, UserStatus};
use tracing::info;

use crate::bus::{Channel, Message, SessionContext};
use crate::error::{HandlerError, HandlerResult};

fn role_status(role: &str) -> Result<UserStatus, HandlerError> {
    match role {
        "teacher" => Ok(UserStatus::Room),
        "student" => Ok(UserStatus::Lesson),
        _ => Err(HandlerError::malformed("role")),
    }
}

async fn get_or_create_user(
    database: &Database,
    id: &str,
) -> Result<StoredObject<User>, HandlerError> {
    match StoredObject::<User>::get(database, id).await {
        Ok(user) => Ok(user),
        Err(err) if err.is_not_found() => {
            match StoredObject::<User>::create(database, id).await {
                Ok(user) => Ok(user),
                // Another connection attached the same user first.
                Err(err) if err.is_already_exists() => Ok(StoredObject::<User>::get(database, id).await?),
                Err(err) => Err(err.into()),
            }
        }
        Err(err) => Err(err.into()),
    }
}

/// `session.attach`: binds the connection to a user document, creating it on
/// first sight, and records the declared role as the user's status.
pub fn attach_session<'a>(
    ctx: &'a mut SessionContext,
    message: &'a Message,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let user_id = message.require_str("userId")?;
        if user_id.trim().is_empty() {
            return Err(HandlerError::malformed("userId"));
        }
        let status = role_status(message.require_str("role")?)?;

        let mut user = get_or_create_user(&ctx.database, user_id).await?;
        user.set_status(status).await?;
        info!(user = user_id, status = status.as_str(), "session attached");

        let notice = Message::new("session.attached")
            .with("userId", user_id)
            .with("status", status.as_str());
        ctx.user = Some(user);
        ctx.publish(Channel::Origin, notice)
    })
}

#[cfg(test)]
mod tests {
    use lectern_core::UserStatus;

    use crate::bus::Message;
    use crate::test_support::{memory_state, session};

    #[tokio::test]
    async fn attach_creates_the_user_and_reports_back() {
        let state = memory_state();
        let mut teacher = session(&state);

        teacher
            .deliver_origin(
                &state,
                Message::new("session.attach")
                    .with("userId", "t-aliyah")
                    .with("role", "teacher"),
            )
            .await;

        let sent = teacher.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind(), "session.attached");
        assert_eq!(sent[0].opt_str("status"), Some("room"));

        let user = teacher.ctx.user.as_ref().unwrap();
        assert_eq!(user.id(), "t-aliyah");
        assert_eq!(user.status().unwrap(), UserStatus::Room);
    }

    #[tokio::test]
    async fn attach_reuses_an_existing_user_document() {
        let state = memory_state();

        let mut first = session(&state);
        first
            .deliver_origin(
                &state,
                Message::new("session.attach")
                    .with("userId", "s-kim")
                    .with("role", "student"),
            )
            .await;

        let mut second = session(&state);
        second
            .deliver_origin(
                &state,
                Message::new("session.attach")
                    .with("userId", "s-kim")
                    .with("role", "student"),
            )
            .await;

        assert_eq!(second.sent()[0].kind(), "session.attached");
        assert_eq!(second.ctx.user.as_ref().unwrap().id(), "s-kim");
    }

    #[tokio::test]
    async fn attach_rejects_unknown_roles_and_blank_ids() {
        let state = memory_state();
        let mut connection = session(&state);

        connection
            .deliver_origin(
                &state,
                Message::new("session.attach")
                    .with("userId", "s-kim")
                    .with("role", "janitor"),
            )
            .await;
        let sent = connection.sent();
        assert_eq!(sent[0].kind(), "error.malformedMessage");
        assert_eq!(sent[0].opt_str("missingField"), Some("role"));
        assert!(connection.ctx.user.is_none());

        connection
            .deliver_origin(
                &state,
                Message::new("session.attach")
                    .with("userId", "   ")
                    .with("role", "student"),
            )
            .await;
        let sent = connection.sent();
        assert_eq!(sent[0].opt_str("missingField"), Some("userId"));
    }

    #[tokio::test]
    async fn attach_is_required_before_room_traffic() {
        let state = memory_state();
        let mut connection = session(&state);

        connection
            .deliver_origin(&state, Message::new("room.join").with("roomCode", "XW2FQ"))
            .await;

        let sent = connection.sent();
        assert_eq!(sent[0].kind(), "session.notReady");
        assert_eq!(sent[0].opt_str("missing"), Some("user"));
    }
}
