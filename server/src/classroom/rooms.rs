use futures_util::future::BoxFuture;
use lectern_core::{Room, StoredObject, UserId, UserStatus};
use tracing::{debug, info};

use crate::bus::{Channel, Message, SessionContext};
use crate::error::{HandlerError, HandlerResult};

/// `room.open`: mints a code, creates the room document and joins the
/// connection to it. Only teacher consoles open rooms; anyone else is
/// ignored.
pub fn open_room<'a>(
    ctx: &'a mut SessionContext,
    _message: &'a Message,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let user = ctx.require_user()?;
        if user.status()? != UserStatus::Room {
            debug!(user = user.id(), "ignoring room.open from a lesson connection");
            return Ok(());
        }
        let opened_by = UserId::new(user.id());

        let room =
            StoredObject::<Room>::open(&ctx.database, &opened_by, ctx.config.room_code_length)
                .await?;

        if let Some(previous) = ctx.room.take() {
            ctx.hub.leave(&previous.code(), &ctx.connection_id);
        }
        let code = room.code();
        ctx.hub
            .join(&code, ctx.connection_id.clone(), ctx.loopback_sender());
        ctx.room = Some(room);
        info!(room = %code, "room opened");

        ctx.publish(
            Channel::Origin,
            Message::new("room.opened").with("roomCode", code.as_str()),
        )
    })
}

/// `room.join`: looks a room up by its code and joins the connection to it.
/// Codes are typed by hand, so lookup is case-insensitive.
pub fn join_room<'a>(
    ctx: &'a mut SessionContext,
    message: &'a Message,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        ctx.require_user()?;
        let normalized = message.require_str("roomCode")?.trim().to_ascii_uppercase();
        if normalized.is_empty() {
            return Err(HandlerError::malformed("roomCode"));
        }

        match StoredObject::<Room>::get(&ctx.database, &normalized).await {
            Ok(room) => {
                if let Some(previous) = ctx.room.take() {
                    ctx.hub.leave(&previous.code(), &ctx.connection_id);
                }
                let code = room.code();
                ctx.hub
                    .join(&code, ctx.connection_id.clone(), ctx.loopback_sender());
                ctx.room = Some(room);
                let member_count = ctx.hub.member_count(&code);
                info!(room = %code, member_count, "room joined");

                ctx.publish(
                    Channel::Origin,
                    Message::new("room.joined")
                        .with("roomCode", code.as_str())
                        .with("memberCount", member_count),
                )
            }
            Err(err) if err.is_not_found() => {
                debug!(room = %normalized, "join for unknown room");
                ctx.publish(
                    Channel::Origin,
                    Message::new("room.unknown").with("roomCode", normalized),
                )
            }
            Err(err) => Err(err.into()),
        }
    })
}
