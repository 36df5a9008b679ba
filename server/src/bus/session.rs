use std::fmt;
use std::sync::Arc;

use lectern_core::{AppConfig, Course, Database, Room, StoredObject, User};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::bus::channel::Channel;
use crate::bus::hub::RoomHub;
use crate::bus::message::Message;
use crate::error::{HandlerError, HandlerResult, Prerequisite};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(format!("conn-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the connection's writer task can be asked to put on the wire.
#[derive(Debug)]
pub enum OutboundFrame {
    Payload(Message),
    Ping,
}

/// Per-connection state threaded through every handler invocation.
///
/// A context is owned by exactly one connection task, so handlers get
/// `&mut` access without locking. The `user`, `room` and `course` slots
/// start empty and are attached by the session handlers as the client
/// progresses.
pub struct SessionContext {
    pub connection_id: ConnectionId,
    pub database: Database,
    pub config: Arc<AppConfig>,
    pub hub: RoomHub,
    pub user: Option<StoredObject<User>>,
    pub room: Option<StoredObject<Room>>,
    pub course: Option<StoredObject<Course>>,
    /// Raised while this connection is the source of an in-flight course
    /// assignment broadcast. Its own loop-back handler observes the flag,
    /// clears it and skips the redundant re-sync.
    pub assignment_origin: bool,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    loopback: mpsc::UnboundedSender<Message>,
}

impl SessionContext {
    pub fn new(
        connection_id: ConnectionId,
        database: Database,
        config: Arc<AppConfig>,
        hub: RoomHub,
        outbound: mpsc::UnboundedSender<OutboundFrame>,
        loopback: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            connection_id,
            database,
            config,
            hub,
            user: None,
            room: None,
            course: None,
            assignment_origin: false,
            outbound,
            loopback,
        }
    }

    /// Sender the hub uses to deliver room traffic to this connection.
    pub fn loopback_sender(&self) -> mpsc::UnboundedSender<Message> {
        self.loopback.clone()
    }

    pub fn require_user(&self) -> Result<&StoredObject<User>, HandlerError> {
        self.user
            .as_ref()
            .ok_or(HandlerError::not_ready(Prerequisite::User))
    }

    pub fn require_room(&self) -> Result<&StoredObject<Room>, HandlerError> {
        self.room
            .as_ref()
            .ok_or(HandlerError::not_ready(Prerequisite::Room))
    }

    /// Publishes a message on one of the session's channels.
    ///
    /// Sends are queue pushes; a receiver that already went away drops the
    /// message silently.
    pub fn publish(&self, channel: Channel, message: Message) -> HandlerResult {
        match channel {
            Channel::Origin => {
                self.send_origin(message);
                Ok(())
            }
            Channel::Loopback => {
                let _ = self.loopback.send(message);
                Ok(())
            }
            Channel::Room => {
                let code = self.require_room()?.code();
                let delivered = self.hub.publish(&code, &message);
                debug!(
                    room = %code,
                    kind = message.kind(),
                    delivered,
                    "published room message"
                );
                Ok(())
            }
        }
    }

    /// Queues a message for the originating client.
    pub fn send_origin(&self, message: Message) {
        let _ = self.outbound.send(OutboundFrame::Payload(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_context() -> (
        SessionContext,
        mpsc::UnboundedReceiver<OutboundFrame>,
        mpsc::UnboundedReceiver<Message>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (loopback_tx, loopback_rx) = mpsc::unbounded_channel();
        let ctx = SessionContext::new(
            ConnectionId::new(),
            Database::in_memory(),
            Arc::new(AppConfig::default()),
            RoomHub::new(),
            outbound_tx,
            loopback_tx,
        );
        (ctx, outbound_rx, loopback_rx)
    }

    #[test]
    fn origin_publish_reaches_the_outbound_queue() {
        let (ctx, mut outbound_rx, _loopback_rx) = test_context();

        ctx.publish(Channel::Origin, Message::new("room.opened"))
            .unwrap();

        match outbound_rx.try_recv().unwrap() {
            OutboundFrame::Payload(message) => assert_eq!(message.kind(), "room.opened"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn loopback_publish_reaches_the_loopback_queue() {
        let (ctx, _outbound_rx, mut loopback_rx) = test_context();

        ctx.publish(Channel::Loopback, Message::new("course.assigned"))
            .unwrap();

        assert_eq!(loopback_rx.try_recv().unwrap().kind(), "course.assigned");
    }

    #[test]
    fn room_publish_without_a_joined_room_is_refused() {
        let (ctx, _outbound_rx, _loopback_rx) = test_context();

        let err = ctx
            .publish(Channel::Room, Message::new("course.assigned"))
            .unwrap_err();
        assert!(matches!(
            err,
            HandlerError::SessionNotReady {
                missing: Prerequisite::Room
            }
        ));
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }
}
