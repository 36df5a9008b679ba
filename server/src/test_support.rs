#![allow(dead_code)]

use lectern_core::{AppConfig, Database, RoomCode, StoreBackend};
use tempfile::TempDir;
use tokio::sync::mpsc;

use crate::bus::{Channel, ConnectionId, Message, OutboundFrame, SessionContext};
use crate::state::{AppState, build_state};

pub(crate) fn memory_state() -> AppState {
    let mut config = AppConfig::default();
    config.store_backend = StoreBackend::Memory;
    build_state(&Database::in_memory(), &config)
}

/// State backed by a disposable on-disk sqlite store. The temp dir must
/// outlive the state.
pub(crate) async fn sqlite_state() -> (TempDir, AppState) {
    let temp_dir = tempfile::tempdir().expect("create temp dir");
    let mut config = AppConfig::default();
    config.store_backend = StoreBackend::Sqlite;
    config.database_path = temp_dir
        .path()
        .join("classroom.db")
        .to_string_lossy()
        .into_owned();

    let database = Database::connect(&config).await.expect("connect database");
    (temp_dir, build_state(&database, &config))
}

/// One simulated websocket connection: the handler-facing context plus the
/// receiving ends of its outbound and loop-back queues.
pub(crate) struct TestSession {
    pub(crate) ctx: SessionContext,
    outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    loopback: mpsc::UnboundedReceiver<Message>,
}

pub(crate) fn session(state: &AppState) -> TestSession {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (loopback_tx, loopback_rx) = mpsc::unbounded_channel();
    let ctx = SessionContext::new(
        ConnectionId::new(),
        state.database.clone(),
        state.config.clone(),
        state.hub.clone(),
        outbound_tx,
        loopback_tx,
    );
    TestSession {
        ctx,
        outbound: outbound_rx,
        loopback: loopback_rx,
    }
}

impl TestSession {
    /// Runs a message through the router as if this client had sent it.
    pub(crate) async fn deliver_origin(&mut self, state: &AppState, message: Message) {
        state
            .router
            .dispatch(&mut self.ctx, Channel::Origin, &message)
            .await;
    }

    /// Dispatches every room broadcast queued for this connection.
    pub(crate) async fn pump_loopback(&mut self, state: &AppState) {
        while let Ok(message) = self.loopback.try_recv() {
            state
                .router
                .dispatch(&mut self.ctx, Channel::Loopback, &message)
                .await;
        }
    }

    /// Drains the outbound queue, keeping only payload frames.
    pub(crate) fn sent(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            if let OutboundFrame::Payload(message) = frame {
                messages.push(message);
            }
        }
        messages
    }
}

/// Attaches a user and discards the acknowledgement.
pub(crate) async fn attach(state: &AppState, session: &mut TestSession, user_id: &str, role: &str) {
    session
        .deliver_origin(
            state,
            Message::new("session.attach")
                .with("userId", user_id)
                .with("role", role),
        )
        .await;
    let sent = session.sent();
    let ack = sent.first().expect("acknowledge session.attach");
    assert_eq!(ack.kind(), "session.attached");
}

/// Opens a room for an attached teacher and returns its code.
pub(crate) async fn open_room(state: &AppState, session: &mut TestSession) -> RoomCode {
    session
        .deliver_origin(state, Message::new("room.open"))
        .await;
    let sent = session.sent();
    let opened = sent.first().expect("acknowledge room.open");
    assert_eq!(opened.kind(), "room.opened");
    let code = opened.opt_str("roomCode").expect("room code in room.opened");
    RoomCode::new(code)
}

/// Joins an existing room and discards the acknowledgement.
pub(crate) async fn join_room(state: &AppState, session: &mut TestSession, code: &RoomCode) {
    session
        .deliver_origin(
            state,
            Message::new("room.join").with("roomCode", code.as_str()),
        )
        .await;
    let sent = session.sent();
    let ack = sent.first().expect("acknowledge room.join");
    assert_eq!(ack.kind(), "room.joined");
}
