use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use lectern_core::RoomCode;
use tokio::sync::mpsc;

use crate::bus::message::Message;
use crate::bus::session::ConnectionId;

/// Tracks which connections are joined to which rooms and fans published
/// messages out to the members' loop-back queues.
///
/// Delivery is a queue send, never an await: a member that went away simply
/// misses the message and gets cleaned up when its connection tears down.
#[derive(Clone, Default)]
pub struct RoomHub {
    rooms: Arc<DashMap<RoomCode, HashMap<ConnectionId, mpsc::UnboundedSender<Message>>>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins a connection to a room. Re-joining replaces the previous
    /// loop-back sender for that connection.
    pub fn join(
        &self,
        code: &RoomCode,
        conn: ConnectionId,
        loopback: mpsc::UnboundedSender<Message>,
    ) {
        self.rooms
            .entry(code.clone())
            .or_default()
            .insert(conn, loopback);
    }

    pub fn leave(&self, code: &RoomCode, conn: &ConnectionId) {
        if let Some(mut members) = self.rooms.get_mut(code) {
            members.remove(conn);
        }
        self.rooms.remove_if(code, |_, members| members.is_empty());
    }

    /// Drops the connection from every room it joined. Called on teardown.
    pub fn remove_connection(&self, conn: &ConnectionId) {
        let mut emptied = Vec::new();
        for mut entry in self.rooms.iter_mut() {
            if entry.value_mut().remove(conn).is_some() && entry.value().is_empty() {
                emptied.push(entry.key().clone());
            }
        }
        for code in emptied {
            self.rooms.remove_if(&code, |_, members| members.is_empty());
        }
    }

    /// Delivers a message to every member of the room, including the
    /// publisher's own connection. Returns how many members were reached.
    pub fn publish(&self, code: &RoomCode, message: &Message) -> usize {
        let Some(members) = self.rooms.get(code) else {
            return 0;
        };

        let mut delivered = 0;
        for sender in members.values() {
            if sender.send(message.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn member_count(&self, code: &RoomCode) -> usize {
        self.rooms.get(code).map(|members| members.len()).unwrap_or(0)
    }
}
