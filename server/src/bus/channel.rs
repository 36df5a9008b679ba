/// Delivery scope for a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// The connection the message arrived on.
    Origin,
    /// Every connection currently joined to the session's room.
    Room,
    /// The publishing connection's own loop-back queue.
    Loopback,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Origin => "origin",
            Channel::Room => "room",
            Channel::Loopback => "loopback",
        }
    }

    /// Handlers can only subscribe to traffic that is dispatched on a
    /// per-connection basis. Room messages reach a connection through its
    /// loop-back queue, so `Room` is a publish target, never a subscription.
    pub fn accepts_subscriptions(&self) -> bool {
        matches!(self, Channel::Origin | Channel::Loopback)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
