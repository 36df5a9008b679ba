use std::fmt;

use anyhow::Error as AnyError;
use lectern_core::StoreError;

use crate::bus::message::Message;

/// Outcome of a single message handler invocation.
pub type HandlerResult = Result<(), HandlerError>;

/// Session state a handler needs before it can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prerequisite {
    User,
    Room,
}

impl Prerequisite {
    pub fn as_str(&self) -> &'static str {
        match self {
            Prerequisite::User => "user",
            Prerequisite::Room => "room",
        }
    }
}

impl fmt::Display for Prerequisite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by message handlers.
///
/// The first two variants are client-visible protocol failures and map to a
/// notice on the originating connection. The rest terminate the current
/// operation and are only logged.
#[derive(Debug)]
pub enum HandlerError {
    /// The inbound payload is missing a field or carries the wrong shape.
    MalformedMessage { field: String },
    /// The session has not attached the state this handler depends on.
    SessionNotReady { missing: Prerequisite },
    /// A store operation failed in a way the handler did not expect.
    Store(StoreError),
    /// Anything else.
    Internal(AnyError),
}

impl HandlerError {
    pub fn malformed(field: impl Into<String>) -> Self {
        HandlerError::MalformedMessage {
            field: field.into(),
        }
    }

    pub fn not_ready(missing: Prerequisite) -> Self {
        HandlerError::SessionNotReady { missing }
    }

    /// Builds the notice the originating connection should receive, if this
    /// error is one the client can act on. `offending` is the message type
    /// that triggered the failure.
    pub fn to_notice(&self, offending: &str) -> Option<Message> {
        match self {
            HandlerError::MalformedMessage { field } => {
                Some(Message::malformed_notice(Some(offending), field))
            }
            HandlerError::SessionNotReady { missing } => {
                Some(Message::not_ready_notice(*missing))
            }
            HandlerError::Store(_) | HandlerError::Internal(_) => None,
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::MalformedMessage { field } => {
                write!(f, "malformed message: missing or invalid field `{field}`")
            }
            HandlerError::SessionNotReady { missing } => {
                write!(f, "session not ready: no {missing} attached")
            }
            HandlerError::Store(err) => write!(f, "store error: {err}"),
            HandlerError::Internal(err) => write!(f, "internal error: {err}"),
        }
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HandlerError::Store(err) => Some(err),
            HandlerError::Internal(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<StoreError> for HandlerError {
    fn from(err: StoreError) -> Self {
        HandlerError::Store(err)
    }
}

impl From<AnyError> for HandlerError {
    fn from(err: AnyError) -> Self {
        HandlerError::Internal(err)
    }
}
