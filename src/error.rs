use thiserror::Error;

/// Transport unreachable or rejected the connection. Derived state is cleared
/// and operations fail until a later connect succeeds.
#[derive(Debug, Error)]
#[error("connection failed: {0}")]
pub struct ConnectionError(pub String);

/// Attaching to a room channel failed. Room state reverts to its prior value.
#[derive(Debug, Error)]
pub enum JoinError {
    #[error("room id cannot be empty")]
    EmptyRoomId,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("failed to attach to channel {channel}: {reason}")]
    Attach { channel: String, reason: String },
}

/// Publish failed. Logged and non-fatal; callers treat publishing as
/// fire-and-forget.
#[derive(Debug, Error)]
#[error("publish failed: {0}")]
pub struct PublishError(pub String);

/// Best-effort cleanup failure while detaching. Never blocks a subsequent
/// join.
#[derive(Debug, Error)]
#[error("detach failed: {0}")]
pub struct DetachError(pub String);

/// The local player could not execute a remote command. Reported to the
/// sender of the bus request; the room stays up.
#[derive(Debug, Error)]
pub enum ApplyActionError {
    #[error("no video player element available")]
    PlayerNotFound,
    #[error("player rejected {action}: {reason}")]
    Player { action: &'static str, reason: String },
}
