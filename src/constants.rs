/// Channel name for a room is this prefix followed by the room id.
pub const CHANNEL_NAME_PREFIX: &str = "watch-party-";

/// The single event name player sync messages are published under.
pub const PLAYER_MESSAGE_NAME: &str = "player-action";

/// Locally generated client ids start with this prefix; the transport may
/// supersede the id with its own on connect.
pub const CLIENT_ID_PREFIX: &str = "ext-client-";

/// Current application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
