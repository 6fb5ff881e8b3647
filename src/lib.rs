//! Watchlink: room and host coordination for synchronized video playback.
//!
//! The crate models one browser-extension process: a set of tabs, each with a
//! site player and a [`engine::PlayerSyncEngine`], a single
//! [`room::RoomCoordinator`] that owns the transport connection and host
//! assignment, and a [`bus::MessageBus`] carrying requests and pushes between
//! them. The pub/sub transport itself sits behind the [`transport`] traits;
//! [`hub::LocalHub`] is the in-process implementation used by the demo binary
//! and the integration tests.

pub mod bus;
pub mod channel;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod hub;
pub mod player;
pub mod presence;
pub mod protocol;
pub mod room;
pub mod transport;

pub use bus::{LeaveOutcome, MessageBus, PublishOutcome, TabId, TabPush};
pub use channel::ChannelClient;
pub use config::SyncConfig;
pub use engine::{LocalPlayerEvent, PlayerSyncEngine};
pub use error::{ApplyActionError, ConnectionError, JoinError, PublishError};
pub use hub::LocalHub;
pub use player::{SimPlayer, SitePlayer};
pub use protocol::{PlayerAction, PlayerActionMessage, PopupStatus, Site, UiEvent};
pub use room::RoomCoordinator;
pub use transport::{Channel, Connection, Transport};
