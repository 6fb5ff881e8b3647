use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{ConnectionError, DetachError, JoinError, PublishError};

/// Callback invoked for every message delivered on a subscribed event name.
pub type MessageHandler = Arc<dyn Fn(ChannelMessage) + Send + Sync>;

/// Callback invoked for presence set changes on an attached channel.
pub type PresenceHandler = Arc<dyn Fn(PresenceEvent) + Send + Sync>;

/// A delivered message together with its transport envelope. The sender's
/// client id comes from the envelope, never from the payload.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub name: String,
    pub client_id: String,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceAction {
    Enter,
    Leave,
    Update,
}

#[derive(Debug, Clone)]
pub struct PresenceEvent {
    pub action: PresenceAction,
    pub client_id: String,
}

/// The realtime pub/sub service, reduced to what the sync layer needs.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a connection under the proposed client id. The transport may
    /// supersede the id; read the effective one off the returned connection.
    async fn connect(&self, client_id: &str) -> Result<Arc<dyn Connection>, ConnectionError>;
}

/// One live connection. Repeated `channel` calls for the same name return the
/// same channel object.
pub trait Connection: Send + Sync {
    fn client_id(&self) -> String;
    fn channel(&self, name: &str) -> Arc<dyn Channel>;
}

/// A named channel scoped to one connection. Handler registration is local;
/// delivery only happens while attached.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> String;

    async fn attach(&self) -> Result<(), JoinError>;
    /// Detaching implicitly removes this client from the presence set.
    async fn detach(&self) -> Result<(), DetachError>;

    async fn publish(&self, event: &str, payload: Value) -> Result<(), PublishError>;

    fn subscribe(&self, event: &str, handler: MessageHandler);
    /// Remove every message handler installed on this channel.
    fn unsubscribe(&self);

    async fn presence_enter(&self) -> Result<(), JoinError>;
    async fn presence_leave(&self) -> Result<(), DetachError>;
    /// Current presence set membership (client ids).
    async fn presence_members(&self) -> Result<Vec<String>, ConnectionError>;

    fn subscribe_presence(&self, handler: PresenceHandler);
    fn unsubscribe_presence(&self);
}
